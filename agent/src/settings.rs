use crate::cli::Args;
use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use connector::config::ConnectorSettings;

/// Prefix of the environment variables read into the settings.
pub const ENV_PREFIX: &str = "HUBBRIDGE";

/// Loads the connector settings.
///
/// Sources, lowest precedence first: the optional configuration file, `HUBBRIDGE__*`
/// environment variables (`.env` included) and the command line flags.
pub fn load_settings(args: &Args) -> Result<ConnectorSettings> {
    dotenv::dotenv().ok();
    build_settings(args, None)
}

fn build_settings(args: &Args, env: Option<Map<String, String>>) -> Result<ConnectorSettings> {
    let mut builder = Config::builder();

    if let Some(path) = &args.config_file {
        builder = builder.add_source(File::from(path.as_path()));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(env),
    );

    for (key, value) in args.overrides() {
        builder = builder
            .set_override(key, value)
            .with_context(|| format!("invalid command line value for '{key}'"))?;
    }

    let settings = builder
        .build()
        .context("Configuration loading failed")?
        .try_deserialize::<ConnectorSettings>()
        .context("Failed to deserialize configuration")?;

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}
