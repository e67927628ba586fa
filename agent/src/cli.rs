use clap::Parser;
use std::path::PathBuf;

/// Gateway agent bridging a local MQTT broker and a cloud IoT hub
#[derive(Parser, Debug, Default, Clone, PartialEq)]
#[command(name = "hubbridge")]
#[command(version)]
#[command(about = "Bridges a local MQTT broker to a cloud IoT hub", long_about = None)]
pub struct Args {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long = "config-file", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Hub device connection string
    #[arg(long)]
    pub connection_string: Option<String>,

    /// SAS token validity period, e.g. 30m, 1h or 7d
    #[arg(long)]
    pub sas_token_validity: Option<String>,

    /// Provisioning scope of the device
    #[arg(long)]
    pub id_scope: Option<String>,

    /// Comma separated local topics forwarded to the hub
    #[arg(long)]
    pub passthrough_telemetry_topics: Option<String>,

    /// Local topic receiving cloud-to-device messages
    #[arg(long)]
    pub passthrough_command_topic: Option<String>,

    /// CA certificates file used to verify the hub
    #[arg(long)]
    pub ca_cert: Option<String>,

    /// Device certificate file
    #[arg(long)]
    pub cert: Option<String>,

    /// Device private key file
    #[arg(long)]
    pub key: Option<String>,

    /// Local broker host
    #[arg(long)]
    pub local_host: Option<String>,

    /// Local broker port
    #[arg(long)]
    pub local_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<String>,
}

impl Args {
    /// Settings keys explicitly set on the command line, in `config` crate notation.
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                overrides.push((key, value));
            }
        };

        push("connection_string", self.connection_string.clone());
        push("sas_token_validity", self.sas_token_validity.clone());
        push("id_scope", self.id_scope.clone());
        push(
            "passthrough_telemetry_topics",
            self.passthrough_telemetry_topics.clone(),
        );
        push(
            "passthrough_command_topic",
            self.passthrough_command_topic.clone(),
        );
        push("ca_cert", self.ca_cert.clone());
        push("cert", self.cert.clone());
        push("key", self.key.clone());
        push("local.host", self.local_host.clone());
        push("local.port", self.local_port.map(|port| port.to_string()));
        push("logging.level", self.log_level.clone());
        push("logging.file", self.log_file.clone());

        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_given_flags_override() {
        let args = Args::try_parse_from([
            "hubbridge",
            "--config-file",
            "hubbridge.toml",
            "--id-scope",
            "0ne00000000",
            "--local-port",
            "1884",
        ])
        .unwrap();

        assert_eq!(args.config_file, Some(PathBuf::from("hubbridge.toml")));
        assert_eq!(
            args.overrides(),
            vec![
                ("id_scope", "0ne00000000".to_string()),
                ("local.port", "1884".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let err = Args::try_parse_from(["hubbridge", "--no-such-flag"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
