use clap::Parser;
use hubbridge::{app, cli::Args, logger, settings};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match settings::load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::setup_logger(&settings.logging) {
        eprintln!("Warning: Failed to initialize logger: {e}");
    }

    log::info!("Starting hubbridge v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = app::run(settings).await {
        log::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
