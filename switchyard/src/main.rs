use clap::{Parser, Subcommand};
use std::path::Path;
use switchyard_core::conf::{self, BootstrapConfig};
use switchyard_core::logging::init_logging;
use switchyard_core::server;

#[derive(Parser, Debug)]
#[command(
    name = "switchyard",
    version,
    about = "Switchyard: dynamic Pingora-based reverse proxy"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy (default)
    Run {
        /// Path to the bootstrap JSON config; without it the proxy starts
        /// empty and is driven entirely through the control plane
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let config_path = match cli.command {
        Some(Command::Run { config }) => config,
        None => None,
    };

    let mut config = match config_path {
        Some(path) => conf::load_bootstrap(Path::new(&path))
            .expect("Failed to load Switchyard bootstrap config"),
        None => BootstrapConfig::default(),
    };
    conf::apply_env(&mut config.server);

    server::run(config).expect("Failed to start Switchyard server");
}
