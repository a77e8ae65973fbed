//! devfence - per-device IP blocking and DNS overrides for Linux gateways.

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use devfence::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // usage errors share the exit code of every other failure
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Ip { action } => devfence::commands::ip::run(action, &cli.config).await,
        Commands::Dns { action } => devfence::commands::dns::run(action, &cli.config).await,
        Commands::Init => devfence::commands::init::run(&cli.config).await,
        Commands::Version => {
            println!("devfence {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
