#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;

use lsd_relay::config;
use lsd_relay::manager::ServiceManager;
use lsd_relay::shutdown::ShutdownBus;

/// The LSD relay command-line tool
///
/// Start the relay from a config file:
///
///     $ lsd-relay -vvv start -c <CONFIG_FILE_PATH>
#[derive(StructOpt)]
#[structopt(name = "lsd-relay")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(StructOpt)]
enum Command {
    /// Run the relay daemon.
    Start {
        /// File that contains configuration.
        #[structopt(
            short = "c",
            long = "config-filename",
            value_name = "PATH",
            parse(from_os_str)
        )]
        config_filename: PathBuf,
    },
    /// Print version information.
    Version,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    let config_filename = match args.command {
        Some(Command::Version) => {
            println!("lsd-relay {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Command::Start { config_filename }) => config_filename,
        None => {
            Opts::clap().print_long_help()?;
            println!();
            return Ok(());
        }
    };

    let config = config::load(&config_filename)?;
    let shutdown = ShutdownBus::new();
    let manager = Arc::new(ServiceManager::new(config, shutdown.clone()).await?);
    manager.start().await?;
    tracing::info!("relay started");

    let mut fatal = shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    tracing::warn!("shutting down...");
                    manager.stop().await;
                    tracing::info!("clean exit");
                    Ok(())
                }
                Err(err) => {
                    tracing::error!("unable to listen for shutdown signal: {}", err);
                    manager.stop().await;
                    std::process::exit(1);
                }
            }
        }
        _ = fatal.recv() => {
            tracing::error!("fatal error reported, shutting down");
            manager.stop().await;
            anyhow::bail!("relay stopped on a fatal error")
        }
    }
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("lsd_relay={}", log_level).parse()?);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}
