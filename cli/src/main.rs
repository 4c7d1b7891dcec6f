/*!

This is the command line interface for composing the desired state of an EKS cluster from a
cluster configuration file.

!*/

mod config;
mod kubeconfig;
mod plan;
mod validate;

use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

/// Compose the resources of an EKS cluster without creating them.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Compose a cluster and print its resource graph or its outputs.
    Plan(plan::Plan),
    /// Check a cluster configuration without talking to AWS.
    Validate(validate::Validate),
    /// Render the kubeconfig of a cluster.
    Kubeconfig(kubeconfig::RenderKubeconfig),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Plan(plan) => plan.run().await,
        Command::Validate(validate) => validate.run().await,
        Command::Kubeconfig(kubeconfig) => kubeconfig.run().await,
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use the default level for our crates and Error for the
            // AWS SDK and everything else.
            Builder::new()
                .filter_level(LevelFilter::Error)
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("eks_composer"), level)
                .filter(Some("eks_model"), level)
                .init();
        }
    }
}
