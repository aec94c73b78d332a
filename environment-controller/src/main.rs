use anyhow::Context as _;
use clap::{Parser, Subcommand};
use environment_controller::{config::Config, controller, crd::Environment};
use kube::{Client, CustomResourceExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Provisions development environments on crossplane clusters")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: Config,

    /// Tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = "info,kube=warn")]
    log_filter: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the controller (default)
    Run,
    /// Print the Environment CustomResourceDefinition as yaml
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command == Some(Command::Crd) {
        print!("{}", serde_yaml::to_string(&Environment::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).context("invalid log filter")?)
        .init();

    // an already installed provider is fine
    #[cfg(feature = "rustls-tls")]
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = Client::try_default()
        .await
        .context("failed to infer kubernetes configuration")?;
    controller::run(client, cli.config)
        .await
        .context("environment controller failed")?;
    Ok(())
}
