use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};
use warden::authz::types::CheckResponse;
use warden::authz::Enforcer;
use warden::{settings, web};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Model/policy driven authorization gate"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "warden.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gate (default)
    Serve,
    /// Decide a single request and print the result as JSON
    Check {
        subject: String,
        object: String,
        action: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    let enforcer = Enforcer::from_files(&settings.authz.model_path, &settings.authz.policy_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => web::serve(settings, Arc::new(enforcer)).await?,
        Command::Check {
            subject,
            object,
            action,
        } => {
            let allowed = enforcer.enforce(&subject, &object, &action)?;
            let out = serde_json::to_string(&CheckResponse { allowed }).into_diagnostic()?;
            println!("{out}");
        }
    }
    Ok(())
}
