use std::{io, path::PathBuf, process::ExitCode};

use clap::Parser;
use gemini_smoke::{config, smoke, SmokeOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gemini-smoke")]
#[command(about = "Send one prompt to Gemini and print the response")]
struct Args {
    /// Environment file to load before reading GOOGLE_API_KEY (defaults to .env)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Model to query
    #[arg(long)]
    model: Option<String>,

    /// Prompt to send
    #[arg(long)]
    prompt: Option<String>,

    /// Try each listed model in turn and report success or failure per model
    #[arg(long, num_args = 1..)]
    probe: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Must run before the subscriber: the file may set RUST_LOG.
    let env_file = config::load_env_file(args.env_file.as_deref());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match env_file {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => tracing::debug!("no environment file found"),
        Err(err) => tracing::warn!(error = %err, "failed to load environment file"),
    }

    let options = SmokeOptions {
        model: args.model,
        prompt: args.prompt,
        probe: args.probe,
    };

    let mut stdout = io::stdout().lock();
    match smoke::run_from_env(&options, &mut stdout).await {
        Ok(status) => status.into(),
        Err(err) => {
            tracing::error!(error = %err, "failed to write output");
            ExitCode::FAILURE
        }
    }
}
