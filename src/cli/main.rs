use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fare-cli")]
#[command(about = "Fare Predictor CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "FARE_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Run a training pass against a source in the server's data directory
    Train {
        #[arg(value_name = "SOURCE")]
        source: String,
    },

    /// Show the current training stage and last outcome
    Status,

    /// Predict the fare for one trip
    Predict {
        /// Request body as inline JSON
        #[arg(short, long, conflicts_with = "file")]
        json: Option<String>,

        /// Request body read from a JSON file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List committed versions of a bundle
    Artifacts {
        #[arg(value_name = "NAME", default_value = "default")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    let response = match cli.command {
        Commands::Health => client.get(format!("{}/health", cli.endpoint)).send().await?,

        Commands::Train { source } => {
            client
                .post(format!("{}/v1/train", cli.endpoint))
                .json(&json!({ "source": source }))
                .send()
                .await?
        }

        Commands::Status => {
            client
                .get(format!("{}/v1/training/status", cli.endpoint))
                .send()
                .await?
        }

        Commands::Predict { json, file } => {
            let raw = match (json, file) {
                (Some(inline), _) => inline,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("one of --json or --file is required"),
            };
            let body: serde_json::Value =
                serde_json::from_str(&raw).context("Request body is not valid JSON")?;

            client
                .post(format!("{}/v1/predict", cli.endpoint))
                .json(&body)
                .send()
                .await?
        }

        Commands::Artifacts { name } => {
            client
                .get(format!("{}/v1/artifacts/{}", cli.endpoint, name))
                .send()
                .await?
        }
    };

    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
