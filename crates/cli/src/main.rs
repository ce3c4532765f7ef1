// Parallel CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Controller settings come from PARALLEL_* env vars (and .env), overridden by flags.
// Design Decision: Results go to stdout, logs and per-item errors to stderr.

mod client;
mod commands;
mod output;
mod telemetry;

use std::time::Duration;

use clap::{Parser, Subcommand};
use parallel::ControllerConfig;

#[derive(Parser)]
#[command(name = "parallel-cli")]
#[command(about = "Run work with bounded parallelism")]
#[command(version)]
pub struct Cli {
    /// Maximum number of concurrent calls (defaults to PARALLEL_CONCURRENCY or 10)
    #[arg(long, short, global = true)]
    pub concurrency: Option<usize>,

    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate ages for names using the agify.io API
    Agify {
        /// Names to look up
        #[arg(required = true)]
        names: Vec<String>,

        /// API base URL
        #[arg(long, env = "AGIFY_API_URL", default_value = "https://api.agify.io")]
        api_url: String,
    },

    /// Run a synthetic sleeping operation and report throughput
    Simulate {
        /// Number of inputs to submit
        #[arg(long, default_value = "100")]
        inputs: u64,

        /// Duration of each call in milliseconds
        #[arg(long, default_value = "10")]
        delay_ms: u64,

        /// Fail every Nth input (0 disables failures)
        #[arg(long, default_value = "0")]
        fail_every: u64,
    },
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        let config = ControllerConfig::from_env();
        match self.concurrency {
            Some(concurrency) => config.with_concurrency(concurrency),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    telemetry::init_logging();

    let cli = Cli::parse();
    let config = cli.controller_config();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Agify { names, api_url } => {
            let client = client::AgifyClient::new(&api_url);
            commands::agify::run(client, output_format, cli.quiet, names, config).await
        }
        Commands::Simulate {
            inputs,
            delay_ms,
            fail_every,
        } => {
            let params = commands::simulate::SimulateParams {
                inputs,
                delay: Duration::from_millis(delay_ms),
                fail_every,
            };
            commands::simulate::run(output_format, params, config).await
        }
    }
}
