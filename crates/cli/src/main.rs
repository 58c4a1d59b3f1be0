use chanpool_core::{config::LoggingConfig, logging::init_logging};
use clap::{Parser, Subcommand};

mod commands;
use commands::{handle_config_command, run_simulation, ConfigCommands, SimulateOptions};

#[derive(Parser)]
#[command(name = "chanpool-cli")]
#[command(about = "Chanpool CLI - configuration checks and simulated runs of the RPC channel pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level for chanpool crates (overridden by `RUST_LOG`)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Drive a pool of simulated channels and print its metrics
    Simulate {
        /// Path to config file (defaults to config/chanpool.toml)
        #[arg(short, long, default_value = "config/chanpool.toml")]
        file: String,

        /// Number of calls to issue
        #[arg(short, long, default_value = "1000")]
        calls: usize,

        /// Number of distinct affinity keys (0 = no affinity)
        #[arg(short, long, default_value = "16")]
        keys: usize,

        /// Number of calls in flight at once
        #[arg(long, default_value = "64")]
        concurrency: usize,

        /// Move this channel to TRANSIENT_FAILURE halfway through the run
        #[arg(long)]
        fail_channel: Option<usize>,

        /// Let calls on this channel time out without any response
        #[arg(long)]
        unresponsive_channel: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let logging = LoggingConfig { level: cli.log_level, ..LoggingConfig::default() };
    init_logging(&logging)?;

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }

        Commands::Simulate {
            file,
            calls,
            keys,
            concurrency,
            fail_channel,
            unresponsive_channel,
        } => {
            let options = SimulateOptions {
                config_file: file,
                calls,
                keys,
                concurrency,
                fail_channel,
                unresponsive_channel,
            };

            run_simulation(options).await?;
        }
    }

    Ok(())
}
