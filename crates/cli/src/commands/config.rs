use chanpool_core::config::AppConfig;
use clap::Subcommand;
use std::path::Path;

use super::utils::{enabled, print_error, print_info, print_success, print_warning, CliError, CliResult};

pub(crate) const SAMPLE_CONFIG: &str = r#"# Chanpool Configuration
# This is a sample configuration file with sensible defaults

[pool]
max_size = 10
min_size = 0
concurrent_streams_low_watermark = 100
use_round_robin_on_bind = false

[resiliency]
not_ready_fallback_enabled = true
unresponsive_detection_enabled = true
unresponsive_detection_ms = 5000
unresponsive_detection_dropped_count = 3

# Methods that create, use or release affinity keys
[[methods]]
names = ["/google.spanner.v1.Spanner/CreateSession"]
affinity = { command = "BIND", affinity_key = "name" }

[[methods]]
names = ["/google.spanner.v1.Spanner/ExecuteSql", "/google.spanner.v1.Spanner/Commit"]
affinity = { command = "BOUND", affinity_key = "session" }

[[methods]]
names = ["/google.spanner.v1.Spanner/DeleteSession"]
affinity = { command = "UNBIND", affinity_key = "name" }

[metrics]
enabled = true
name_prefix = "chanpool_"
log_interval_seconds = 60

[logging]
level = "info"
format = "pretty"
"#;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file (defaults to config/chanpool.toml)
        #[arg(short, long, default_value = "config/chanpool.toml")]
        file: String,
    },

    /// Show the effective configuration
    Show {
        /// Path to config file (defaults to config/chanpool.toml)
        #[arg(short, long, default_value = "config/chanpool.toml")]
        file: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/chanpool.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

pub(crate) fn load_config(file: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let mut config = load_config(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    let adjustments = config.normalize();
    for adjustment in &adjustments {
        print_warning(adjustment);
    }

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!(
        "  Pool: {}..={} channels, grow at {} streams",
        config.pool.min_size, config.pool.max_size, config.pool.concurrent_streams_low_watermark
    );
    println!("  Fallback: {}", enabled(config.resiliency.not_ready_fallback_enabled));
    println!(
        "  Unresponsive detection: {}",
        enabled(config.resiliency.unresponsive_detection_enabled)
    );
    println!("  Affinity methods: {}", config.method_affinity().len());
    println!("  Metrics: {}", enabled(config.metrics.enabled));

    Ok(())
}

fn show_config(file: &str) -> CliResult<()> {
    let config = load_config(file)?;

    println!("Configuration from {file}:");

    println!("\n[Pool]");
    println!("  Max Size: {}", config.pool.max_size);
    println!("  Min Size: {}", config.pool.min_size);
    println!("  Streams Low Watermark: {}", config.pool.concurrent_streams_low_watermark);
    println!("  Round Robin On Bind: {}", config.pool.use_round_robin_on_bind);

    println!("\n[Resiliency]");
    println!("  Not-Ready Fallback: {}", enabled(config.resiliency.not_ready_fallback_enabled));
    println!(
        "  Unresponsive Detection: {}",
        enabled(config.resiliency.unresponsive_detection_enabled)
    );
    if config.resiliency.unresponsive_detection_enabled {
        println!("    Stall: {}ms", config.resiliency.unresponsive_detection_ms);
        println!("    Dropped Calls: {}", config.resiliency.unresponsive_detection_dropped_count);
    }

    println!("\n[Methods]");
    if config.methods.is_empty() {
        println!("  (none)");
    }
    for method in &config.methods {
        for name in &method.names {
            println!(
                "  {name}: {:?} on '{}'",
                method.affinity.command, method.affinity.affinity_key
            );
        }
    }

    println!("\n[Metrics]");
    println!("  Enabled: {}", config.metrics.enabled);
    println!("  Name Prefix: {}", config.metrics.name_prefix);
    println!("  Log Interval: {}s", config.metrics.log_interval_seconds);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        print_error(&format!("Configuration file already exists: {output}"));
        print_info("Use --force to overwrite");
        return Err(CliError::Config(format!("File already exists: {output}")));
    }

    if let Some(parent) = Path::new(output).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Remember to:");
    print_info("  1. List the affinity methods of your service under [[methods]]");
    print_info("  2. Size the pool for your expected concurrent streams");

    Ok(())
}
