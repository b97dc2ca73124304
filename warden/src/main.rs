use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_core::config::LogFormat;
use warden_core::{
    CallSite, Config, ErrorDescriptor, ErrorRecoveryEngine, RecoveryOverrides, RecoveryStrategy,
    TracingNotifier, WardenError, WardenResult,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Error classification and recovery engine", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Classify an error and print the result as JSON
    Classify {
        /// Error message
        #[arg(long)]
        message: String,

        /// Error type name
        #[arg(long, default_value = "Error")]
        type_name: String,

        /// Layer the error was raised in
        #[arg(long)]
        layer: String,

        /// Component the error was raised in
        #[arg(long)]
        component: String,
    },
    /// List classification rules in evaluation order
    Rules,
    /// Validate a configuration file
    CheckConfig {
        /// Path to the configuration file
        path: PathBuf,
    },
    /// Run an operation that fails a number of times through a local engine
    Simulate {
        /// Error message produced by each failure
        #[arg(long)]
        message: String,

        /// Layer of the simulated operation
        #[arg(long)]
        layer: String,

        /// Component of the simulated operation
        #[arg(long)]
        component: String,

        /// Operation name
        #[arg(long, default_value = "simulated")]
        operation: String,

        /// Number of calls that fail before the operation succeeds
        #[arg(long, default_value_t = 1)]
        failures: u32,

        /// Replace the classified recovery strategy
        #[arg(long)]
        strategy: Option<String>,

        /// Replace the classified base retry delay (milliseconds)
        #[arg(long)]
        base_delay_ms: Option<u64>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SimulatedError(String);

fn load_config(path: Option<&PathBuf>) -> WardenResult<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

fn init_logging(config: &Config) -> WardenResult<()> {
    let logging = &config.observability.logging;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("warden={}", logging.level)
            .parse()
            .map_err(|e| WardenError::configuration("logging", format!("Invalid log directive: {}", e)))?,
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> WardenResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_strategy(raw: &str) -> WardenResult<RecoveryStrategy> {
    serde_json::from_value(Value::from(raw))
        .map_err(|_| WardenError::invalid_input("strategy", format!("unknown strategy '{}'", raw)))
}

#[tokio::main]
async fn main() -> WardenResult<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig { path } = &cli.command {
        return match Config::from_file(path) {
            Ok(config) => {
                println!("Configuration OK: {}", path.display());
                println!(
                    "  rules: {}",
                    if config.classifier.rules.is_empty() {
                        "built-in".to_string()
                    } else {
                        config.classifier.rules.len().to_string()
                    }
                );
                println!("  retry max delay: {:?}", config.retry.max_delay);
                println!("  pattern window: {:?}", config.escalation.pattern_window);
                Ok(())
            }
            Err(e) => {
                eprintln!("Configuration invalid: {}", e);
                Err(e)
            }
        };
    }

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config)?;

    match cli.command {
        Commands::Classify {
            message,
            type_name,
            layer,
            component,
        } => {
            let classifier = config.classifier();
            let descriptor = ErrorDescriptor::new(type_name, message);
            let rule = classifier
                .matching_rule(&descriptor, &layer, &component)
                .map(|r| r.name.clone());
            let classification = classifier.classify(&descriptor, &layer, &component, None);
            print_json(&json!({
                "rule": rule,
                "classification": classification,
            }))?;
        }
        Commands::Rules => {
            for (index, rule) in config.classifier().rules().iter().enumerate() {
                println!(
                    "{:>2}. {:<18} {:<18} {:<10} {}",
                    index + 1,
                    rule.name,
                    rule.classification.category.as_str(),
                    rule.classification.severity.as_str(),
                    rule.classification.recovery_strategy.as_str()
                );
            }
        }
        Commands::CheckConfig { .. } => {}
        Commands::Simulate {
            message,
            layer,
            component,
            operation,
            failures,
            strategy,
            base_delay_ms,
        } => {
            let engine = ErrorRecoveryEngine::new(config)?;
            engine.register_notification_handler(Arc::new(TracingNotifier));

            let mut overrides = RecoveryOverrides::new();
            if let Some(raw) = strategy {
                overrides = overrides.strategy(parse_strategy(&raw)?);
            }
            if let Some(ms) = base_delay_ms {
                overrides = overrides.base_delay(Duration::from_millis(ms));
            }

            let site = CallSite::new(layer, component, operation);
            let calls = AtomicU32::new(0);
            let result: Result<Option<u32>, SimulatedError> = engine
                .protect(&site, None, Value::Null, &overrides, || {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    let message = message.clone();
                    async move {
                        if call <= failures {
                            Err(SimulatedError(message))
                        } else {
                            Ok(call)
                        }
                    }
                })
                .await;

            let outcome = match &result {
                Ok(Some(value)) => json!({ "status": "succeeded", "value": value }),
                Ok(None) => json!({ "status": "ignored" }),
                Err(e) => json!({ "status": "failed", "error": e.to_string() }),
            };
            print_json(&json!({
                "outcome": outcome,
                "calls": calls.load(Ordering::SeqCst),
                "health": engine.get_system_health().await?,
                "metrics": engine.metrics().snapshot(),
            }))?;
        }
    }

    Ok(())
}
