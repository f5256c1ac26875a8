//! TourFeed - resilient realtime subscriptions
//!
//! CLI entry point for watching tables and inspecting retry settings.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tourfeed::cli::{Cli, Command, ConfigFormat, OutputFormat};
use tourfeed::config::{ChannelSpec, Config};
use tourfeed::{
    BackoffStrategy, DataChange, ManagerConfig, ManagerEvent, SsePlatform, SubscriptionManager, SubscriptionRequest,
};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tourfeed")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Log to file so stdout stays clean for event output
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("tourfeed.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "TourFeed loaded config: base-url={}, channels={}",
        config.platform.base_url,
        config.channels.len()
    );

    match cli.command {
        Command::Watch {
            table,
            filter,
            channel,
            format,
        } => {
            let specs = match table {
                Some(table) => vec![ChannelSpec {
                    name: channel.unwrap_or_else(|| table.clone()),
                    table,
                    filter,
                }],
                None => config.channels.clone(),
            };
            watch(&config, specs, format).await
        }
        Command::Backoff => {
            print_backoff(&config.realtime);
            Ok(())
        }
        Command::Config { format } => print_config(&config, format),
    }
}

async fn watch(config: &Config, specs: Vec<ChannelSpec>, format: OutputFormat) -> Result<()> {
    if specs.is_empty() {
        eyre::bail!("Nothing to watch: pass --table or list channels in the config file");
    }
    config.validate().context("Invalid configuration")?;

    let platform = SsePlatform::from_config(&config.platform).context("Failed to create realtime platform")?;
    let manager = SubscriptionManager::spawn(config.realtime.clone(), Arc::new(platform));
    let mut events = manager.events();

    for spec in specs {
        let name = spec.name.clone();
        let mut request = SubscriptionRequest::new(&spec.name, &spec.table, move |change| {
            print_change(&name, &change, format);
            Ok(())
        });
        if let Some(filter) = spec.filter {
            request = request.with_filter(filter);
        }
        info!(channel = %spec.name, table = %spec.table, "Watching");
        manager.subscribe(request).await;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, format),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn print_change(channel: &str, change: &DataChange, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = match change {
                DataChange::Live(event) => serde_json::json!({ "channel": channel, "change": event }),
                DataChange::Refresh(reason) => serde_json::json!({ "channel": channel, "refresh": reason }),
            };
            println!("{}", value);
        }
        OutputFormat::Text => match change {
            DataChange::Live(event) => {
                let record = if event.record.is_null() {
                    event.old_record.clone().unwrap_or_default()
                } else {
                    event.record.clone()
                };
                println!(
                    "{} {} {} {}",
                    channel.bold(),
                    event.kind.to_string().green(),
                    event.table.cyan(),
                    record
                );
            }
            DataChange::Refresh(reason) => {
                println!("{} {} ({:?})", channel.bold(), "refresh".yellow(), reason);
            }
        },
    }
}

fn print_event(event: &ManagerEvent, format: OutputFormat) {
    if format == OutputFormat::Json {
        match serde_json::to_string(event) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
        return;
    }

    let label = match event {
        ManagerEvent::Subscribed { .. } | ManagerEvent::CircuitReset { .. } => event.event_type().green(),
        ManagerEvent::ChannelError { .. } | ManagerEvent::CircuitOpened { .. } | ManagerEvent::CallbackFailed { .. } => {
            event.event_type().red()
        }
        ManagerEvent::RetryScheduled { .. } | ManagerEvent::SubscribeSkipped { .. } | ManagerEvent::PollRefresh { .. } => {
            event.event_type().yellow()
        }
        _ => event.event_type().dimmed(),
    };

    let detail = match event {
        ManagerEvent::ChannelError { error, retry_count, .. } => format!("{} (retries so far: {})", error, retry_count),
        ManagerEvent::RetryScheduled { attempt, delay_ms, .. } => format!("attempt {} in {} ms", attempt, delay_ms),
        ManagerEvent::CircuitOpened { cooldown_ms, .. } => format!("cooldown {} ms", cooldown_ms),
        ManagerEvent::CircuitReset { reason, .. } => reason.to_string(),
        ManagerEvent::SubscribeSkipped { reason, .. } => reason.clone(),
        ManagerEvent::CallbackFailed { error, .. } => error.clone(),
        ManagerEvent::FeedOpened { generation, .. } => format!("generation {}", generation),
        _ => String::new(),
    };

    println!("{} {} {}", format!("[{}]", event.channel()).dimmed(), label, detail);
}

fn print_backoff(config: &ManagerConfig) {
    let retry = &config.retry;
    let strategy = match retry.strategy {
        BackoffStrategy::Table => "table",
        BackoffStrategy::Exponential => "exponential",
    };
    println!("{}", format!("Retry schedule ({}, max {} retries)", strategy, retry.max_retries).bold());
    for (i, delay) in retry.schedule().iter().enumerate() {
        println!("  attempt {}: {} ms", i + 1, delay.as_millis());
    }
    if let Some(cap) = retry.max_delay_ms {
        println!("  capped at {} ms", cap);
    }

    println!("Circuit breaker cooldown: {} s", config.cooldown_secs);
    if config.polling_enabled {
        println!("Polling fallback: every {} s", config.poll_interval().as_secs());
    } else {
        println!("Polling fallback: disabled");
    }
    let health = &config.health_check;
    if health.enabled {
        println!(
            "Health check: every {} s, resets open circuits at {:.0}% failing of >= {} channels",
            health.interval().as_secs(),
            health.error_rate_threshold * 100.0,
            health.min_channels
        );
    } else {
        println!("Health check: disabled");
    }
}

fn print_config(config: &Config, format: ConfigFormat) -> Result<()> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).context("Failed to render config as YAML")?,
        ConfigFormat::Json => serde_json::to_string_pretty(config).context("Failed to render config as JSON")?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
