//! `geotrk` - CLI for geotrace
//!
//! This binary runs the telemetry producer and exposes the administrator
//! operations over the shared session registry.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use geotrace::capture::{CaptureEngine, RawFix, ReplaySource};
use geotrace::cli::{AdminCommand, Cli, Command, ConfigCommand, StatusCommand, TrackCommand};
use geotrace::command::CommandChannel;
use geotrace::enrich::Resolver;
use geotrace::events::{EventSink, LogSink, NullSink};
use geotrace::pipeline::{CollectorClient, Pipeline};
use geotrace::session::format_duration;
use geotrace::store::SqliteStore;
use geotrace::tracker::{SourceFactory, Tracker};
use geotrace::{init_logging, AdminView, Config, Registry};

/// How long spawned fire-and-forget notifications get to leave the process
/// before an admin invocation exits.
const NOTIFY_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Track(track_cmd) => handle_track(&config, &track_cmd).await,
        Command::Admin(admin_cmd) => handle_admin(&config, admin_cmd).await,
        Command::Status(status_cmd) => handle_status(&config, &status_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn open_registry(config: &Config) -> anyhow::Result<Registry> {
    let store = SqliteStore::open(config.database_path())?;
    Ok(Registry::new(Arc::new(store)))
}

async fn handle_track(config: &Config, cmd: &TrackCommand) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&cmd.replay)?;
    let fixes: Vec<RawFix> = serde_json::from_str(&raw)?;

    let silent = cmd.silent || config.capture.silent;
    let sink: Arc<dyn EventSink> = if silent {
        Arc::new(NullSink)
    } else {
        Arc::new(LogSink)
    };

    let registry = open_registry(config)?;
    let collector = CollectorClient::new(config.collector.endpoint.as_str(), config.collector_timeout())?;
    let resolver = Resolver::new(config.enrichment.endpoint.as_str(), config.enrichment_timeout())?;
    let pipeline = Pipeline::new(
        collector,
        resolver,
        registry.clone(),
        config.device_info(),
        Arc::clone(&sink),
    );
    let engine = CaptureEngine::new(config.fix_options());
    let commands = CommandChannel::new(config.poll_interval());

    let tracker = Tracker::new(registry, pipeline, engine, commands, sink, silent);

    let interval = config.replay_interval();
    let factory: SourceFactory =
        Box::new(move || Box::new(ReplaySource::new(fixes.clone(), interval)));

    let session = tracker.run(factory).await?;

    if !silent {
        println!(
            "Session {} ended after {} with {} samples.",
            session.user_id(),
            format_duration(session.duration_secs(chrono::Utc::now())),
            session.sample_count()
        );
    }
    Ok(())
}

async fn handle_admin(config: &Config, cmd: AdminCommand) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let collector = CollectorClient::new(config.collector.endpoint.as_str(), config.collector_timeout())?;
    let view = AdminView::new(registry, collector, Arc::new(LogSink));

    match cmd {
        AdminCommand::List {
            active,
            inactive,
            json,
        } => {
            let records = if active {
                view.tracked_users_filtered(true)?
            } else if inactive {
                view.tracked_users_filtered(false)?
            } else {
                view.tracked_users()?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No users currently tracked.");
            } else {
                for record in &records {
                    let status = if record.is_active { "LIVE" } else { "OFFLINE" };
                    println!("{}  [{}]", record.user_id, status);
                    println!("  Location:   {}", record.location_label);
                    println!("  Position:   {}", record.coordinates);
                    println!(
                        "  Duration:   {}",
                        format_duration(record.tracking_duration_seconds)
                    );
                    println!("  Device:     {}", record.device_info);
                    println!(
                        "  Last seen:  {}",
                        record.last_seen.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            return Ok(());
        }
        AdminCommand::Stop { user_id } => {
            view.stop_tracking(&user_id)?;
            println!("Stop requested for {user_id}; honored within one poll period.");
        }
        AdminCommand::StopAll => {
            let stopped = view.stop_all()?;
            println!("Stop requested for {stopped} active session(s).");
        }
        AdminCommand::Resume { user_id } => {
            view.resume_tracking(&user_id);
            println!("Resume notification sent for {user_id} (no producer-side consumer).");
        }
        AdminCommand::Remove { user_id } => {
            if view.remove_user(&user_id)? {
                println!("Removed {user_id} from the registry.");
            } else {
                println!("No record for {user_id}; removal notification sent anyway.");
            }
        }
        AdminCommand::Send { user_id, text } => {
            view.send_custom_command(&user_id, &text)?;
            println!("Command sent to {user_id}.");
        }
        AdminCommand::Clear { yes } => {
            if yes {
                let removed = view.clear_all()?;
                println!("Cleared {removed} tracked record(s).");
            } else {
                println!("This will delete every tracked record and stop flag.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
        }
    }

    // Spawned notifications get a brief window to leave the process.
    tokio::time::sleep(NOTIFY_GRACE).await;
    Ok(())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let records = registry.records()?;
    let active = records.iter().filter(|r| r.is_active).count();

    if cmd.json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "tracked_users": records.len(),
            "active": active,
            "inactive": records.len() - active,
            "collector_endpoint": config.collector.endpoint,
            "poll_interval_secs": config.command.poll_interval_secs,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("geotrk status");
        println!("-------------");
        println!("Registry:      {}", config.database_path().display());
        println!("Tracked users: {} ({} active)", records.len(), active);
        println!("Collector:     {}", config.collector.endpoint);
        println!("Poll period:   {}s", config.command.poll_interval_secs);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Registry]");
                println!("  Database path:    {}", config.database_path().display());
                println!();
                println!("[Capture]");
                println!("  Fix timeout:      {}ms", config.capture.fix_timeout_ms);
                println!("  Max staleness:    {}ms", config.capture.max_staleness_ms);
                println!("  High accuracy:    {}", config.capture.high_accuracy);
                println!("  Silent:           {}", config.capture.silent);
                println!();
                println!("[Enrichment]");
                println!("  Endpoint:         {}", config.enrichment.endpoint);
                println!("  Timeout:          {}ms", config.enrichment.timeout_ms);
                println!();
                println!("[Collector]");
                println!("  Endpoint:         {}", config.collector.endpoint);
                println!("  Timeout:          {}ms", config.collector.timeout_ms);
                println!();
                println!("[Command]");
                println!(
                    "  Poll interval:    {}s",
                    config.command.poll_interval_secs
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
