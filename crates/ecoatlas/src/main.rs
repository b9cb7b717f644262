//! `ecoatlas` - CLI for the EcoAtlas report queue
//!
//! This binary records sightings and alerts into the local queue, flushes the
//! queue to the backend, and fetches map overlays.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use clap::Parser;

use ecoatlas::cli::{
    Cli, Command, ConfigCommand, MapCommand, OutputFormat, PendingCommand, ReportCommand,
};
use ecoatlas::map::{FeatureCollection, LayerFilter, MapLayers};
use ecoatlas::sync::{SubmitMode, SubmitOutcome, SyncSummary};
use ecoatlas::{
    init_logging, BackendClient, Config, GeoPoint, PendingReport, ReportStore, Synchronizer,
};

/// Description width in table output.
const SUMMARY_WIDTH: usize = 48;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Report(cmd) => handle_report(&config, cmd).await,
        Command::Pending(cmd) => handle_pending(&config, &cmd),
        Command::Sync(cmd) => handle_sync(&config, cmd.json).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Discard(cmd) => handle_discard(&config, cmd.id),
        Command::Upload(cmd) => {
            let client = backend(&config)?;
            let url = client.upload_image_file(&cmd.file).await?;
            println!("{url}");
            Ok(())
        }
        Command::Map(cmd) => handle_map(&config, cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<ReportStore> {
    let path = config.database_path();
    ReportStore::open(&path).with_context(|| format!("opening queue at {}", path.display()))
}

fn backend(config: &Config) -> anyhow::Result<BackendClient> {
    BackendClient::from_config(&config.remote)
        .context("set remote.url and remote.anon_key (or ECOATLAS_REMOTE__URL/__ANON_KEY)")
}

fn synchronizer(config: &Config) -> anyhow::Result<Synchronizer<BackendClient>> {
    Ok(Synchronizer::new(backend(config)?)
        .with_user_id(config.remote.user_id.clone())
        .with_idempotency_key(config.sync.idempotency_key))
}

async fn handle_report(config: &Config, cmd: ReportCommand) -> anyhow::Result<()> {
    let location = GeoPoint::new(cmd.lat, cmd.lng)?;
    let mut report = match cmd.alert {
        Some(level) => PendingReport::alert(cmd.description, location, level.into()),
        None => PendingReport::observation(cmd.description, location, cmd.species),
    };
    if let Some(image) = cmd.image {
        report = report.with_image(image);
    }

    let store = open_store(config)?;
    let online = !cmd.offline && config.sync.submit_immediately;
    let outcome = if online && config.has_remote() {
        synchronizer(config)?
            .submit(&store, &report, SubmitMode::Online)
            .await?
    } else {
        if online {
            tracing::info!("No backend configured, queueing report");
        }
        let id = store.enqueue(&report)?;
        SubmitOutcome::Queued { id, reason: None }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    match outcome {
        SubmitOutcome::Submitted => println!("{} submitted.", report.kind),
        SubmitOutcome::Queued { id, reason: None } => {
            println!("{} queued as #{id}. Run `ecoatlas sync` when online.", report.kind);
        }
        SubmitOutcome::Queued {
            id,
            reason: Some(reason),
        } => {
            println!("Could not submit ({reason}).");
            println!("{} kept as #{id} for the next sync.", report.kind);
        }
    }
    Ok(())
}

fn handle_pending(config: &Config, cmd: &PendingCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let reports = store.list_pending()?;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Plain => {
            for report in &reports {
                println!(
                    "#{} {} [{}] {}",
                    report.id.unwrap_or_default(),
                    report.kind,
                    report.location,
                    report.description
                );
            }
        }
        OutputFormat::Table => {
            if reports.is_empty() {
                println!("No pending reports.");
                return Ok(());
            }
            println!(
                "{:>5}  {:<11}  {:<8}  {:<16}  {}",
                "ID", "TYPE", "LEVEL", "CREATED", "DESCRIPTION"
            );
            for report in &reports {
                println!(
                    "{:>5}  {:<11}  {:<8}  {:<16}  {}",
                    report.id.unwrap_or_default(),
                    report.kind.to_string(),
                    report.alert_level.to_string(),
                    report.created_at.format("%Y-%m-%d %H:%M"),
                    report.summary(SUMMARY_WIDTH)
                );
            }
        }
    }
    Ok(())
}

async fn handle_sync(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let summary = if store.count()? == 0 {
        // Nothing to send, so no backend is needed
        SyncSummary::default()
    } else {
        synchronizer(config)?.sync(&store).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if !summary.is_complete() {
        bail!("{} report(s) remain queued", summary.failed.len());
    }
    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    if summary.is_noop() {
        println!("Nothing to sync.");
        return;
    }
    println!(
        "Synced {} of {} report(s).",
        summary.synced.len(),
        summary.attempted
    );
    for failure in &summary.failed {
        let hint = if failure.retryable { "will retry" } else { "check or discard" };
        println!("  #{}: {} ({hint})", failure.id, failure.error);
    }
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": store.path(),
            "remote_configured": config.has_remote(),
            "queue": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("ecoatlas status");
        println!("---------------");
        println!("Database:      {}", store.path().display());
        println!(
            "Backend:       {}",
            config.remote.url.as_deref().unwrap_or("not configured")
        );
        println!("Pending:       {}", stats.total_pending);
        println!("  alerts:      {}", stats.alerts_pending);
        if let Some(oldest) = stats.oldest_report {
            println!("Oldest:        {}", oldest.format("%Y-%m-%d %H:%M UTC"));
        }
        println!("Size:          {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_discard(config: &Config, id: i64) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if !store.delete(id)? {
        bail!("no pending report #{id}");
    }
    println!("Discarded #{id}.");
    Ok(())
}

async fn handle_map(config: &Config, cmd: MapCommand) -> anyhow::Result<()> {
    let client = backend(config)?;
    let (layers, json) = match cmd {
        MapCommand::Areas { json } => {
            let areas = client.protected_areas_geojson().await?;
            let layers = MapLayers::build(&areas, &FeatureCollection::default());
            (layers.filtered(LayerFilter::Parks), json)
        }
        MapCommand::Observations { json } => {
            let observations = client.verified_observations_geojson().await?;
            let layers = MapLayers::build(&[], &observations);
            (layers.filtered(LayerFilter::Species), json)
        }
    };

    if json {
        let output = serde_json::json!({
            "view": config.map_view(),
            "layers": layers,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for area in &layers.areas {
        let points: usize = area.rings.iter().map(Vec::len).sum();
        println!(
            "{} ({}): {} polygon(s), {points} point(s)",
            area.name,
            area.color,
            area.rings.len()
        );
    }
    for marker in &layers.markers {
        println!(
            "{:.5}, {:.5}  {}  {}",
            marker.position.lat(),
            marker.position.lng(),
            marker.icon.color(),
            marker.label
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Remote]");
                println!(
                    "  URL:                {}",
                    config.remote.url.as_deref().unwrap_or("-")
                );
                println!(
                    "  Anon key:           {}",
                    if config.remote.anon_key.is_some() { "set" } else { "-" }
                );
                println!(
                    "  User id:            {}",
                    config.remote.user_id.as_deref().unwrap_or("-")
                );
                println!("  Bucket:             {}", config.remote.bucket);
                println!("  Timeout (s):        {}", config.remote.timeout_secs);
                println!();
                println!("[Sync]");
                println!("  Idempotency key:    {}", config.sync.idempotency_key);
                println!("  Submit immediately: {}", config.sync.submit_immediately);
                println!();
                println!("[Map]");
                println!(
                    "  Center:             {}, {}",
                    config.map.center_lat, config.map.center_lng
                );
                println!("  Zoom:               {}", config.map.zoom);
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
