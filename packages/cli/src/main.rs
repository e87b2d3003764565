#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for the animal watch marker feed.
//!
//! ```text
//! animal_watch config
//! animal_watch nearby [--lat 44.81 --lon 20.46] [--severity danger] [--owner ana] [--tag Dog]
//! animal_watch walk [--steps 5] [--step-meters 400]
//! animal_watch lookup [--foreground] [--events 2]
//! animal_watch scenario
//! animal_watch leaderboard [--limit 10]
//! ```
//!
//! Every command runs against a fresh in-memory store seeded with sample
//! sightings around the given position. Set `RUST_LOG=debug` to follow
//! subscriptions and transactions.

mod demo;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use animal_watch_filter::{FilterCriteria, apply_filters};
use animal_watch_geohash::{GeoPoint, distance_meters};
use animal_watch_live_view::area::REACH_METERS;
use animal_watch_live_view::{LiveView, markers_in_area, within_reach};
use animal_watch_lookup::{LookupMode, LookupScheduler};
use animal_watch_marker_models::{MarkerDraft, MarkerSeverity, UserStats, WatchMarker};
use animal_watch_platform::LocationProvider;
use animal_watch_platform::local::{ChannelNotificationSink, ManualLocation};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::demo::{Demo, offset};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "animal_watch", about = "Explore a simulated animal watch feed")]
struct Cli {
    /// TOML settings file; the embedded defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct Position {
    /// Observer latitude
    #[arg(long, default_value = "44.8125", allow_hyphen_values = true)]
    lat: f64,
    /// Observer longitude
    #[arg(long, default_value = "20.4612", allow_hyphen_values = true)]
    lon: f64,
}

impl Position {
    fn point(self) -> Result<GeoPoint, animal_watch_geohash::GeoHashError> {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective settings as TOML
    Config,
    /// List markers around a position, optionally filtered
    Nearby {
        #[command(flatten)]
        position: Position,
        /// Search radius in meters (defaults to the configured radius)
        #[arg(long)]
        radius: Option<f64>,
        /// Only show these severities (info, warning, danger)
        #[arg(long, value_parser = parse_severity)]
        severity: Vec<MarkerSeverity>,
        /// Only show markers whose owner name contains this text
        #[arg(long)]
        owner: Option<String>,
        /// Only show markers carrying all of these tags
        #[arg(long)]
        tag: Vec<String>,
        /// Only show markers created in the last N days
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Walk north and follow the live view as it resubscribes
    Walk {
        #[command(flatten)]
        position: Position,
        /// Number of steps
        #[arg(long, default_value = "5")]
        steps: u32,
        /// Length of each step in meters
        #[arg(long, default_value = "400")]
        step_meters: f64,
    },
    /// Run the background lookup until it raises some events
    Lookup {
        #[command(flatten)]
        position: Position,
        /// Use the foreground interval instead of the background one
        #[arg(long)]
        foreground: bool,
        /// Number of events to wait for
        #[arg(long, default_value = "1")]
        events: usize,
    },
    /// Update, appraise and remove a marker, printing stats along the way
    Scenario {
        #[command(flatten)]
        position: Position,
    },
    /// Show the top contributors
    Leaderboard {
        #[command(flatten)]
        position: Position,
        /// How many contributors to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn parse_severity(value: &str) -> Result<MarkerSeverity, String> {
    value
        .to_uppercase()
        .parse::<MarkerSeverity>()
        .ok()
        .filter(|severity| MarkerSeverity::selectable().contains(severity))
        .ok_or_else(|| format!("unknown severity '{value}' (expected info, warning or danger)"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => print!("{}", settings.to_toml()?),
        Commands::Nearby {
            position,
            radius,
            severity,
            owner,
            tag,
            days,
        } => {
            let center = position.point()?;
            let radius = settings
                .live_view
                .check_radius(radius.unwrap_or(settings.live_view.radius_meters))?;

            let demo = Demo::new(&settings);
            demo.seed(center).await?;

            let found = markers_in_area(demo.store.as_ref(), center, radius).await?;
            let mut criteria = FilterCriteria::last_days(Utc::now(), days)
                .with_severities(severity)
                .with_tags(tag);
            if let Some(owner) = owner {
                criteria = criteria.with_owner(owner);
            }
            let shown = apply_filters(&found, &criteria);

            print_markers(center, &shown);
            println!("\n{} of {} marker(s) within {radius} m", shown.len(), found.len());
        }
        Commands::Walk {
            position,
            steps,
            step_meters,
        } => {
            let start = position.point()?;
            let demo = Demo::new(&settings);
            demo.seed(start).await?;

            let view = LiveView::new(demo.store(), settings.live_view.clone())?;
            for step in 0..=steps {
                let here = offset(start, f64::from(step) * step_meters, 0.0)?;
                let moved = view.update_location(here).await?;
                let markers = view.refresh().await?;
                println!(
                    "step {step}: {} marker(s), {} range(s), epoch {}{}",
                    markers.len(),
                    view.subscription_count(),
                    view.snapshot().epoch,
                    if moved { "" } else { " (coalesced)" },
                );
            }
            view.stop();
        }
        Commands::Lookup {
            position,
            foreground,
            events,
        } => {
            let center = position.point()?;
            let demo = Demo::new(&settings);
            demo.seed(center).await?;

            let mode = if foreground {
                LookupMode::Foreground
            } else {
                LookupMode::Background
            };
            let (sink, mut rx) = ChannelNotificationSink::new();
            let scheduler = LookupScheduler::spawn(
                demo.store(),
                Arc::new(ManualLocation::at(center)) as Arc<dyn LocationProvider>,
                Arc::new(sink),
                settings.lookup,
                mode,
            );
            println!(
                "Looking up every {:?} in {mode} mode",
                settings.lookup.interval(mode)
            );
            for _ in 0..events {
                let Some(event) = rx.recv().await else {
                    break;
                };
                println!("event: {}", event.as_ref());
                if let animal_watch_platform::LookupEvent::Nearby { count } = event {
                    println!("  {count} marker(s) within {} m", settings.lookup.proximity_meters);
                }
            }
            scheduler.shutdown().await;
        }
        Commands::Scenario { position } => run_scenario(&settings, position.point()?).await?,
        Commands::Leaderboard { position, limit } => {
            let demo = Demo::new(&settings);
            demo.seed(position.point()?).await?;
            print_leaderboard(&demo.service.top_contributors(limit).await?);
        }
    }

    Ok(())
}

async fn run_scenario(
    settings: &Settings,
    center: GeoPoint,
) -> Result<(), Box<dyn std::error::Error>> {
    let demo = Demo::new(settings);
    let seeded = demo.seed(center).await?;
    let Some(base) = seeded.first() else {
        return Ok(());
    };
    println!("base: {} by {}", base.title, base.owner_user_name);

    demo.act_as("marko");
    let update = demo
        .service
        .update_marker(
            &base.id,
            MarkerDraft {
                description: "The dog was taken to the vet".to_string(),
                severity: MarkerSeverity::Info,
                image: Some(base.image_uri.clone()),
                ..MarkerDraft::default()
            },
        )
        .await?;
    println!(
        "update #{} by {} supersedes {}",
        update.position_in_thread, update.owner_user_name, base.id
    );

    demo.act_as("jovana");
    let observer = offset(center, 30.0, 0.0)?;
    if within_reach(&update, observer, REACH_METERS) {
        let toggle = demo.service.appraise_marker(&update.id).await?;
        println!("jovana appraisal: {toggle}");
        let toggle = demo.service.see_marker(&update.id).await?;
        println!("jovana seen: {toggle}");
    } else {
        println!("jovana is too far away to appraise");
    }

    print_leaderboard(&demo.service.top_contributors(10).await?);

    demo.act_as("marko");
    demo.service.remove_marker(&update.id).await?;
    if let Some(restored) = demo.service.get_marker(&base.id).await? {
        println!("\nupdate removed; base is {} again", restored.state);
    }

    print_leaderboard(&demo.service.top_contributors(10).await?);
    Ok(())
}

fn print_markers(center: GeoPoint, markers: &[WatchMarker]) {
    println!(
        "{:<8} {:<8} {:<10} {:<32} TAGS",
        "DIST", "SEVERITY", "OWNER", "TITLE"
    );
    println!("{}", "-".repeat(80));
    for marker in markers {
        println!(
            "{:<8} {:<8} {:<10} {:<32} {}",
            format!("{:.0} m", distance_meters(center, marker.position())),
            marker.severity,
            marker.owner_user_name,
            marker.title,
            marker.tags.join(", ")
        );
    }
}

fn print_leaderboard(top: &[(String, UserStats)]) {
    println!(
        "\n{:<10} {:>7} {:>7} {:>10} {:>6}",
        "USER", "CREATED", "UPDATED", "APPRAISALS", "TOTAL"
    );
    for (user_id, stats) in top {
        println!(
            "{:<10} {:>7} {:>7} {:>10} {:>6}",
            user_id,
            stats.markers_created_count,
            stats.markers_updated_count,
            stats.total_appraisals,
            stats.total
        );
    }
}
