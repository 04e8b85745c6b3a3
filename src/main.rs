use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use ratioscope::config::Config;
use ratioscope::engine::{Engine, EnrichOutcome};
use ratioscope::store::models::{RatioFilter, RatioRecord, SortOrder};
use ratioscope::xapi::client::XApiClient;

/// Ratioscope: ratio discovery and tracking for X.
///
/// Finds replies that dramatically out-like the posts they answer,
/// classifies how badly, and keeps a rolling 48-hour window of the
/// carnage.
#[derive(Parser)]
#[command(name = "ratioscope", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one poll/enrichment cycle and print the results
    Poll {
        /// Emit the outcome as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Poll continuously at the configured interval
    Watch,

    /// Track a user and fetch their ratios (both directions)
    Enrich {
        /// The username to enrich (without the @)
        username: String,
    },

    /// Show engine configuration and status
    Status {
        /// Emit status and stats as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ratioscope=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Poll { json } => {
            config.require_token()?;
            let engine = build_engine(&config)?;

            let outcome = engine.poll().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            println!(
                "Poll complete: {} new ratios ({} total in window)",
                outcome.new_ratios, outcome.total_ratios
            );

            let top = engine.query(&RatioFilter {
                sort: SortOrder::Severity,
                limit: Some(10),
                ..Default::default()
            });
            if !top.is_empty() {
                println!("\nWorst of the window:");
                for record in &top {
                    print_record(record);
                }
            }
        }

        Commands::Watch => {
            config.require_token()?;
            let engine = build_engine(&config)?;
            engine.set_on_update(Box::new(|| {
                info!("Store updated — push layer would rebroadcast here");
            }));

            engine.run_scheduled().await;
        }

        Commands::Enrich { username } => {
            config.require_token()?;
            let engine = build_engine(&config)?;

            match engine.enrich_user(&username).await? {
                EnrichOutcome::NotFound => {
                    println!("{}", format!("No such user: @{username}").yellow());
                }
                EnrichOutcome::Enriched {
                    enriched,
                    total_tracked,
                } => {
                    println!(
                        "Enriched @{username}: {enriched} ratios found/updated \
                         ({total_tracked} users tracked)"
                    );
                    let theirs = engine.query(&RatioFilter {
                        username: Some(username.clone()),
                        sort: SortOrder::Severity,
                        ..Default::default()
                    });
                    for record in &theirs {
                        print_record(record);
                    }
                }
            }
        }

        Commands::Status { json } => {
            let engine = build_engine(&config)?;
            let status = engine.status();
            let stats = engine.stats();

            if json {
                let report = serde_json::json!({
                    "status": status,
                    "stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("Poll interval: {}s", status.interval_ms / 1000);
            println!("Search floor: {} likes", config.search_min_likes);
            println!("Enrichment floor: {} likes", config.enrich_min_likes);
            println!("Retention: {}h", config.retention_hours);
            match &config.tracked_file {
                Some(path) => println!(
                    "Tracked users: {} (mirrored to {})",
                    stats.tracked_users,
                    path.display()
                ),
                None => println!("Tracked users: {} (not mirrored)", stats.tracked_users),
            }
            if config.bearer_token.is_empty() {
                println!("{}", "X_BEARER_TOKEN not set — network commands will fail".yellow());
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<Arc<Engine>> {
    let client = XApiClient::new(&config.api_base_url, &config.bearer_token)?;
    Ok(Arc::new(Engine::new(Arc::new(client), config)?))
}

fn print_record(record: &RatioRecord) {
    let marker = if record.is_lethal {
        "LETHAL".red().bold()
    } else if record.is_brutal {
        "BRUTAL".red()
    } else {
        "RATIO ".yellow()
    };

    println!(
        "  {} {:>7.1}x  @{} ({} likes) \u{2190} @{} ({} likes)",
        marker,
        record.ratio,
        record.parent.author,
        record.parent.likes,
        record.reply.author,
        record.reply.likes
    );
    println!("          {}", truncate(&record.parent.text, 80).dimmed());
}

/// Truncate to a character budget without splitting a code point.
fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    }
}
