use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use firebell::config::Config;
use firebell::events::jetstream::JetstreamSource;
use firebell::events::replay::ReplaySource;
use firebell::events::EventSource;
use firebell::notify::gateway::GatewayNotifier;
use firebell::notify::log::LogNotifier;
use firebell::notify::PushNotifier;
use firebell::pipeline::Dispatcher;
use firebell::subscriptions::{self, PushSubscription, SqliteStore};

/// How long shutdown waits for in-flight deliveries.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often `run` logs throughput counters.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Firebell: push notifications for Bluesky follows, likes, reposts and replies.
///
/// Listens to the Jetstream firehose and notifies registered actors when
/// someone interacts with them.
#[derive(Parser)]
#[command(name = "firebell", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the subscription database
    Init,

    /// Register a device to receive notifications for a DID
    Register {
        /// The actor's DID (e.g. did:plc:abc123)
        did: String,

        /// Push token issued by the gateway for the device
        token: String,

        /// Client platform label
        #[arg(long, default_value = "expo")]
        platform: String,
    },

    /// Remove the subscription for a DID
    Unregister {
        did: String,
    },

    /// Show subscriptions and the saved stream cursor
    Status,

    /// Listen to the firehose and dispatch notifications until Ctrl-C
    Run {
        /// Log notifications instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Ignore the saved cursor and start at the live edge
        #[arg(long)]
        from_live_edge: bool,
    },

    /// Dispatch notifications for recorded Jetstream frames (one JSON per line)
    Replay {
        file: PathBuf,

        /// Log notifications instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("firebell=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing Firebell database...");
            let store = subscriptions::initialize(&config.db_path)?;
            let table_count = store.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nNext: register a device with `firebell register <did> <token>`");
        }

        Commands::Register {
            did,
            token,
            platform,
        } => {
            if !firebell::identity::looks_like_did(&did) {
                anyhow::bail!("{did} is not a DID (expected did:<method>:<id>)");
            }
            let store = subscriptions::initialize(&config.db_path)?;
            store.register(&did, &token, &platform).await?;
            println!(
                "{} {}",
                "Registered".green(),
                firebell::identity::normalize_did(&did)
            );
        }

        Commands::Unregister { did } => {
            let store = subscriptions::open(&config.db_path)?;
            if store.unregister(&did).await? {
                println!("{} {did}", "Removed".green());
            } else {
                println!("{} {did}", "No subscription for".yellow());
            }
        }

        Commands::Status => {
            if !firebell::status::database_exists(&config.db_path) {
                println!("Database: not initialized");
                println!("\nRun `firebell init` to set up the database.");
                return Ok(());
            }
            let store = subscriptions::open(&config.db_path)?;
            firebell::status::show(&store, &config.db_path).await?;
        }

        Commands::Run {
            dry_run,
            from_live_edge,
        } => {
            config.require_jetstream()?;
            let store = subscriptions::initialize(&config.db_path)?;

            let mut source =
                JetstreamSource::new(&config.jetstream_url).from_live_edge(from_live_edge);
            if config.persist_cursor {
                source = source.with_checkpoint(store.clone());
            }

            let dispatcher = build_dispatcher(&config, Arc::new(source), store, dry_run)?;
            let dispatcher = Arc::new(dispatcher);

            dispatcher.start().await?;
            let mode = if dry_run {
                "(dry run)".yellow().to_string()
            } else {
                String::new()
            };
            println!("Listening on {} {}", config.jetstream_url, mode);

            let reporter = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(STATS_INTERVAL);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        let stats = dispatcher.stats();
                        info!(
                            events = stats.events_received,
                            matched = stats.events_matched,
                            dispatched = stats.notifications_dispatched,
                            delivered = stats.deliveries_succeeded,
                            failed = stats.deliveries_failed,
                            in_flight = dispatcher.in_flight(),
                            "Dispatcher stats"
                        );
                    }
                })
            };

            tokio::signal::ctrl_c().await?;
            println!("\nShutting down...");
            reporter.abort();

            dispatcher.stop().await?;
            drain(&dispatcher).await;
            print_summary(&dispatcher);
        }

        Commands::Replay { file, dry_run } => {
            let store = subscriptions::open(&config.db_path)?;
            let source = ReplaySource::open(&file)?;
            println!("Replaying {} frames from {}", source.len(), file.display());

            let dispatcher = build_dispatcher(&config, Arc::new(source), store, dry_run)?;
            dispatcher.start().await?;
            dispatcher.stop().await?;
            drain(&dispatcher).await;
            print_summary(&dispatcher);
        }
    }

    Ok(())
}

/// Wire the store, notifier and optional handle resolver into a dispatcher.
fn build_dispatcher(
    config: &Config,
    source: Arc<dyn EventSource>,
    store: Arc<SqliteStore>,
    dry_run: bool,
) -> Result<Dispatcher<PushSubscription>> {
    let notifier: Arc<dyn PushNotifier<PushSubscription>> = if dry_run {
        info!("Dry run: notifications will be logged, not sent");
        Arc::new(LogNotifier)
    } else {
        config.require_gateway()?;
        Arc::new(GatewayNotifier::new(
            &config.push_gateway_url,
            config.push_gateway_token.clone(),
        )?)
    };

    let mut dispatcher = Dispatcher::new(source, store, notifier);

    if config.resolve_handles {
        let client = firebell::bluesky::client::PublicAtpClient::new(&config.public_api_url)?;
        dispatcher = dispatcher.with_labeler(Arc::new(
            firebell::bluesky::handles::HandleResolver::new(client),
        ));
    }

    Ok(dispatcher)
}

/// Give in-flight deliveries a bounded amount of time to finish.
async fn drain(dispatcher: &Dispatcher<PushSubscription>) {
    let pending = dispatcher.in_flight();
    if pending == 0 {
        return;
    }
    info!(pending, "Waiting for in-flight deliveries");
    if tokio::time::timeout(DRAIN_TIMEOUT, dispatcher.wait_idle())
        .await
        .is_err()
    {
        warn!(
            abandoned = dispatcher.in_flight(),
            "Deliveries still pending after {DRAIN_TIMEOUT:?}"
        );
    }
}

fn print_summary(dispatcher: &Dispatcher<PushSubscription>) {
    let stats = dispatcher.stats();
    println!("\n{}", "Dispatch summary".bold());
    println!("  Events received:   {}", stats.events_received);
    println!("  Events matched:    {}", stats.events_matched);
    println!("  Notifications:     {}", stats.notifications_dispatched);
    println!("  Delivered:         {}", stats.deliveries_succeeded.to_string().green());
    if stats.deliveries_failed > 0 {
        println!("  Failed:            {}", stats.deliveries_failed.to_string().red());
    }
}
