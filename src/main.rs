//! # Castbot — scheduled group broadcasts
//!
//! Usage:
//!   castbot run                           # Start the bot (Ctrl-C to stop)
//!   castbot schedule add 09:00 promo      # Broadcast "promo" daily at 09:00
//!   castbot enable                        # Turn scheduled broadcasting on
//!   castbot targets add -1001234567890    # Add a destination chat
//!   castbot test promo                    # Broadcast now, outside the schedule
//!   castbot status                        # Schedule, countdowns, history
//!
//! Admin subcommands save the settings document under the data-directory
//! lock; a running bot adopts the edit and re-arms on its next tick. `test`
//! appends to the same history ledger the bot writes, under the same lock.

use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use castbot_channels::{FolderContentSource, TelegramSender};
use castbot_core::BotConfig;
use castbot_scheduler::{BroadcastService, DeliveryRun, RuntimeStore, TriggerLoop, spawn_dispatcher};

#[derive(Parser)]
#[command(name = "castbot", version, about = "📢 Castbot — scheduled broadcasts to group chats")]
struct Cli {
    /// Config file (default: ~/.castbot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bot: trigger loop, dispatcher, startup notice
    Run,
    /// Write a default config file
    Init,
    /// Broadcast a campaign right now
    Test { campaign: String },
    /// Edit the daily schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Enable scheduled broadcasting
    Enable,
    /// Disable scheduled broadcasting
    Disable,
    /// Set the schedule timezone (IANA name, e.g. Asia/Taipei)
    Timezone { timezone: String },
    /// Manage destination chats
    Targets {
        #[command(subcommand)]
        action: TargetsAction,
    },
    /// Show recent broadcast runs
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// List available campaigns
    Campaigns,
    /// Show what a campaign would send
    Preview { campaign: String },
    /// Schedule, next triggers and run statistics
    Status,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Add an entry, e.g. `schedule add 09:00 promo`
    Add { time: String, campaign: String },
    /// Remove an entry
    Remove { time: String, campaign: String },
    List,
    /// Remove every entry and disable broadcasting
    Clear,
}

#[derive(Subcommand)]
enum TargetsAction {
    /// Add a chat by id; its name is looked up
    Add {
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
    Remove {
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
    List,
}

fn load_config(path: Option<&PathBuf>) -> Result<BotConfig> {
    let config = match path {
        Some(path) => {
            let mut config = BotConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => BotConfig::load()?,
    };
    Ok(config)
}

/// Build the service. Only `run` counts as a new process incarnation.
fn open_service(config: &BotConfig, new_incarnation: bool) -> Result<Arc<BroadcastService>> {
    let data_dir = config.data_path();
    std::fs::create_dir_all(&data_dir)?;

    let runtime_store = RuntimeStore::new(&data_dir);
    let runtime = if new_incarnation {
        runtime_store.record_startup(Utc::now())
    } else {
        runtime_store.load()
    };

    let sender = Arc::new(TelegramSender::new(config.telegram.clone()));
    let content = Arc::new(FolderContentSource::new(config.content_path()));
    Ok(Arc::new(BroadcastService::open(config, sender, content, runtime)))
}

fn require_token(config: &BotConfig) -> Result<()> {
    if config.telegram.bot_token.trim().is_empty() {
        bail!("No bot token: set CASTBOT_BOT_TOKEN or [telegram].bot_token in config.toml");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "castbot=debug" } else { "castbot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match cli.command {
        Command::Init => return init_config(cli.config.as_deref()),
        _ => load_config(cli.config.as_ref())?,
    };

    match cli.command {
        Command::Init => {}
        Command::Run => run_bot(&config).await?,
        Command::Test { campaign } => {
            require_token(&config)?;
            let service = open_service(&config, false)?;
            let run = service.run_test_broadcast(&campaign).await?;
            print_run(&run);
        }
        Command::Schedule { action } => {
            let service = open_service(&config, false)?;
            let table = service.table();
            match action {
                ScheduleAction::Add { time, campaign } => {
                    let entry = table.add(&time, &campaign).await?;
                    println!("✅ Added {entry}");
                }
                ScheduleAction::Remove { time, campaign } => {
                    table.remove(&time, &campaign).await?;
                    println!("🗑️ Removed {time} → {campaign}");
                }
                ScheduleAction::List => {
                    let state = service.get_schedule_state().await;
                    if state.entries.is_empty() {
                        println!("No schedule entries.");
                    }
                    for entry in &state.entries {
                        println!("  {entry}");
                    }
                    println!("({}, {})", if state.enabled { "enabled" } else { "disabled" }, state.timezone);
                }
                ScheduleAction::Clear => {
                    let removed = table.clear().await;
                    println!("🧹 Removed {removed} entries; broadcasting disabled");
                }
            }
        }
        Command::Enable => {
            open_service(&config, false)?.table().set_enabled(true).await?;
            println!("▶️ Broadcasting enabled");
        }
        Command::Disable => {
            open_service(&config, false)?.table().set_enabled(false).await?;
            println!("⏸️ Broadcasting disabled");
        }
        Command::Timezone { timezone } => {
            open_service(&config, false)?.table().set_timezone(&timezone).await?;
            println!("🌐 Timezone set to {timezone}");
        }
        Command::Targets { action } => {
            let service = open_service(&config, false)?;
            match action {
                TargetsAction::Add { id } => {
                    require_token(&config)?;
                    let destination = service.add_target_by_id(id).await?;
                    println!("✅ Added target {destination}");
                }
                TargetsAction::Remove { id } => {
                    let removed = service.table().remove_target(id).await?;
                    println!("🗑️ Removed target {removed}");
                }
                TargetsAction::List => {
                    let targets = service.table().targets().await;
                    if targets.is_empty() {
                        println!("No targets.");
                    }
                    for (i, target) in targets.iter().enumerate() {
                        println!("{}. {target}", i + 1);
                    }
                }
            }
        }
        Command::History { limit } => {
            let service = open_service(&config, false)?;
            let records = service.get_history(limit).await;
            if records.is_empty() {
                println!("No broadcasts yet.");
            }
            for r in records.iter().rev() {
                println!(
                    "{}  {:<20} {}/{} ({})  {}  R{}",
                    r.time.format("%Y-%m-%d %H:%M:%S"),
                    r.campaign_id,
                    r.success_count,
                    r.total_count,
                    r.success_rate,
                    if r.triggered_by_schedule { "scheduled" } else { "manual" },
                    r.process_incarnation
                );
            }
        }
        Command::Campaigns => {
            let campaigns = open_service(&config, false)?.list_campaigns().await?;
            if campaigns.is_empty() {
                println!("No campaigns in {}", config.content_path().display());
            }
            for name in campaigns {
                println!("  📁 {name}");
            }
        }
        Command::Preview { campaign } => {
            println!("{}", open_service(&config, false)?.preview(&campaign).await?);
        }
        Command::Status => print_status(&config).await?,
    }
    Ok(())
}

fn init_config(path: Option<&Path>) -> Result<()> {
    let path = path.map_or_else(BotConfig::default_path, Path::to_path_buf);
    if BotConfig::write_default(&path)? {
        println!("✅ Wrote default config: {}", path.display());
    } else {
        println!("⚠️  Config already exists: {}", path.display());
    }
    Ok(())
}

async fn run_bot(config: &BotConfig) -> Result<()> {
    require_token(config)?;

    let me = TelegramSender::new(config.telegram.clone()).get_me().await;
    match me {
        Ok(me) => tracing::info!("🤖 Telegram bot: @{}", me.username.as_deref().unwrap_or(&me.first_name)),
        Err(e) => tracing::warn!("⚠️ Could not verify bot token: {e}"),
    }

    let service = open_service(config, true)?;
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let trigger = TriggerLoop::new(service.table().clone(), jobs_tx, config.scheduler.tick_interval()).spawn();
    let dispatcher = spawn_dispatcher(service.clone(), jobs_rx);

    service.send_startup_notice().await;
    tracing::info!("📢 Castbot running (R{}). Press Ctrl-C to stop.", service.process_incarnation());

    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    trigger.abort();
    dispatcher.abort();
    Ok(())
}

async fn print_status(config: &BotConfig) -> Result<()> {
    let service = open_service(config, false)?;
    let state = service.get_schedule_state().await;
    let targets = service.table().targets().await;

    println!("📢 Castbot status\n");
    println!("  Status:     {}", if state.enabled { "enabled" } else { "disabled" });
    println!("  Timezone:   {}", state.timezone);
    println!("  Targets:    {}", targets.len());
    println!("  Control:    {}", config.control_destination().map_or("none".into(), |id| id.to_string()));
    println!("  Incarnation: R{}", service.process_incarnation());

    println!("\n⏰ Next triggers:");
    let upcoming = service.table().upcoming(Utc::now()).await;
    if upcoming.is_empty() {
        println!("  (none)");
    }
    for u in upcoming {
        let minutes = u.countdown.num_minutes();
        println!("  {}  in {}h {:02}m", u.entry, minutes / 60, minutes % 60);
    }

    let stats = service.history_stats().await;
    println!("\n📊 History:");
    println!(
        "  {} runs ({} scheduled, {} manual), average success {}",
        stats.total_runs,
        stats.scheduled_runs,
        stats.manual_runs,
        stats.average_success_rate.map_or("n/a".into(), |r| format!("{r:.1}%"))
    );
    if let Some(last) = stats.last {
        println!(
            "  Last: {} {} ({}/{})",
            last.time.format("%Y-%m-%d %H:%M:%S UTC"),
            last.campaign_id,
            last.success_count,
            last.total_count
        );
    }
    Ok(())
}

fn print_run(run: &DeliveryRun) {
    if let Some(reason) = &run.aborted {
        println!("🚫 Aborted: {reason}");
        return;
    }
    println!(
        "📊 {}: {}/{} delivered ({})",
        run.campaign_id,
        run.success_count,
        run.total_count,
        run.success_rate()
    );
    for outcome in run.failed() {
        println!(
            "  ❌ {} after {} attempts: {}",
            outcome.destination,
            outcome.attempts,
            outcome.last_error.as_deref().unwrap_or("unknown error")
        );
    }
}
