use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use crate::core::bootstrap;
use crate::core::config::Settings;
use crate::core::scheduler::Scheduler;
use crate::core::terminal::{self, GuideSection, print_error, print_status};

const DEFAULT_CONFIG_PATH: &str = "postmill.toml";

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Commands")
        .command("start", "Run the scheduler daemon")
        .command("run", "Execute one pipeline cycle immediately")
        .print();

    GuideSection::new("Options")
        .command("--config <path>", "Settings file (default: postmill.toml)")
        .command("--schedule <id>", "With 'run': limit to one schedule")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("postmill").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    RunOnce,
    Help,
}

#[derive(Debug, Clone)]
pub(crate) struct CliArgs {
    pub command: Command,
    pub config_path: PathBuf,
    pub schedule_id: Option<String>,
}

pub(crate) fn parse_args(args: &[String]) -> CliArgs {
    let command = match args.get(1).map(String::as_str) {
        Some("start") => Command::Start,
        Some("run") => Command::RunOnce,
        Some(_) | None => Command::Help,
    };

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut schedule_id = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--schedule" | "-s" => {
                if i + 1 < args.len() {
                    schedule_id = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    CliArgs {
        command,
        config_path,
        schedule_id,
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    if cli.command == Command::Help {
        print_help();
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    // Startup configuration failures are fatal: a non-zero exit, nothing armed.
    let settings = Settings::load(&cli.config_path)?;
    let executor = Arc::new(bootstrap::build_executor(&settings)?);

    match cli.command {
        Command::RunOnce => run_once(&settings, &executor, cli.schedule_id.as_deref()).await,
        Command::Start => start_daemon(&settings, executor).await,
        Command::Help => unreachable!("handled above"),
    }
}

/// Execute one cycle for the selected schedules, without arming any cron
/// triggers.
async fn run_once(
    settings: &Settings,
    executor: &crate::core::pipeline::PipelineExecutor,
    only: Option<&str>,
) -> Result<()> {
    let mut matched = false;
    for schedule in settings.enabled_schedules() {
        if let Some(id) = only
            && schedule.id != id
        {
            continue;
        }
        matched = true;
        info!("Running schedule '{}' once", schedule.id);
        executor.run(schedule).await;
    }
    if !matched {
        let wanted = only.unwrap_or("<any enabled>");
        print_error(&format!("no enabled schedule matched '{}'", wanted));
        anyhow::bail!("no enabled schedule matched '{}'", wanted);
    }
    Ok(())
}

async fn start_daemon(
    settings: &Settings,
    executor: Arc<crate::core::pipeline::PipelineExecutor>,
) -> Result<()> {
    terminal::print_banner();

    let mut scheduler = Scheduler::new(executor).await?;
    for schedule in settings.enabled_schedules() {
        if let Err(e) = scheduler.add(schedule.clone()).await {
            // A bad cron disarms that one schedule; the rest keep running.
            error!("schedule '{}' not armed: {}", schedule.id, e);
        }
    }

    if scheduler.armed_count() == 0 {
        terminal::print_warn("no schedules could be armed; nothing to do");
        return Ok(());
    }

    scheduler.start().await?;
    print_status("Schedules", &scheduler.armed_count().to_string());
    terminal::print_info("Scheduler running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler");
    scheduler.shutdown().await?;
    terminal::print_success("Scheduler stopped.");
    Ok(())
}
