mod run;

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use remindbot_config::RemindBotConfig;
use remindbot_cron::CronSchedule;

#[derive(Parser)]
#[command(name = "remindbot", about = "Telegram reminder bot")]
struct Cli {
    /// Config file (defaults to ~/.remindbot/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot until Ctrl-C
    Run,
    /// Validate the configuration and print a summary
    Check,
    /// Explain a cron expression and show its next fire times
    Cron {
        /// Five-field cron expression, e.g. "0 9 * * 1-5"
        expression: String,

        /// Number of upcoming fire times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RemindBotConfig> {
    let config = match path {
        Some(path) => remindbot_config::load_config_from(path),
        None => remindbot_config::load_config(),
    };
    config.context("failed to load configuration")
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config.as_ref())?;
            init_tracing(!config.is_dev());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run::run_bot(config))?;
        }
        Commands::Check => {
            let config = load_config(cli.config.as_ref())?;
            config.bot_token()?;
            println!("configuration ok");
            println!("  env: {}", config.env);
            println!("  database: {}", config.database_path()?.display());
            match config.assistant() {
                Some(assistant) => {
                    println!("  assistant: {} ({})", assistant.model, assistant.base_url)
                }
                None => println!("  assistant: disabled"),
            }
            println!("  engine poll interval: {}ms", config.engine.poll_interval_ms);
            println!("  event timeout: {}s", config.dispatch.event_timeout_secs);
        }
        Commands::Cron { expression, count } => {
            let schedule = CronSchedule::parse(&expression)
                .with_context(|| format!("invalid cron expression '{expression}'"))?;
            println!("{}", schedule.describe());
            for fire_at in schedule.upcoming(Utc::now(), count) {
                println!("  {}", fire_at.format(remindbot_cron::TIMESTAMP_FORMAT));
            }
        }
    }

    Ok(())
}
