use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_orchestrator::{
    AccountabilityRecord, DistributionReport, OrchestratorContext, TaskFile, WardenConfig,
};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden — multi-agent task orchestration core")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Distribute a task file and open accountability records
    Distribute {
        /// TOML file with [[tasks]] entries
        tasks: PathBuf,
    },
    /// Distribute a task file, then run the accountability sweeper until Ctrl-C
    Watch {
        /// TOML file with [[tasks]] entries
        tasks: PathBuf,
    },
    /// Create a checkpoint tagged with the given name
    Checkpoint {
        /// Checkpoint id and tag name
        name: String,
    },
    /// Restore the working tree to a checkpoint or tag
    Rollback {
        /// Checkpoint id or tag name
        id: String,
    },
    /// List checkpoints, oldest first
    Checkpoints,
}

#[derive(Serialize)]
struct DistributeOutput<'a> {
    report: &'a DistributionReport,
    records: Vec<AccountabilityRecord>,
}

#[derive(Serialize)]
struct RollbackOutput<'a> {
    target: &'a str,
    tag: String,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// Loads `path`, or the defaults when the file does not exist.
async fn load_config(path: &Path) -> anyhow::Result<WardenConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(WardenConfig::load(path).await?)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(WardenConfig::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn distribute(ctx: &OrchestratorContext, tasks: &Path) -> anyhow::Result<()> {
    let file = TaskFile::load(tasks).await?;
    let report = ctx.distribute_file(&file).await?;
    print_json(&DistributeOutput {
        report: &report,
        records: ctx.tracker().records(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = load_config(&cli.config).await?;
    let ctx = OrchestratorContext::init(config)?;

    let result = match &cli.command {
        Commands::Distribute { tasks } => distribute(&ctx, tasks).await,
        Commands::Watch { tasks } => match distribute(&ctx, tasks).await {
            Ok(()) => {
                ctx.start_sweeper();
                info!("watching accountability, press Ctrl-C to stop");
                let signal = tokio::signal::ctrl_c().await;
                info!("interrupt received");
                signal.map_err(Into::into)
            }
            Err(e) => Err(e),
        },
        Commands::Checkpoint { name } => match ctx.checkpoints().checkpoint(name).await {
            Ok(checkpoint) => print_json(&checkpoint),
            Err(e) => Err(e.into()),
        },
        Commands::Rollback { id } => match ctx.checkpoints().rollback(id).await {
            Ok(tag) => print_json(&RollbackOutput { target: id, tag }),
            Err(e) => Err(e.into()),
        },
        Commands::Checkpoints => match ctx.checkpoints().list().await {
            Ok(all) => print_json(&all),
            Err(e) => Err(e.into()),
        },
    };

    ctx.shutdown().await;
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["warden", "distribute", "tasks.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("warden.toml"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Distribute { .. }));

        let cli = Cli::try_parse_from([
            "warden",
            "--config",
            "/etc/warden.toml",
            "--log-format",
            "pretty",
            "rollback",
            "last-good",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);
        match cli.command {
            Commands::Rollback { id } => assert_eq!(id, "last-good"),
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Cli::try_parse_from(["warden", "checkpoint"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config, WardenConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[breaker]\nfailure_threshold = 0\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }
}
