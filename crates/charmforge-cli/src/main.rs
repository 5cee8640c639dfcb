//! charmforge CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "charmforge")]
#[command(about = "Build, publish and promote charms and bundles", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "CHARMFORGE_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, publish and promote everything the configuration selects
    Build {
        /// Path to the run configuration
        #[arg(long, default_value = "charmforge.kdl")]
        config: PathBuf,
        /// Only run the charm phase
        #[arg(long, conflicts_with = "bundles_only")]
        charms_only: bool,
        /// Only run the bundle phase
        #[arg(long)]
        bundles_only: bool,
        /// List what would be built without touching any tool
        #[arg(long)]
        dry_run: bool,
        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Release published revisions from one channel to another
    Promote {
        /// Charm or bundle list
        #[arg(long)]
        list: PathBuf,
        /// Tags selecting entries to promote
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
        /// Channel to promote from
        #[arg(long, default_value = "unpublished")]
        from: String,
        /// Channel to promote to
        #[arg(long, default_value = "edge")]
        to: String,
        /// Treat the list as a bundle list
        #[arg(long)]
        bundles: bool,
    },
    /// Validate a run configuration and the manifests it names
    Validate {
        /// Path to the run configuration
        #[arg(long, default_value = "charmforge.kdl")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = match cli.command {
        Commands::Build {
            config,
            charms_only,
            bundles_only,
            dry_run,
            report,
        } => {
            commands::build::run(commands::build::BuildOptions {
                config,
                charms: !bundles_only,
                bundles: !charms_only,
                dry_run,
                report,
            })
            .await?
        }
        Commands::Promote {
            list,
            tags,
            from,
            to,
            bundles,
        } => commands::promote::run(&list, &tags, &from, &to, bundles).await?,
        Commands::Validate { config } => commands::validate::run(&config)?,
    };

    Ok(code)
}
