mod commands;
mod output;

use clap::{Parser, Subcommand};
use ferry_core::config::{self, FerryConfig, PublishMode};
use ferry_core::model::SnapshotFormat;
use miette::Result;
use output::Output;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Move content trees between a repository and snapshot bundles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Repository file path (overrides config)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export repository content into a bundle directory
    Export {
        /// Bundle directory (overrides config)
        #[arg(long, short = 'b')]
        bundle: Option<PathBuf>,

        /// Snapshot format: json or xml (overrides config)
        #[arg(long, short = 'f')]
        format: Option<SnapshotFormat>,

        /// Items saved or refreshed per batch (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Copy the packed bundle archive to this path
        #[arg(long, short = 'o')]
        archive: Option<PathBuf>,
    },
    /// Import a bundle directory or .tar.gz archive into the repository
    Import {
        /// Bundle directory or archive (defaults to the configured bundle)
        source: Option<PathBuf>,

        /// Publication mode: none, all or live (overrides config)
        #[arg(long, short = 'p')]
        publish: Option<PublishMode>,

        /// Items saved per batch (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Write the JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Ask the run working on a bundle to stop before its next item
    Stop {
        /// Bundle directory (defaults to the configured bundle)
        bundle: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a configuration file with the defaults
    Init {
        /// Where to write it
        #[arg(default_value = "ferry.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_appender::rolling;
    use tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    // Log directory in the user's data directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ferry")
        .join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = rolling::daily(&log_dir, "ferry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = if cli.debug {
        EnvFilter::new("ferry_core=debug,ferry_cli=debug,info")
    } else {
        EnvFilter::new("ferry_core=info,ferry_cli=info,warn")
    };

    // The progress bar owns stdout while a job runs.
    let terminal_layer = if cli.debug {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .with_writer(std::io::stderr)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_timer(fmt::time::LocalTime::rfc_3339())
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .with(file_layer.with_filter(EnvFilter::new("ferry_core=debug,ferry_cli=debug,info")))
        .init();

    info!(
        "Logging initialized. Logs are being written to: {:?}",
        log_dir.join("ferry.log")
    );

    let mut config: FerryConfig = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        info!("Loading config from standard locations");
        config::load_config_from_standard_locations().await?
    };
    if let Some(repo) = &cli.repo {
        config.repository.path = repo.clone();
    }

    match cli.command {
        Commands::Export {
            bundle,
            format,
            batch_size,
            archive,
        } => {
            if let Some(bundle) = bundle {
                config.bundle.path = bundle;
            }
            if let Some(format) = format {
                config.bundle.format = format;
            }
            if let Some(batch_size) = batch_size {
                config.export.batch_size = batch_size;
            }
            commands::run::export(&config, archive).await
        }
        Commands::Import {
            source,
            publish,
            batch_size,
            report,
        } => {
            if let Some(publish) = publish {
                config.import.publish = publish;
            }
            if let Some(batch_size) = batch_size {
                config.import.batch_size = batch_size;
            }
            let source = source.unwrap_or_else(|| config.bundle.path.clone());
            commands::run::import(&config, source, report).await
        }
        Commands::Stop { bundle } => {
            let bundle = bundle.unwrap_or_else(|| config.bundle.path.clone());
            commands::run::stop(&bundle).await
        }
        Commands::Config { cmd } => {
            let output = Output::new();
            match cmd {
                ConfigCommands::Show => commands::config::show(&config, &output).await,
                ConfigCommands::Init { path, force } => {
                    commands::config::init(&path, force, &output).await
                }
            }
        }
    }
}
