use callseq_core::config::{CallseqConfig, ReportFormat};
use callseq_core::runner::Runner;
use callseq_core::suite;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Text,
    Json,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => ReportFormat::Text,
            Format::Json => ReportFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Suite file or directory of suite files; repeatable.
    #[clap(short, long, value_parser)]
    suite: Vec<PathBuf>,
    /// Skip the built-in case catalog.
    #[clap(long)]
    no_builtin: bool,
    /// Only run cases whose id contains this text.
    #[clap(short, long)]
    filter: Option<String>,
    #[clap(long, value_enum)]
    format: Option<Format>,
    /// Print the selected case ids and exit.
    #[clap(long)]
    list: bool,
}

fn load_config(path: Option<PathBuf>) -> Result<CallseqConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            tracing::info!(path = ?config_path, "loading configuration");
            CallseqConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("callseq.toml");
            if default_config_path.exists() {
                tracing::info!(path = ?default_config_path, "loading default configuration");
                CallseqConfig::load_from_file(&default_config_path)
            } else {
                tracing::debug!("no callseq.toml found, using built-in defaults");
                Ok(CallseqConfig::default())
            }
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config_file)?;

    if let Some(format) = cli.format {
        config.runner.report = format.into();
    }
    if cli.filter.is_some() {
        config.runner.filter = cli.filter;
    }
    if cli.no_builtin {
        config.suite.builtin = false;
    }
    config.suite.paths.extend(cli.suite);
    tracing::debug!(?config, "effective configuration");

    let cases = suite::assemble(
        config.suite.builtin,
        &config.suite.paths,
        config.runner.filter.as_deref(),
    )?;

    if cli.list {
        for case in &cases {
            println!("{}", case.id());
        }
        return Ok(());
    }

    tracing::info!(cases = cases.len(), "running harness cases");
    let summary = Runner::new(&config.runner).run_all(&cases);

    match config.runner.report {
        ReportFormat::Text => print!("{}", summary.render_text()),
        ReportFormat::Json => println!("{}", summary.render_json()?),
    }

    if !summary.success() {
        tracing::warn!(
            unexpected = summary.unexpected,
            "some cases did not reach their expected verdict"
        );
        std::process::exit(1);
    }
    Ok(())
}
