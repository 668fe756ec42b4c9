// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use clap::Parser;
use dd_officeconv::{DocumentConverter, OfficeConfig, OfficeManagerPool};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(name = "dd-officeconv")]
#[command(about = "Convert office documents through a pool of headless office engines", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "DD_OFFICECONV_CONFIG")]
    config: Option<PathBuf>,

    /// Office installation directory, overrides the configuration
    #[arg(long)]
    office_home: Option<PathBuf>,

    /// Target extension, e.g. pdf
    #[arg(short = 'f', long)]
    output_format: String,

    /// Directory for converted files; defaults to each source's directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Documents to convert
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn target_path(source: &Path, output_dir: Option<&Path>, ext: &str) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .with_context(|| format!("{} has no file name", source.display()))?;
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(dir.join(stem).with_extension(ext))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    simple_logger::init_with_level(level)?;
    info!(
        "dd-officeconv starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = match args.config {
        Some(ref path) => OfficeConfig::load(path)?,
        None => OfficeConfig::default(),
    };
    if args.office_home.is_some() {
        config.office_home = args.office_home.clone();
    }
    if let Some(ref dir) = args.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let ext = args.output_format.trim_start_matches('.').to_lowercase();
    let pool = Arc::new(OfficeManagerPool::new(config)?);
    let converter = Arc::new(DocumentConverter::new(Arc::clone(&pool))?);
    if converter.registry().by_extension(&ext).is_none() {
        bail!("unsupported output format: {ext}");
    }

    pool.start().await?;

    let mut conversions = JoinSet::new();
    for source in args.files {
        let target = target_path(&source, args.output_dir.as_deref(), &ext)?;
        let converter = Arc::clone(&converter);
        conversions.spawn(async move {
            let result = converter.convert(&source).to(&target).execute().await;
            (source, target, result)
        });
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut failures = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            joined = conversions.join_next() => match joined {
                None => break,
                Some(Ok((source, target, Ok(())))) => {
                    info!("converted {} -> {}", source.display(), target.display())
                }
                Some(Ok((source, _, Err(e)))) => {
                    failures += 1;
                    error!("failed to convert {}: {e}", source.display());
                }
                Some(Err(e)) => {
                    failures += 1;
                    error!("conversion task panicked: {e}");
                }
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                interrupted = true;
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                interrupted = true;
                break;
            }
        }
    }

    // Stopping fails whatever is still queued.
    if let Err(e) = pool.stop().await {
        error!("error while stopping office pool: {e}");
    }
    conversions.shutdown().await;
    info!("dd-officeconv shutting down");

    if interrupted {
        bail!("interrupted before all conversions finished");
    }
    if failures > 0 {
        bail!("{failures} conversion(s) failed");
    }
    Ok(())
}
