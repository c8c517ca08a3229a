//! Runs the media catalog against headless Chrome and the stored baselines.

use anyhow::{Context as _, Result, anyhow};
use env_logger::{Builder, Env};
use log::{error, info};
use media_watch::render::CommandRenderer;
use media_watch::scorer::DssimScorer;
use media_watch::session::ChromeSession;
use media_watch::{Catalog, HarnessConfig, Runner, select_cases};
use std::env;
use std::fs::{create_dir_all, read_to_string, write};
use std::process::exit;

/// Parse `--filter=<substring>` or `--filter <substring>`.
fn parse_filter_from_args() -> Option<String> {
    let mut args = env::args();
    let _prog_name: Option<String> = args.next();
    let mut pending = false;
    for arg in args {
        if let Some(rest) = arg.strip_prefix("--filter=") {
            return Some(rest.to_owned());
        }
        if arg == "--filter" {
            pending = true;
            continue;
        }
        if pending {
            return Some(arg);
        }
    }
    None
}

fn load_catalog(config: &HarnessConfig) -> Result<Catalog> {
    let Some(path) = &config.catalog_path else {
        return Ok(Catalog::builtin());
    };
    let text = read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    Catalog::from_json(&text).with_context(|| format!("Invalid catalog {}", path.display()))
}

/// Returns whether every case passed.
fn run(filter: Option<&str>) -> Result<bool> {
    let config = HarnessConfig::from_env();

    let scorer = DssimScorer::resolve(&config.dssim_path)?;

    let command = config
        .renderer
        .as_deref()
        .ok_or_else(|| anyhow!("MEDIA_WATCH_RENDERER is not set"))?;
    let renderer = CommandRenderer::from_command(command)?;

    let catalog = select_cases(&load_catalog(&config)?, &config, filter)?;
    info!("{} case(s) selected", catalog.len());

    create_dir_all(&config.scratch_dir)
        .with_context(|| format!("Failed to create {}", config.scratch_dir.display()))?;
    let mut session = ChromeSession::launch(config.viewport, config.chrome_bin.clone())?;

    let report = Runner::new(&config, &renderer, &mut session, &scorer).run_all(&catalog);
    if let Some(path) = &config.report_path {
        write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }
    report.log_summary();
    Ok(report.is_success())
}

fn main() {
    let _log_init: Result<(), _> = Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .is_test(false)
        .try_init();
    let filter = parse_filter_from_args();
    match run(filter.as_deref()) {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(err) => {
            error!("error: {err:#}");
            exit(1);
        }
    }
}
