use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use tracing::{info, warn};

use evidence_intake::{cli, config, logging, run};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();
    let mut loaded = config::load_config(cli_opts.config_path.as_deref())?;
    if let Some(threshold) = cli_opts.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            bail!("--threshold {threshold} is outside [0, 1]");
        }
        loaded.config.score_threshold = threshold;
    }
    if cli_opts.ocr && !cli_opts.analysis_enabled() {
        warn!("--ocr only affects analysis; add -a to analyze images");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::SeqCst) {
                warn!("second interrupt; teardown is still in progress");
            } else {
                warn!("interrupt received; finishing in-flight files and tearing down");
            }
        })?;
    }

    let settings = run::RunSettings::from_cli(&cli_opts, &loaded.config);
    let summary = run::run(&settings, loaded, cancel)?;

    if summary.image_unchanged == Some(false) {
        warn!("the image hash changed during the run; see the report");
    }
    info!(
        "evidence-intake run finished; results in {}",
        summary.run_dir.display()
    );
    Ok(())
}
