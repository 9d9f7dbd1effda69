//! # Run Orchestration
//!
//! One complete intake: image checks, scoped mount, the selected passes
//! over every mounted partition, aggregation and the report. Teardown runs
//! before the report is written, whatever the passes did.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::aggregate::AggregateReport;
use crate::classify::{Classifier, build_classifier};
use crate::cli::CliOptions;
use crate::config::{Config, LoadedConfig};
use crate::constants::MIB;
use crate::emails::scan_emails;
use crate::evidence::{check_image, compute_sha256};
use crate::extract::ExtractorRegistry;
use crate::extract::image::{CommandOcr, OcrEngine};
use crate::locate::{CandidateFile, ExtensionFilter, locate};
use crate::metadata::{self, MetadataBackendKind, MetadataSink};
use crate::mount::{BlockDeviceOps, ImageMountManager, MountPoint, MountSettings, Partition, SystemBlockOps, with_mounted_image};
use crate::pipeline::workers::Stopper;
use crate::pipeline::{AnalysisOptions, ProgressConfig, ProgressReporter, ProgressSnapshot, analyze};
use crate::report::{Author, ImageDigest, Report, write_report};
use crate::social::{find_browser_artifacts, scan_social};
use crate::techinfo::{PartitionInfo, collect_partition_info};
use crate::util;

/// Everything a run needs besides configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub image_path: PathBuf,
    pub output_dir: PathBuf,
    pub author: Author,
    pub analyze: bool,
    pub emails: bool,
    pub social: bool,
    pub tech_info: bool,
    pub ocr: bool,
    pub exclude_system_paths: bool,
    pub analysis_filter: ExtensionFilter,
    pub email_filter: ExtensionFilter,
    pub workers: usize,
    pub backend: MetadataBackendKind,
    pub compute_image_sha256: bool,
    pub max_runtime: Option<Duration>,
    pub modes: Vec<String>,
}

impl RunSettings {
    pub fn from_cli(opts: &CliOptions, cfg: &Config) -> Self {
        Self {
            image_path: opts.image_path.clone(),
            output_dir: opts.output.clone(),
            author: Author {
                name: opts.name.clone(),
                surname: opts.surname.clone(),
                nr: opts.nr.clone(),
            },
            analyze: opts.analysis_enabled(),
            emails: opts.emails,
            social: opts.social,
            tech_info: opts.tech_info,
            ocr: opts.ocr,
            exclude_system_paths: opts.exclude_system_paths(),
            analysis_filter: util::analysis_filter(cfg, opts),
            email_filter: util::email_filter(cfg),
            workers: opts.workers.max(1),
            backend: util::backend_from_cli(opts.log_format),
            compute_image_sha256: opts.compute_image_sha256,
            max_runtime: opts.max_runtime_secs.map(Duration::from_secs),
            modes: opts.modes(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub aggregate: AggregateReport,
    pub files_located: u64,
    pub cancelled: bool,
    /// `Some(false)` when the image hash changed across the run.
    pub image_unchanged: Option<bool>,
}

struct LogProgress;

impl ProgressReporter for LogProgress {
    fn on_progress(&self, s: &ProgressSnapshot) {
        let eta = s
            .eta_seconds
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "progress: {}/{} files ({:.1}%) failed={} entities={} eta={}",
            s.files_done, s.files_total, s.completion_pct, s.files_failed, s.entities_found, eta
        );
    }
}

/// Output of the passes that need the partitions mounted.
#[derive(Default)]
struct MountedPass {
    aggregate: AggregateReport,
    files_located: u64,
    cancelled: bool,
    partitions: Vec<PartitionInfo>,
}

struct Passes<'a> {
    settings: &'a RunSettings,
    cfg: &'a Config,
    registry: &'a ExtractorRegistry,
    classifier: Option<&'a dyn Classifier>,
    sink: Arc<dyn MetadataSink>,
    stopper: Stopper,
}

impl Passes<'_> {
    fn candidates(&self, mounts: &[MountPoint], filter: &ExtensionFilter) -> Vec<CandidateFile> {
        mounts
            .iter()
            .flat_map(|m| {
                let locator = locate(&m.path, &m.partition_name(), filter, self.settings.exclude_system_paths);
                locator.iter().collect::<Vec<_>>()
            })
            .collect()
    }

    fn run(&self, mounts: &[MountPoint], partitions: &[Partition]) -> MountedPass {
        let mut pass = MountedPass::default();
        info!("{} of {} partitions mounted", mounts.len(), partitions.len());

        if self.settings.tech_info {
            pass.partitions = collect_partition_info(partitions, mounts);
        }

        if let Some(classifier) = self.classifier {
            let files = self.candidates(mounts, &self.settings.analysis_filter);
            pass.files_located += files.len() as u64;
            let options = AnalysisOptions::from_config(self.cfg, self.settings.workers);
            let progress = (self.cfg.progress_interval_secs > 0).then(|| ProgressConfig {
                reporter: Arc::new(LogProgress),
                interval: Duration::from_secs(self.cfg.progress_interval_secs),
            });
            let outcome = analyze(
                files,
                self.registry,
                classifier,
                &options,
                self.sink.clone(),
                &self.stopper,
                progress.as_ref(),
            );
            pass.cancelled |= outcome.cancelled;
            pass.aggregate = AggregateReport::from_analyses(&outcome.files);
        }

        if self.settings.emails {
            let files = self.candidates(mounts, &self.settings.email_filter);
            let outcome = scan_emails(files, self.registry, self.settings.workers, &self.stopper, self.sink.clone());
            pass.cancelled |= outcome.cancelled;
            pass.aggregate.add_emails(outcome.addresses);
        }

        if self.settings.social {
            let artifacts = mounts
                .iter()
                .flat_map(|m| find_browser_artifacts(&m.path, &m.partition_name()))
                .collect();
            let outcome = scan_social(
                artifacts,
                &self.cfg.social_domains,
                self.settings.workers,
                &self.stopper,
                self.sink.clone(),
            );
            pass.cancelled |= outcome.cancelled;
            pass.aggregate.add_social(&outcome.records);
        }

        pass
    }
}

fn hash_image(path: &Path) -> Result<String> {
    let source = check_image(path)?;
    info!("computing image sha256 (full pass)");
    let hash = compute_sha256(&source, 8 * MIB as usize)?;
    info!("image sha256={hash}");
    Ok(hash)
}

/// Run against the real OS block-device tooling.
pub fn run(settings: &RunSettings, loaded: LoadedConfig, cancel: Arc<AtomicBool>) -> Result<RunSummary> {
    let ops = SystemBlockOps::new(loaded.config.privilege_command.clone());
    if loaded.config.privilege_command.is_none() && !util::running_as_root() {
        warn!("not running as root and no privilege_command configured; attaching will likely fail");
    }
    run_with_ops(settings, loaded, Box::new(ops), cancel)
}

pub fn run_with_ops(
    settings: &RunSettings,
    loaded: LoadedConfig,
    ops: Box<dyn BlockDeviceOps>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let cfg = loaded.config;
    let started = Instant::now();
    let run_dir = settings.output_dir.join(&cfg.run_id);
    util::check_output_outside(&run_dir, &cfg.mount_base)?;
    util::ensure_output_dir(&run_dir)?;
    info!(
        "starting run_id={} image={} output={} workers={} modes={}",
        cfg.run_id,
        settings.image_path.display(),
        run_dir.display(),
        settings.workers,
        settings.modes.join(",")
    );

    check_image(&settings.image_path)
        .with_context(|| format!("cannot use image {}", settings.image_path.display()))?;
    let sha_before = if settings.compute_image_sha256 {
        Some(hash_image(&settings.image_path)?)
    } else {
        None
    };

    let ocr: Option<Arc<dyn OcrEngine>> = if settings.ocr {
        match CommandOcr::new(cfg.ocr_command.clone()) {
            Some(engine) => Some(Arc::new(engine)),
            None => {
                warn!("OCR requested but ocr_command is empty; images will not be analyzed");
                None
            }
        }
    } else {
        None
    };
    let registry = ExtractorRegistry::with_defaults(cfg.max_file_bytes, ocr);
    let classifier = if settings.analyze {
        Some(build_classifier(&cfg.classifier)?)
    } else {
        None
    };
    let sink = metadata::build_sink(settings.backend, &run_dir)?;

    let deadline = settings.max_runtime.map(|limit| started + limit);
    let passes = Passes {
        settings,
        cfg: &cfg,
        registry: &registry,
        classifier: classifier.as_deref(),
        sink,
        stopper: Stopper::new(Some(cancel), deadline),
    };

    let mut manager = ImageMountManager::new(&settings.image_path, ops, MountSettings::from_config(&cfg));
    let pass = with_mounted_image(&mut manager, |mounts, partitions| passes.run(mounts, partitions))
        .map_err(|err| anyhow!("cannot attach {}: {err}", settings.image_path.display()))?;
    drop(passes);
    drop(manager);

    let image_sha256 = match sha_before {
        Some(before) => {
            let after = hash_image(&settings.image_path)
                .map_err(|err| warn!("could not re-hash image after teardown: {err}"))
                .ok();
            if after.as_ref().is_some_and(|a| *a != before) {
                error!("image sha256 changed during the run: before={before} after={after:?}");
            }
            Some(ImageDigest { before, after })
        }
        None => None,
    };

    if let Err(err) = pass.aggregate.check() {
        warn!("aggregate report is inconsistent: {err}");
    }

    let report = Report {
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        run_id: cfg.run_id.clone(),
        config_hash: loaded.config_hash,
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        author: settings.author.clone(),
        image_name: settings
            .image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| settings.image_path.display().to_string()),
        image_path: settings.image_path.clone(),
        image_sha256: image_sha256.clone(),
        modes: settings.modes.clone(),
        files_located: pass.files_located,
        cancelled: pass.cancelled,
        partitions: pass.partitions,
        aggregate: pass.aggregate,
    };
    if let Err(err) = write_report(&run_dir, &report) {
        error!("failed to write report: {err}");
    }

    info!(
        "run finished in {:.1}s: files={} failed={} entities={} emails={}",
        started.elapsed().as_secs_f64(),
        report.aggregate.files_total(),
        report.aggregate.files_failed,
        report.aggregate.total_entities(),
        report.aggregate.email_addresses.len()
    );

    Ok(RunSummary {
        run_dir,
        aggregate: report.aggregate,
        files_located: report.files_located,
        cancelled: report.cancelled,
        image_unchanged: image_sha256.and_then(|d| d.unchanged()),
    })
}
