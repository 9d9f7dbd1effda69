use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Raw disk image to analyze (never modified)
    pub image_path: PathBuf,

    /// Examiner name for the report
    #[arg(long)]
    pub name: Option<String>,

    /// Examiner surname for the report
    #[arg(long)]
    pub surname: Option<String>,

    /// Examiner or case number for the report
    #[arg(long)]
    pub nr: Option<String>,

    /// Run personal-data analysis (default when no mode is given)
    #[arg(short, long)]
    pub analyze: bool,

    /// Analyze the extended set of file extensions
    #[arg(short = 'x', long)]
    pub extend: bool,

    /// Collect email addresses from email-capable files
    #[arg(short, long)]
    pub emails: bool,

    /// OCR raster images during analysis
    #[arg(short, long)]
    pub ocr: bool,

    /// Look for social-media artifacts in browser databases
    #[arg(short, long)]
    pub social: bool,

    /// Also analyze operating-system directories
    #[arg(short = 'r', long = "sys_dir_analysis", alias = "sys-dir-analysis")]
    pub sys_dir_analysis: bool,

    /// Report filesystem and operating-system details per partition
    #[arg(short, long = "tech_info", alias = "tech-info")]
    pub tech_info: bool,

    /// Output directory for logs and the report
    #[arg(long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Minimum entity score (overrides config when set)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Results log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Hash the image before attach and after teardown
    #[arg(long)]
    pub compute_image_sha256: bool,

    /// Stop starting new files after this many seconds
    #[arg(long)]
    pub max_runtime_secs: Option<u64>,
}

impl CliOptions {
    /// Analysis runs when asked for, or when no other mode is selected.
    pub fn analysis_enabled(&self) -> bool {
        self.analyze || !(self.emails || self.social || self.tech_info)
    }

    pub fn exclude_system_paths(&self) -> bool {
        !self.sys_dir_analysis
    }

    pub fn modes(&self) -> Vec<String> {
        let mut modes = Vec::new();
        if self.analysis_enabled() {
            modes.push("analyze");
        }
        if self.extend {
            modes.push("extend");
        }
        if self.emails {
            modes.push("emails");
        }
        if self.ocr {
            modes.push("ocr");
        }
        if self.social {
            modes.push("social");
        }
        if self.sys_dir_analysis {
            modes.push("sys_dir_analysis");
        }
        if self.tech_info {
            modes.push("tech_info");
        }
        modes.into_iter().map(str::to_string).collect()
    }
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
