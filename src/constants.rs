//! Shared constants.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

/// Job channel capacity per worker.
pub const CHANNEL_CAPACITY_MULTIPLIER: usize = 4;
pub const MIN_CHANNEL_CAPACITY: usize = 16;

/// Terminates every per-file block of the results log.
pub const LOG_BLOCK_DELIMITER: &str = "--------------------------------------------------";

/// Subtrees (relative to a mount root) skipped unless system directories
/// are explicitly requested. Compared case-insensitively.
pub const RESERVED_PREFIXES: &[&str] = &[
    "proc",
    "sys",
    "dev",
    "run",
    "boot",
    "usr",
    "bin",
    "sbin",
    "lib",
    "lib32",
    "lib64",
    "libx32",
    "snap",
    "var/lib",
    "var/cache",
    "windows",
    "program files",
    "program files (x86)",
    "programdata",
    "$recycle.bin",
    "system volume information",
];

/// Host locations that must never be used as the private mount base.
pub const FORBIDDEN_MOUNT_BASES: &[&str] = &[
    "/", "/mnt", "/media", "/run", "/run/media", "/proc", "/sys", "/dev", "/boot", "/home",
    "/usr", "/var", "/etc", "/tmp",
];

pub const RESULTS_LOG_NAME: &str = "final_results.txt";
pub const RESULTS_JSONL_NAME: &str = "final_results.jsonl";
pub const EMAILS_LOG_NAME: &str = "emails.txt";
pub const SOCIAL_LOG_NAME: &str = "social_media_analysis.jsonl";
pub const REPORT_JSON_NAME: &str = "report.json";
pub const REPORT_TEXT_NAME: &str = "report.txt";
