//! Forensic intake of raw disk images: read-only attach and mount, location
//! of candidate evidence files, text extraction, personal-data detection and
//! order-independent aggregation of the findings.

pub mod aggregate;
pub mod chunk;
pub mod classify;
pub mod cli;
pub mod config;
pub mod constants;
pub mod emails;
pub mod evidence;
pub mod extract;
pub mod locate;
pub mod logging;
pub mod metadata;
pub mod mount;
pub mod parsers;
pub mod pipeline;
pub mod report;
pub mod run;
pub mod social;
pub mod techinfo;
pub mod util;
