//! Readers for application databases found on mounted partitions.

pub mod browser;
pub mod sqlite_db;
