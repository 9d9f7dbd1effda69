//! # Pipeline Events
//!
//! Events that flow to the metadata writer thread.

use crate::emails::EmailScanRecord;
use crate::parsers::browser::SocialRecord;

use super::FileAnalysis;

/// Events sent to the metadata recording thread
#[derive(Debug)]
pub enum MetadataEvent {
    /// Terminal record for one analyzed file
    Analysis(FileAnalysis),
    /// Addresses found in one file by the email scan
    Emails(EmailScanRecord),
    /// A browser artifact matching a social-media domain
    Social(SocialRecord),
    /// Flush buffered data to disk
    Flush,
}
