//! # Result Aggregator
//!
//! Order-independent summaries of a run. Every fold is counting or set
//! union over ordered maps, so any permutation or grouping of the inputs
//! produces an equal report that serializes identically.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

use crate::parsers::browser::SocialRecord;
use crate::pipeline::{FailureKind, FileAnalysis};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("failure histogram sums to {histogram} but {failed} files failed")]
    FailureCountMismatch { histogram: u64, failed: u64 },
    #[error("category {0} has a zero count")]
    EmptyCategory(String),
    #[error("browser {0} has a host with a zero count")]
    EmptyHost(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    /// Entity label to number of retained entities.
    pub entity_counts: BTreeMap<String, u64>,
    pub email_addresses: BTreeSet<String>,
    /// Browser to host to number of artifacts.
    pub social_counts: BTreeMap<String, BTreeMap<String, u64>>,
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub failure_counts: BTreeMap<FailureKind, u64>,
    pub partitions: BTreeSet<String>,
}

impl AggregateReport {
    pub fn from_analyses<'a, I>(analyses: I) -> Self
    where
        I: IntoIterator<Item = &'a FileAnalysis>,
    {
        let mut report = Self::default();
        for analysis in analyses {
            report.add_analysis(analysis);
        }
        report
    }

    pub fn add_analysis(&mut self, analysis: &FileAnalysis) {
        self.partitions.insert(analysis.partition.clone());
        match &analysis.result {
            Ok(entities) => {
                self.files_succeeded += 1;
                for entity in entities {
                    *self.entity_counts.entry(entity.label.clone()).or_insert(0) += 1;
                }
            }
            Err(failure) => {
                self.files_failed += 1;
                *self.failure_counts.entry(failure.kind).or_insert(0) += 1;
            }
        }
    }

    pub fn add_emails<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email_addresses.extend(addresses.into_iter().map(Into::into));
    }

    pub fn add_social<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a SocialRecord>,
    {
        for record in records {
            *self
                .social_counts
                .entry(record.browser.to_string())
                .or_default()
                .entry(record.host.clone())
                .or_insert(0) += 1;
        }
    }

    /// Combine two partial reports, e.g. from different partitions.
    pub fn merge(mut self, other: AggregateReport) -> AggregateReport {
        for (label, count) in other.entity_counts {
            *self.entity_counts.entry(label).or_insert(0) += count;
        }
        self.email_addresses.extend(other.email_addresses);
        for (browser, hosts) in other.social_counts {
            let target = self.social_counts.entry(browser).or_default();
            for (host, count) in hosts {
                *target.entry(host).or_insert(0) += count;
            }
        }
        self.files_succeeded += other.files_succeeded;
        self.files_failed += other.files_failed;
        for (kind, count) in other.failure_counts {
            *self.failure_counts.entry(kind).or_insert(0) += count;
        }
        self.partitions.extend(other.partitions);
        self
    }

    pub fn total_entities(&self) -> u64 {
        self.entity_counts.values().sum()
    }

    pub fn files_total(&self) -> u64 {
        self.files_succeeded + self.files_failed
    }

    pub fn check(&self) -> Result<(), AggregationError> {
        let histogram: u64 = self.failure_counts.values().sum();
        if histogram != self.files_failed {
            return Err(AggregationError::FailureCountMismatch {
                histogram,
                failed: self.files_failed,
            });
        }
        if let Some((label, _)) = self.entity_counts.iter().find(|(_, count)| **count == 0) {
            return Err(AggregationError::EmptyCategory(label.clone()));
        }
        for (browser, hosts) in &self.social_counts {
            if hosts.is_empty() || hosts.values().any(|count| *count == 0) {
                return Err(AggregationError::EmptyHost(browser.clone()));
            }
        }
        Ok(())
    }
}
