//! Per-run import accounting: record-level failures and the immutable
//! [`ImportResult`] aggregate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::association::AmbiguousMatch;
use crate::domain::provider::ProviderKey;
use crate::normalizer::NormalizationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordErrorKind {
    #[error("normalization failed: {0}")]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousMatch),
    #[error("storage conflict: {0}")]
    StorageConflict(String),
}

/// A failure scoped to one payload record; the batch carries on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordError {
    pub index: usize,
    pub key: Option<ProviderKey>,
    pub kind: RecordErrorKind,
}

impl RecordError {
    pub fn new(index: usize, key: Option<ProviderKey>, kind: impl Into<RecordErrorKind>) -> Self {
        Self { index, key, kind: kind.into() }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "record #{} ({key}): {}", self.index, self.kind),
            None => write!(f, "record #{}: {}", self.index, self.kind),
        }
    }
}

impl std::error::Error for RecordError {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    run_id: String,
    data_provider_id: String,
    total_products: usize,
    associated_products: usize,
    not_associated_products: usize,
    errors: Vec<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl ImportResult {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn data_provider_id(&self) -> &str {
        &self.data_provider_id
    }

    pub fn total_products(&self) -> usize {
        self.total_products
    }

    pub fn associated_products(&self) -> usize {
        self.associated_products
    }

    pub fn not_associated_products(&self) -> usize {
        self.not_associated_products
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }
}

impl fmt::Display for ImportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImportResult[total={}, associated={}, unassociated={}, errors={}]",
            self.total_products,
            self.associated_products,
            self.not_associated_products,
            self.errors.len()
        )
    }
}

/// Outcome of one record, fed to [`ImportTally`] in payload order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Associated,
    Unassociated,
    Failed(RecordError),
}

/// Mutable accumulator that can only be turned into an [`ImportResult`] once.
#[derive(Debug)]
pub struct ImportTally {
    run_id: String,
    data_provider_id: String,
    start_time: DateTime<Utc>,
    associated: usize,
    not_associated: usize,
    errors: Vec<String>,
}

impl ImportTally {
    pub fn start(
        run_id: impl Into<String>,
        data_provider_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            data_provider_id: data_provider_id.into(),
            start_time,
            associated: 0,
            not_associated: 0,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Associated => self.associated += 1,
            RecordOutcome::Unassociated => self.not_associated += 1,
            RecordOutcome::Failed(error) => {
                self.not_associated += 1;
                self.errors.push(error.to_string());
            }
        }
    }

    pub fn finish(self, end_time: DateTime<Utc>) -> ImportResult {
        ImportResult {
            run_id: self.run_id,
            data_provider_id: self.data_provider_id,
            total_products: self.associated + self.not_associated,
            associated_products: self.associated,
            not_associated_products: self.not_associated,
            errors: self.errors,
            start_time: self.start_time,
            end_time: end_time.max(self.start_time),
        }
    }
}
