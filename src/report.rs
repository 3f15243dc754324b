// 📋 Run Reporter - One log line per record, one summary per run
//
// Per-record lines go through `tracing` with structured fields; the summary
// carries SHA-256 digests of the output files so two runs can be compared
// without diffing them.

use crate::classifier::ClassificationOutcome;
use crate::router::{OutputPaths, OutputStream, RowCounts};
use crate::taxonomy::{CandidateRecord, SubjectQuery};
use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub accepted: usize,
    pub naming_only: usize,
    pub inconsistent: usize,
    pub validation_failed: usize,
}

impl OutcomeTally {
    pub fn total(&self) -> usize {
        self.accepted + self.naming_only + self.inconsistent + self.validation_failed
    }

    fn add(&mut self, outcome: &ClassificationOutcome) {
        match outcome {
            ClassificationOutcome::Accepted { .. } => self.accepted += 1,
            ClassificationOutcome::NamingOnly { .. } => self.naming_only += 1,
            ClassificationOutcome::Inconsistent { .. } => self.inconsistent += 1,
            ClassificationOutcome::ValidationFailed { .. } => self.validation_failed += 1,
        }
    }
}

pub struct RunReporter {
    run_id: String,
    started_at: DateTime<Utc>,
    tally: Mutex<OutcomeTally>,
}

impl RunReporter {
    pub fn new() -> Self {
        RunReporter {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            tally: Mutex::new(OutcomeTally::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log the outcome of one record and count it
    pub fn record(
        &self,
        record: &CandidateRecord,
        query: Option<&SubjectQuery>,
        outcome: &ClassificationOutcome,
    ) {
        let subject = query.map(|q| q.subject_name.as_str()).unwrap_or("");
        let rank = query.map(|q| q.subject_rank.as_str()).unwrap_or("");

        match outcome {
            ClassificationOutcome::Accepted {
                proposed_name,
                external_identifier,
            } => tracing::info!(
                process_id = %record.process_id,
                outcome = outcome.label(),
                subject = %subject,
                rank = %rank,
                usage_key = %external_identifier,
                "Accepted: {}",
                proposed_name
            ),
            ClassificationOutcome::NamingOnly { proposed_name } => tracing::info!(
                process_id = %record.process_id,
                outcome = outcome.label(),
                subject = %subject,
                rank = %rank,
                "Naming only: {}",
                proposed_name
            ),
            ClassificationOutcome::Inconsistent {
                candidates,
                reasons,
            } => {
                let reasons: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                tracing::warn!(
                    process_id = %record.process_id,
                    outcome = outcome.label(),
                    subject = %subject,
                    rank = %rank,
                    candidates = candidates.len(),
                    "Inconsistent: {}",
                    reasons.join("; ")
                );
            }
            ClassificationOutcome::ValidationFailed { reason } => tracing::warn!(
                process_id = %record.process_id,
                outcome = outcome.label(),
                subject = %subject,
                rank = %rank,
                "Validation failed: {}",
                reason
            ),
        }

        self.tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(outcome);
    }

    pub fn tally(&self) -> OutcomeTally {
        *self
            .tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close the run: digest every output file and log the summary
    pub fn finish(&self, paths: &OutputPaths, rows: RowCounts, lookups: usize) -> Result<RunSummary> {
        let finished_at = Utc::now();

        let outputs = [
            (OutputStream::TaxonomyRequest, rows.taxonomy_request),
            (OutputStream::GbifInconsistent, rows.gbif_inconsistent),
            (OutputStream::TaxValidationFails, rows.tax_validation_fails),
        ]
        .into_iter()
        .map(|(stream, rows)| -> Result<OutputDigest> {
            let path = paths.path(stream);
            Ok(OutputDigest {
                stream: stream.name(),
                path: path.to_path_buf(),
                rows,
                sha256: file_sha256(path)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
            outcomes: self.tally(),
            lookups,
            outputs,
        };
        summary.log();
        Ok(summary)
    }
}

impl Default for RunReporter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDigest {
    pub stream: &'static str,
    pub path: PathBuf,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub outcomes: OutcomeTally,
    /// Oracle calls made (distinct subject names looked up)
    pub lookups: usize,
    pub outputs: Vec<OutputDigest>,
}

impl RunSummary {
    pub fn records(&self) -> usize {
        self.outcomes.total()
    }

    fn log(&self) {
        tracing::info!(
            run_id = %self.run_id,
            records = self.records(),
            accepted = self.outcomes.accepted,
            naming_only = self.outcomes.naming_only,
            inconsistent = self.outcomes.inconsistent,
            validation_failed = self.outcomes.validation_failed,
            lookups = self.lookups,
            duration_ms = self.duration_ms,
            "Run complete"
        );
        for output in &self.outputs {
            tracing::info!(
                stream = output.stream,
                rows = output.rows,
                sha256 = %output.sha256,
                "Wrote {}",
                output.path.display()
            );
        }
    }
}

/// Hex SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read output for digest: {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================
