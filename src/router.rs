// 🚦 Record Router - One outcome, one stream
//
//   Accepted / NamingOnly  → <prefix>_taxonomy_request.tsv
//   Inconsistent           → <prefix>_gbif_inconsistent.tsv   (one row per candidate)
//   ValidationFailed       → <prefix>_tax_validation_fails.csv

use crate::classifier::ClassificationOutcome;
use crate::policy::ResolutionPolicy;
use crate::taxonomy::{CandidateRecord, NameType, SubjectQuery, UsageKey};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// STREAMS & PATHS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    TaxonomyRequest,
    GbifInconsistent,
    TaxValidationFails,
}

impl OutputStream {
    pub fn name(&self) -> &'static str {
        match self {
            OutputStream::TaxonomyRequest => "taxonomy_request",
            OutputStream::GbifInconsistent => "gbif_inconsistent",
            OutputStream::TaxValidationFails => "tax_validation_fails",
        }
    }

    fn delimiter(&self) -> u8 {
        match self {
            OutputStream::TaxValidationFails => b',',
            _ => b'\t',
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OutputStream::TaxValidationFails => "csv",
            _ => "tsv",
        }
    }

    fn header(&self) -> &'static [&'static str] {
        match self {
            OutputStream::TaxonomyRequest => TAXONOMY_REQUEST_HEADER,
            OutputStream::GbifInconsistent => GBIF_INCONSISTENT_HEADER,
            OutputStream::TaxValidationFails => TAX_VALIDATION_FAILS_HEADER,
        }
    }
}

const TAXONOMY_REQUEST_HEADER: &[&str] =
    &["proposed_name", "name_type", "host", "project_id", "description"];

const GBIF_INCONSISTENT_HEADER: &[&str] = &[
    "process_id",
    "proposed_name",
    "usageKey",
    "scientificName",
    "canonicalName",
    "rank",
    "status",
    "confidence",
    "matchType",
    "kingdom",
    "phylum",
    "class",
    "order",
    "family",
    "genus",
    "synonym",
    "acceptedUsageKey",
    "reasons",
];

const TAX_VALIDATION_FAILS_HEADER: &[&str] = &[
    "process_id",
    "subject_name",
    "subject_rank",
    "matched_rank",
    "failure_reason",
];

/// Where the three streams (and the run log) go
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub taxonomy_request: PathBuf,
    pub gbif_inconsistent: PathBuf,
    pub tax_validation_fails: PathBuf,
    pub log: PathBuf,
}

impl OutputPaths {
    /// `<prefix>_taxonomy_request.tsv`, `<prefix>_gbif_inconsistent.tsv`,
    /// `<prefix>_tax_validation_fails.csv`, `<prefix>.log`
    pub fn from_prefix(prefix: &str) -> Self {
        let stream_path = |stream: OutputStream| {
            PathBuf::from(format!("{}_{}.{}", prefix, stream.name(), stream.extension()))
        };
        OutputPaths {
            taxonomy_request: stream_path(OutputStream::TaxonomyRequest),
            gbif_inconsistent: stream_path(OutputStream::GbifInconsistent),
            tax_validation_fails: stream_path(OutputStream::TaxValidationFails),
            log: PathBuf::from(format!("{}.log", prefix)),
        }
    }

    pub fn path(&self, stream: OutputStream) -> &Path {
        match stream {
            OutputStream::TaxonomyRequest => &self.taxonomy_request,
            OutputStream::GbifInconsistent => &self.gbif_inconsistent,
            OutputStream::TaxValidationFails => &self.tax_validation_fails,
        }
    }
}

// ============================================================================
// ROWS
// ============================================================================

/// ENA taxonomy request row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyRequestRow {
    pub proposed_name: String,
    pub name_type: NameType,
    pub host: String,
    pub project_id: String,
    pub description: String,
}

/// One rejected backbone candidate, for manual review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InconsistentRow {
    pub process_id: String,
    pub proposed_name: String,
    pub usage_key: UsageKey,
    pub scientific_name: String,
    pub canonical_name: Option<String>,
    pub rank: String,
    pub status: String,
    pub confidence: u8,
    pub match_type: String,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub synonym: bool,
    pub accepted_usage_key: Option<UsageKey>,
    pub reasons: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailRow {
    pub process_id: String,
    pub subject_name: String,
    pub subject_rank: String,
    pub matched_rank: String,
    pub failure_reason: String,
}

/// Everything one record contributes to the outputs
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedRow {
    TaxonomyRequest(TaxonomyRequestRow),
    Inconsistent(Vec<InconsistentRow>),
    ValidationFail(ValidationFailRow),
}

impl RoutedRow {
    pub fn stream(&self) -> OutputStream {
        match self {
            RoutedRow::TaxonomyRequest(_) => OutputStream::TaxonomyRequest,
            RoutedRow::Inconsistent(_) => OutputStream::GbifInconsistent,
            RoutedRow::ValidationFail(_) => OutputStream::TaxValidationFails,
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub struct RecordRouter<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> RecordRouter<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        RecordRouter { policy }
    }

    /// Shape the output for one record. `query` is None only when name
    /// selection failed.
    pub fn route(
        &self,
        record: &CandidateRecord,
        query: Option<&SubjectQuery>,
        outcome: &ClassificationOutcome,
    ) -> RoutedRow {
        match outcome {
            ClassificationOutcome::Accepted {
                proposed_name,
                external_identifier,
            } => RoutedRow::TaxonomyRequest(self.request_row(
                record,
                query,
                proposed_name,
                self.policy.description_url(external_identifier),
            )),

            ClassificationOutcome::NamingOnly { proposed_name } => RoutedRow::TaxonomyRequest(
                self.request_row(record, query, proposed_name, String::new()),
            ),

            ClassificationOutcome::Inconsistent {
                candidates,
                reasons,
            } => {
                let proposed_name = query.map(|q| q.proposed_name.clone()).unwrap_or_default();
                let rows = candidates
                    .iter()
                    .map(|c| {
                        let own: Vec<String> = reasons
                            .iter()
                            .filter(|r| r.concerns(c))
                            .map(|r| r.to_string())
                            .collect();
                        InconsistentRow {
                            process_id: record.process_id.clone(),
                            proposed_name: proposed_name.clone(),
                            usage_key: c.usage_key,
                            scientific_name: c.scientific_name.clone(),
                            canonical_name: c.canonical_name.clone(),
                            rank: c.rank.clone(),
                            status: c.status.to_string(),
                            confidence: c.confidence,
                            match_type: c.match_type.to_string(),
                            kingdom: c.lineage.kingdom.clone(),
                            phylum: c.lineage.phylum.clone(),
                            class: c.lineage.class.clone(),
                            order: c.lineage.order.clone(),
                            family: c.lineage.family.clone(),
                            genus: c.lineage.genus.clone(),
                            synonym: c.synonym,
                            accepted_usage_key: c.accepted_usage_key,
                            reasons: own.join("; "),
                        }
                    })
                    .collect();
                RoutedRow::Inconsistent(rows)
            }

            ClassificationOutcome::ValidationFailed { reason } => {
                RoutedRow::ValidationFail(ValidationFailRow {
                    process_id: record.process_id.clone(),
                    subject_name: query.map(|q| q.subject_name.clone()).unwrap_or_default(),
                    subject_rank: query
                        .map(|q| q.subject_rank.to_string())
                        .unwrap_or_default(),
                    matched_rank: record.matched_rank.to_string(),
                    failure_reason: reason.to_string(),
                })
            }
        }
    }

    fn request_row(
        &self,
        record: &CandidateRecord,
        query: Option<&SubjectQuery>,
        proposed_name: &str,
        description: String,
    ) -> TaxonomyRequestRow {
        TaxonomyRequestRow {
            proposed_name: proposed_name.to_string(),
            name_type: query.map_or(NameType::PublishedName, |q| q.name_type),
            host: String::new(),
            project_id: self.policy.project_id(&record.process_id),
            description,
        }
    }
}

// ============================================================================
// OUTPUT SINK
// ============================================================================

/// Rows written per stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub taxonomy_request: usize,
    pub gbif_inconsistent: usize,
    pub tax_validation_fails: usize,
}

/// The underlying writers, returned by `OutputSink::finish`
pub struct SinkWriters<W> {
    pub taxonomy_request: W,
    pub gbif_inconsistent: W,
    pub tax_validation_fails: W,
}

/// Three csv writers, headers written up front so empty streams still
/// produce a valid file.
pub struct OutputSink<W: Write> {
    taxonomy_request: csv::Writer<W>,
    gbif_inconsistent: csv::Writer<W>,
    tax_validation_fails: csv::Writer<W>,
    counts: RowCounts,
}

impl OutputSink<File> {
    pub fn create(paths: &OutputPaths) -> Result<Self> {
        let open = |stream: OutputStream| -> Result<File> {
            let path = paths.path(stream);
            File::create(path)
                .with_context(|| format!("Failed to create {} output: {:?}", stream.name(), path))
        };

        OutputSink::from_writers(
            open(OutputStream::TaxonomyRequest)?,
            open(OutputStream::GbifInconsistent)?,
            open(OutputStream::TaxValidationFails)?,
        )
    }
}

impl<W: Write> OutputSink<W> {
    pub fn from_writers(taxonomy_request: W, gbif_inconsistent: W, tax_validation_fails: W) -> Result<Self> {
        Ok(OutputSink {
            taxonomy_request: stream_writer(OutputStream::TaxonomyRequest, taxonomy_request)?,
            gbif_inconsistent: stream_writer(OutputStream::GbifInconsistent, gbif_inconsistent)?,
            tax_validation_fails: stream_writer(
                OutputStream::TaxValidationFails,
                tax_validation_fails,
            )?,
            counts: RowCounts::default(),
        })
    }

    pub fn write(&mut self, row: &RoutedRow) -> Result<()> {
        match row {
            RoutedRow::TaxonomyRequest(r) => {
                self.taxonomy_request
                    .serialize(r)
                    .context("Failed to write taxonomy request row")?;
                self.counts.taxonomy_request += 1;
            }
            RoutedRow::Inconsistent(rows) => {
                for r in rows {
                    self.gbif_inconsistent
                        .serialize(r)
                        .context("Failed to write inconsistent row")?;
                }
                self.counts.gbif_inconsistent += rows.len();
            }
            RoutedRow::ValidationFail(r) => {
                self.tax_validation_fails
                    .serialize(r)
                    .context("Failed to write validation failure row")?;
                self.counts.tax_validation_fails += 1;
            }
        }
        Ok(())
    }

    pub fn counts(&self) -> RowCounts {
        self.counts
    }

    /// Flush everything and hand back the writers
    pub fn finish(self) -> Result<SinkWriters<W>> {
        let into_inner = |writer: csv::Writer<W>, stream: OutputStream| -> Result<W> {
            writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("Failed to flush {}: {}", stream.name(), e.error()))
        };

        Ok(SinkWriters {
            taxonomy_request: into_inner(self.taxonomy_request, OutputStream::TaxonomyRequest)?,
            gbif_inconsistent: into_inner(self.gbif_inconsistent, OutputStream::GbifInconsistent)?,
            tax_validation_fails: into_inner(
                self.tax_validation_fails,
                OutputStream::TaxValidationFails,
            )?,
        })
    }
}

fn stream_writer<W: Write>(stream: OutputStream, inner: W) -> Result<csv::Writer<W>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(stream.delimiter())
        .has_headers(false)
        .from_writer(inner);
    writer
        .write_record(stream.header())
        .with_context(|| format!("Failed to write {} header", stream.name()))?;
    Ok(writer)
}

// ============================================================================
// TESTS
// ============================================================================
