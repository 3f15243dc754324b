// Taxonomy Request Builder - Core Library
// Resolves local specimen identifications against the GBIF backbone and
// builds ENA taxonomy requests. The binary is a thin CLI over this crate.

pub mod taxonomy;
pub mod error;
pub mod policy;     // Acceptance rules as data
pub mod selector;   // Name Selector - species → genus → family fallback
pub mod oracle;     // Match Oracle trait + scripted oracle
#[cfg(feature = "gbif")]
pub mod gbif;       // Live GBIF species-match client
pub mod classifier; // Consistency Classifier
pub mod router;     // Record Router + output streams
pub mod input;      // Metadata/sample join
pub mod report;     // Run Reporter
pub mod engine;     // Run context + driver

// Re-export commonly used types
pub use taxonomy::{
    CandidateRecord, Lineage, MatchCandidate, MatchType, MatchedRank,
    NameType, SubjectQuery, TaxonRank, TaxonomicStatus, UsageKey,
};
pub use error::{InputError, OracleError};
pub use policy::{RankRule, ResolutionPolicy};
pub use selector::select;
pub use oracle::{LookupResult, MatchOracle, ScriptedOracle};
#[cfg(feature = "gbif")]
pub use gbif::{GbifClient, GBIF_API_URL};
pub use classifier::{
    ClassificationOutcome, ConsistencyClassifier, FailureReason, InconsistencyReason,
};
pub use router::{
    OutputPaths, OutputSink, OutputStream, RecordRouter, RoutedRow, RowCounts,
};
pub use input::{join, load_metadata, load_samples, JoinOptions, JoinReport};
pub use report::{OutcomeTally, RunReporter, RunSummary};
pub use engine::{execute, resolve_record, run, LookupCache, RunConfig, RunContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
