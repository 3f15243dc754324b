// ⚙️ Resolution Engine - Drive every record through select → lookup → classify → route
//
// Lookups are memoized per subject name for the whole run. With more than
// one worker the distinct names are prefetched by a bounded pool of scoped
// threads; classification and routing always run in input order so the
// output files do not depend on scheduling.

use crate::classifier::{ClassificationOutcome, ConsistencyClassifier, FailureReason};
use crate::input::{self, JoinOptions};
use crate::oracle::{LookupResult, MatchOracle};
use crate::policy::ResolutionPolicy;
use crate::report::{RunReporter, RunSummary};
use crate::router::{OutputPaths, OutputSink, RecordRouter, RowCounts};
use crate::selector;
use crate::taxonomy::{CandidateRecord, SubjectQuery, TaxonRank};
use anyhow::{Context as AnyhowContext, Result};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;
use std::thread;

// ============================================================================
// LOOKUP CACHE
// ============================================================================

/// Run-scoped memo of oracle answers, keyed by subject name.
/// Failures are cached too: one attempt per name per run.
#[derive(Default)]
pub struct LookupCache {
    entries: RwLock<HashMap<String, LookupResult>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<LookupResult> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn insert(&self, name: &str, result: LookupResult) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), result);
    }

    /// Cached answer, or ask the oracle once and remember the answer
    pub fn get_or_lookup(&self, oracle: &dyn MatchOracle, name: &str, rank: TaxonRank) -> LookupResult {
        if let Some(hit) = self.get(name) {
            return hit;
        }
        let result = oracle.lookup(name, rank);
        self.insert(name, result.clone());
        result
    }

    /// Distinct names looked up so far
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// RUN CONTEXT
// ============================================================================

/// Everything scoped to one invocation
pub struct RunContext {
    pub policy: ResolutionPolicy,
    pub cache: LookupCache,
    pub reporter: RunReporter,
    /// Lookup threads; 1 means strictly sequential
    pub workers: usize,
}

impl RunContext {
    pub fn new(policy: ResolutionPolicy) -> Self {
        RunContext {
            policy,
            cache: LookupCache::new(),
            reporter: RunReporter::new(),
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Select, look up and classify a single record.
///
/// Returns the subject query (None when no usable rank exists) and the
/// terminal outcome.
pub fn resolve_record(
    ctx: &RunContext,
    oracle: &dyn MatchOracle,
    record: &CandidateRecord,
) -> (Option<SubjectQuery>, ClassificationOutcome) {
    let query = match selector::select(record, &ctx.policy) {
        Ok(query) => query,
        Err(reason) => return (None, ClassificationOutcome::failed(reason)),
    };

    if !ctx.policy.looks_up(query.subject_rank) {
        let outcome = ClassificationOutcome::NamingOnly {
            proposed_name: query.proposed_name.clone(),
        };
        return (Some(query), outcome);
    }

    let outcome = match ctx
        .cache
        .get_or_lookup(oracle, &query.subject_name, query.subject_rank)
    {
        Ok(candidates) => ConsistencyClassifier::new(&ctx.policy).classify(&query, &candidates),
        Err(e) => ClassificationOutcome::failed(FailureReason::LookupTransport(e.to_string())),
    };

    (Some(query), outcome)
}

/// Distinct subject names that need a lookup, in first-seen order
fn pending_lookups(ctx: &RunContext, records: &[CandidateRecord]) -> Vec<(String, TaxonRank)> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| selector::select(record, &ctx.policy).ok())
        .filter(|query| ctx.policy.looks_up(query.subject_rank))
        .filter(|query| ctx.cache.get(&query.subject_name).is_none())
        .filter(|query| seen.insert(query.subject_name.clone()))
        .map(|query| (query.subject_name, query.subject_rank))
        .collect()
}

/// Fill the cache with a bounded pool of scoped threads.
/// Each name belongs to exactly one worker, so it is looked up once.
fn prefetch(ctx: &RunContext, oracle: &dyn MatchOracle, records: &[CandidateRecord]) {
    let pending = pending_lookups(ctx, records);
    if pending.is_empty() {
        return;
    }

    let workers = ctx.workers.min(pending.len());
    tracing::debug!(names = pending.len(), workers, "Prefetching backbone lookups");

    thread::scope(|scope| {
        for worker in 0..workers {
            let pending = &pending;
            let cache = &ctx.cache;
            scope.spawn(move || {
                for (name, rank) in pending.iter().skip(worker).step_by(workers) {
                    cache.insert(name, oracle.lookup(name, *rank));
                }
            });
        }
    });
}

/// Process every record and write exactly one routed entry for each
pub fn run<W: Write>(
    ctx: &RunContext,
    oracle: &dyn MatchOracle,
    records: &[CandidateRecord],
    sink: &mut OutputSink<W>,
) -> Result<RowCounts> {
    tracing::info!(
        run_id = %ctx.reporter.run_id(),
        records = records.len(),
        workers = ctx.workers,
        oracle = %oracle.describe(),
        "Resolving records"
    );

    if ctx.workers > 1 {
        prefetch(ctx, oracle, records);
    }

    let router = RecordRouter::new(&ctx.policy);
    for record in records {
        let (query, outcome) = resolve_record(ctx, oracle, record);
        ctx.reporter.record(record, query.as_ref(), &outcome);
        let row = router.route(record, query.as_ref(), &outcome);
        sink.write(&row)
            .with_context(|| format!("Failed to write output for {}", record.process_id))?;
    }

    Ok(sink.counts())
}

// ============================================================================
// END-TO-END
// ============================================================================

/// One invocation, fully described
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub metadata: PathBuf,
    pub samples: PathBuf,
    pub outputs: OutputPaths,
    pub policy: ResolutionPolicy,
    pub join: JoinOptions,
    pub workers: usize,
}

/// Load and join the inputs, resolve every record, write the three outputs.
///
/// Input problems abort before the first lookup and before any output file
/// is created.
pub fn execute(config: RunConfig, oracle: &dyn MatchOracle) -> Result<RunSummary> {
    let metadata = input::load_metadata(&config.metadata, &config.policy)
        .context("Failed to load metadata table")?;
    let samples = input::load_samples(&config.samples).context("Failed to load sample list")?;
    let (records, _report) =
        input::join(metadata, &samples, config.join).context("Failed to join inputs")?;

    let mut sink = OutputSink::create(&config.outputs)?;
    let ctx = RunContext::new(config.policy).with_workers(config.workers);

    let counts = run(&ctx, oracle, &records, &mut sink)?;
    let files = sink.finish()?;
    for mut file in [files.taxonomy_request, files.gbif_inconsistent, files.tax_validation_fails] {
        file.flush().context("Failed to flush output file")?;
    }

    ctx.reporter.finish(&config.outputs, counts, ctx.cache.len())
}

// ============================================================================
// TESTS
// ============================================================================
