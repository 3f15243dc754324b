// 🔭 Match Oracle - The backbone lookup capability
//
// The engine never talks HTTP directly; it asks a `MatchOracle`.
// `GbifClient` (feature "gbif") is the live implementation, `ScriptedOracle`
// replays canned answers for tests and offline re-runs.

use crate::error::OracleError;
use crate::taxonomy::{MatchCandidate, TaxonRank};
use anyhow::{Context as AnyhowContext, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Answer of one lookup: zero or more candidates, or a transport failure
pub type LookupResult = std::result::Result<Vec<MatchCandidate>, OracleError>;

/// Nomenclature backbone lookup.
///
/// Implementations must return `Ok(vec![])` when the backbone has no match;
/// `Err` is reserved for transport problems.
pub trait MatchOracle: Send + Sync {
    /// Look up `name`. `rank` is the rank the name is claimed at and may be
    /// used as a query hint.
    fn lookup(&self, name: &str, rank: TaxonRank) -> LookupResult;

    /// Short name for logs
    fn describe(&self) -> String {
        "oracle".to_string()
    }
}

// ============================================================================
// SCRIPTED ORACLE
// ============================================================================

/// In-memory oracle with fixed answers per name. Unknown names get no match.
pub struct ScriptedOracle {
    responses: HashMap<String, LookupResult>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        ScriptedOracle {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Load recorded responses: a JSON object mapping name → candidate array
    /// (GBIF field names).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read replay file: {:?}", path.as_ref()))?;

        let recorded: BTreeMap<String, Vec<MatchCandidate>> =
            serde_json::from_str(&content).context("Failed to parse replay JSON")?;

        let mut oracle = ScriptedOracle::new();
        for (name, candidates) in recorded {
            oracle = oracle.with_candidates(name, candidates);
        }
        Ok(oracle)
    }

    /// Builder: answer `name` with `candidates`
    pub fn with_candidates(mut self, name: impl Into<String>, candidates: Vec<MatchCandidate>) -> Self {
        self.responses.insert(name.into(), Ok(candidates));
        self
    }

    /// Builder: fail lookups of `name`
    pub fn with_failure(mut self, name: impl Into<String>, error: OracleError) -> Self {
        self.responses.insert(name.into(), Err(error));
        self
    }

    /// Names looked up so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchOracle for ScriptedOracle {
    fn lookup(&self, name: &str, _rank: TaxonRank) -> LookupResult {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(name.to_string());

        self.responses
            .get(name)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn describe(&self) -> String {
        format!("scripted ({} names)", self.responses.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================
