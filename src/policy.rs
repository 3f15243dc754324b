// 📏 Resolution Policy - Acceptance rules as data
// Rank-specific thresholds and naming conventions, loadable from JSON so the
// rules stay auditable instead of hiding in the classifier.

use crate::taxonomy::{TaxonRank, TaxonomicStatus};
use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_PROJECT_CODE: &str = "BGE";
pub const DEFAULT_DESCRIPTION_BASE_URL: &str = "https://www.gbif.org/species/";

// ============================================================================
// RANK RULE
// ============================================================================

/// What a backbone candidate must satisfy to be accepted for a query at `rank`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRule {
    pub rank: TaxonRank,

    /// Minimum confidence (0-100), inclusive
    pub min_confidence: u8,

    /// Require matchType = EXACT
    #[serde(default = "default_true")]
    pub require_exact: bool,

    /// Statuses that count as accepted
    #[serde(default = "default_accepted_statuses")]
    pub accepted_statuses: Vec<TaxonomicStatus>,
}

fn default_true() -> bool {
    true
}

fn default_accepted_statuses() -> Vec<TaxonomicStatus> {
    vec![TaxonomicStatus::Accepted]
}

impl RankRule {
    pub fn new(rank: TaxonRank, min_confidence: u8) -> Self {
        RankRule {
            rank,
            min_confidence,
            require_exact: true,
            accepted_statuses: default_accepted_statuses(),
        }
    }

    pub fn accepts_status(&self, status: &TaxonomicStatus) -> bool {
        self.accepted_statuses.contains(status)
    }
}

// ============================================================================
// RESOLUTION POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    /// Acceptance rules, one per rank that is looked up
    pub rules: Vec<RankRule>,

    /// Look up and classify family-rank placeholders too.
    /// When false, family feeds the proposed name only.
    pub family_lookup: bool,

    /// Cell values treated as "no identification" (case-insensitive)
    pub missing_values: Vec<String>,

    /// Open-nomenclature tokens that make a species name unusable
    pub open_nomenclature_markers: Vec<String>,

    /// Prefix for the ENA project_id column
    pub project_code: String,

    /// Base URL the accepted usage key is appended to
    pub description_base_url: String,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        ResolutionPolicy {
            rules: vec![
                RankRule::new(TaxonRank::Species, 95),
                RankRule::new(TaxonRank::Genus, 90),
                RankRule::new(TaxonRank::Family, 90),
            ],
            family_lookup: false,
            missing_values: ["", "not collected", "nan", "na", "n/a", "none", "null"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            open_nomenclature_markers: ["sp.", "sp", "spp.", "spp", "cf.", "aff.", "nr."]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            project_code: DEFAULT_PROJECT_CODE.to_string(),
            description_base_url: DEFAULT_DESCRIPTION_BASE_URL.to_string(),
        }
    }
}

impl ResolutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a policy from a JSON file. Omitted keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read policy file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
            .with_context(|| format!("Invalid policy file: {:?}", path.as_ref()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let policy: ResolutionPolicy =
            serde_json::from_str(content).context("Failed to parse policy JSON")?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject tables the classifier cannot work with
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.min_confidence > 100 {
                bail!(
                    "{} rule: min_confidence {} exceeds 100",
                    rule.rank,
                    rule.min_confidence
                );
            }
            if rule.accepted_statuses.is_empty() {
                bail!("{} rule: accepted_statuses is empty", rule.rank);
            }
            if self.rules.iter().filter(|r| r.rank == rule.rank).count() > 1 {
                bail!("duplicate rule for rank {}", rule.rank);
            }
        }

        let mut required = vec![TaxonRank::Species, TaxonRank::Genus];
        if self.family_lookup {
            required.push(TaxonRank::Family);
        }
        for rank in required {
            if self.rule_for(rank).is_none() {
                bail!("missing acceptance rule for rank {}", rank);
            }
        }

        Ok(())
    }

    pub fn rule_for(&self, rank: TaxonRank) -> Option<&RankRule> {
        self.rules.iter().find(|r| r.rank == rank)
    }

    /// Does this rank trigger a backbone lookup?
    pub fn looks_up(&self, rank: TaxonRank) -> bool {
        match rank {
            TaxonRank::Family => self.family_lookup,
            _ => true,
        }
    }

    pub fn is_missing(&self, value: &str) -> bool {
        let trimmed = value.trim();
        self.missing_values
            .iter()
            .any(|m| m.trim().eq_ignore_ascii_case(trimmed))
    }

    /// Trimmed cell value, or None if it is a missing-value token
    pub fn clean(&self, value: Option<&str>) -> Option<String> {
        value
            .filter(|v| !self.is_missing(v))
            .map(|v| v.trim().to_string())
    }

    pub fn is_open_nomenclature(&self, token: &str) -> bool {
        self.open_nomenclature_markers
            .iter()
            .any(|m| m.eq_ignore_ascii_case(token))
    }

    pub fn project_id(&self, process_id: &str) -> String {
        format!("{}_{}", self.project_code, process_id)
    }

    pub fn description_url(&self, key: impl std::fmt::Display) -> String {
        format!("{}{}", self.description_base_url, key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
