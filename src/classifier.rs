// ⚖️ Consistency Classifier - Decide whether a backbone match can be trusted
//
// A candidate is acceptable when it passes every condition of the rank rule:
//   status accepted + exact match + confidence >= threshold + plausible rank/lineage
// Acceptable candidates are redirected through acceptedUsageKey and must
// converge on a single identifier.

use crate::policy::{RankRule, ResolutionPolicy};
use crate::taxonomy::{MatchCandidate, MatchType, SubjectQuery, TaxonRank, TaxonomicStatus, UsageKey};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// REASONS
// ============================================================================

/// Why a record ended in the validation-fails stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FailureReason {
    NoUsableRank,
    NoMatchReturned,
    LookupTransport(String),
    NoAcceptanceRule(TaxonRank),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoUsableRank => write!(f, "no usable taxonomic rank"),
            FailureReason::NoMatchReturned => write!(f, "no match returned"),
            FailureReason::LookupTransport(detail) => {
                write!(f, "lookup transport failure: {}", detail)
            }
            FailureReason::NoAcceptanceRule(rank) => {
                write!(f, "no acceptance rule for rank {}", rank)
            }
        }
    }
}

/// One failed acceptability condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InconsistencyReason {
    LowConfidence {
        usage_key: UsageKey,
        confidence: u8,
        threshold: u8,
    },
    NonExactMatch {
        usage_key: UsageKey,
        match_type: MatchType,
    },
    NonAcceptedStatus {
        usage_key: UsageKey,
        status: TaxonomicStatus,
    },
    RankMismatch {
        usage_key: UsageKey,
        rank: String,
        expected: TaxonRank,
    },
    LineageMismatch {
        usage_key: UsageKey,
        detail: String,
    },
    /// Acceptable candidates resolve to more than one identifier.
    /// `usage_keys` names the acceptable candidates, `keys` what they resolve to.
    MultipleSynonymousIdentifiers {
        keys: Vec<UsageKey>,
        usage_keys: Vec<UsageKey>,
    },
}

impl InconsistencyReason {
    /// Short category used in reports and for grouping
    pub fn label(&self) -> &'static str {
        match self {
            InconsistencyReason::LowConfidence { .. } => "low confidence",
            InconsistencyReason::NonExactMatch { .. } => "non-exact match",
            InconsistencyReason::NonAcceptedStatus { .. } => "non-accepted status",
            InconsistencyReason::RankMismatch { .. } | InconsistencyReason::LineageMismatch { .. } => {
                "rank/lineage mismatch"
            }
            InconsistencyReason::MultipleSynonymousIdentifiers { .. } => {
                "multiple synonymous identifiers"
            }
        }
    }

    /// Does this reason concern the given candidate?
    pub fn concerns(&self, candidate: &MatchCandidate) -> bool {
        match self {
            InconsistencyReason::LowConfidence { usage_key, .. }
            | InconsistencyReason::NonExactMatch { usage_key, .. }
            | InconsistencyReason::NonAcceptedStatus { usage_key, .. }
            | InconsistencyReason::RankMismatch { usage_key, .. }
            | InconsistencyReason::LineageMismatch { usage_key, .. } => {
                *usage_key == candidate.usage_key
            }
            InconsistencyReason::MultipleSynonymousIdentifiers { usage_keys, .. } => {
                usage_keys.contains(&candidate.usage_key)
            }
        }
    }
}

impl fmt::Display for InconsistencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InconsistencyReason::LowConfidence {
                usage_key,
                confidence,
                threshold,
            } => write!(
                f,
                "low confidence (usageKey {}: {} < {})",
                usage_key, confidence, threshold
            ),
            InconsistencyReason::NonExactMatch {
                usage_key,
                match_type,
            } => write!(f, "non-exact match (usageKey {}: {})", usage_key, match_type),
            InconsistencyReason::NonAcceptedStatus { usage_key, status } => {
                write!(f, "non-accepted status (usageKey {}: {})", usage_key, status)
            }
            InconsistencyReason::RankMismatch {
                usage_key,
                rank,
                expected,
            } => write!(
                f,
                "rank/lineage mismatch (usageKey {}: rank {} finer than {})",
                usage_key, rank, expected
            ),
            InconsistencyReason::LineageMismatch { usage_key, detail } => {
                write!(f, "rank/lineage mismatch (usageKey {}: {})", usage_key, detail)
            }
            InconsistencyReason::MultipleSynonymousIdentifiers { keys, .. } => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "multiple synonymous identifiers ({})", keys.join(", "))
            }
        }
    }
}

// ============================================================================
// CLASSIFICATION OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    /// Safe to submit: one backbone identifier backs the proposed name
    Accepted {
        proposed_name: String,
        external_identifier: UsageKey,
    },

    /// Needs manual review; every candidate and every failed condition is kept
    Inconsistent {
        candidates: Vec<MatchCandidate>,
        reasons: Vec<InconsistencyReason>,
    },

    /// Could not be validated at all
    ValidationFailed { reason: FailureReason },

    /// Family placeholder submitted by name only, without a backbone lookup
    NamingOnly { proposed_name: String },
}

impl ClassificationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ClassificationOutcome::Accepted { .. } => "accepted",
            ClassificationOutcome::Inconsistent { .. } => "inconsistent",
            ClassificationOutcome::ValidationFailed { .. } => "validation_failed",
            ClassificationOutcome::NamingOnly { .. } => "naming_only",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ClassificationOutcome::Accepted { .. })
    }

    pub fn failed(reason: FailureReason) -> Self {
        ClassificationOutcome::ValidationFailed { reason }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct ConsistencyClassifier<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> ConsistencyClassifier<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        ConsistencyClassifier { policy }
    }

    /// Classify the backbone's answer for one subject query
    pub fn classify(&self, query: &SubjectQuery, candidates: &[MatchCandidate]) -> ClassificationOutcome {
        if candidates.is_empty() {
            return ClassificationOutcome::failed(FailureReason::NoMatchReturned);
        }

        let rule = match self.policy.rule_for(query.subject_rank) {
            Some(rule) => rule,
            None => {
                return ClassificationOutcome::failed(FailureReason::NoAcceptanceRule(
                    query.subject_rank,
                ))
            }
        };

        let mut reasons = Vec::new();
        let mut resolved = BTreeSet::new();
        let mut acceptable = Vec::new();

        for candidate in candidates {
            let failures = self.assess(query, candidate, rule);
            if failures.is_empty() {
                resolved.insert(candidate.resolved_key());
                acceptable.push(candidate.usage_key);
            }
            for failure in failures {
                if !reasons.contains(&failure) {
                    reasons.push(failure);
                }
            }
        }

        if resolved.len() == 1 {
            if let Some(key) = resolved.into_iter().next() {
                return ClassificationOutcome::Accepted {
                    proposed_name: query.proposed_name.clone(),
                    external_identifier: key,
                };
            }
        } else if resolved.len() > 1 {
            reasons.push(InconsistencyReason::MultipleSynonymousIdentifiers {
                keys: resolved.into_iter().collect(),
                usage_keys: acceptable,
            });
        }

        ClassificationOutcome::Inconsistent {
            candidates: candidates.to_vec(),
            reasons,
        }
    }

    /// Every condition of `rule` that `candidate` fails. Empty means acceptable.
    pub fn assess(
        &self,
        query: &SubjectQuery,
        candidate: &MatchCandidate,
        rule: &RankRule,
    ) -> Vec<InconsistencyReason> {
        let mut failures = Vec::new();
        let usage_key = candidate.usage_key;

        if candidate.confidence < rule.min_confidence {
            failures.push(InconsistencyReason::LowConfidence {
                usage_key,
                confidence: candidate.confidence,
                threshold: rule.min_confidence,
            });
        }

        if rule.require_exact && candidate.match_type != MatchType::Exact {
            failures.push(InconsistencyReason::NonExactMatch {
                usage_key,
                match_type: candidate.match_type.clone(),
            });
        }

        if !rule.accepts_status(&candidate.status) {
            failures.push(InconsistencyReason::NonAcceptedStatus {
                usage_key,
                status: candidate.status.clone(),
            });
        }

        let rank_ok = candidate
            .taxon_rank()
            .map_or(false, |rank| rank.is_at_or_above(query.subject_rank));
        if !rank_ok {
            failures.push(InconsistencyReason::RankMismatch {
                usage_key,
                rank: candidate.rank.clone(),
                expected: query.subject_rank,
            });
        }

        if let Some(detail) = lineage_conflict(query, candidate) {
            failures.push(InconsistencyReason::LineageMismatch { usage_key, detail });
        }

        failures
    }
}

/// Cross-check the backbone's order/class against the local identification.
///
/// The backbone must report both. When the specimen has a local order or
/// class, at least one of them has to agree.
fn lineage_conflict(query: &SubjectQuery, candidate: &MatchCandidate) -> Option<String> {
    let (backbone_order, backbone_class) =
        match (&candidate.lineage.order, &candidate.lineage.class) {
            (Some(order), Some(class)) => (order, class),
            _ => return Some("order or class missing from backbone lineage".to_string()),
        };

    let local = &query.local_lineage;
    if local.order.is_none() && local.class.is_none() {
        return None;
    }

    let same = |local: &Option<String>, backbone: &str| {
        local
            .as_deref()
            .map_or(false, |l| l.trim().eq_ignore_ascii_case(backbone.trim()))
    };

    if same(&local.order, backbone_order) || same(&local.class, backbone_class) {
        None
    } else {
        Some(format!(
            "local order {} / class {} vs backbone order {} / class {}",
            local.order.as_deref().unwrap_or("-"),
            local.class.as_deref().unwrap_or("-"),
            backbone_order,
            backbone_class
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
