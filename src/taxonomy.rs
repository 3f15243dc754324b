// 🧬 Taxonomy Model - Records, queries and backbone candidates
// The shared vocabulary of the resolution engine: what a specimen claims
// locally, what we ask the backbone, and what the backbone answers.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RANKS
// ============================================================================

/// Linnaean ranks, declared from coarsest to finest so that `Ord` follows
/// the hierarchy (`Kingdom < ... < Species < Infraspecific`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    /// Subspecies, variety, form and anything else below species
    Infraspecific,
}

impl TaxonRank {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonRank::Kingdom => "kingdom",
            TaxonRank::Phylum => "phylum",
            TaxonRank::Class => "class",
            TaxonRank::Order => "order",
            TaxonRank::Family => "family",
            TaxonRank::Genus => "genus",
            TaxonRank::Species => "species",
            TaxonRank::Infraspecific => "infraspecific",
        }
    }

    /// Rank code as the GBIF backbone spells it
    pub fn gbif_code(&self) -> &'static str {
        match self {
            TaxonRank::Kingdom => "KINGDOM",
            TaxonRank::Phylum => "PHYLUM",
            TaxonRank::Class => "CLASS",
            TaxonRank::Order => "ORDER",
            TaxonRank::Family => "FAMILY",
            TaxonRank::Genus => "GENUS",
            TaxonRank::Species => "SPECIES",
            TaxonRank::Infraspecific => "SUBSPECIES",
        }
    }

    /// Parse a rank from either local ("genus") or backbone ("GENUS") spelling.
    /// Unranked or unknown levels return None.
    pub fn parse(value: &str) -> Option<TaxonRank> {
        match value.trim().to_ascii_uppercase().as_str() {
            "KINGDOM" => Some(TaxonRank::Kingdom),
            "PHYLUM" => Some(TaxonRank::Phylum),
            "CLASS" => Some(TaxonRank::Class),
            "ORDER" => Some(TaxonRank::Order),
            "FAMILY" => Some(TaxonRank::Family),
            "GENUS" => Some(TaxonRank::Genus),
            "SPECIES" => Some(TaxonRank::Species),
            "SUBSPECIES" | "VARIETY" | "SUBVARIETY" | "FORM" | "SUBFORM" | "INFRASPECIFIC_NAME" => {
                Some(TaxonRank::Infraspecific)
            }
            _ => None,
        }
    }

    /// True when `self` sits at `other` or above it in the hierarchy
    pub fn is_at_or_above(&self, other: TaxonRank) -> bool {
        *self <= other
    }
}

impl fmt::Display for TaxonRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `matched_rank` column of the metadata table.
///
/// Anything other than species/genus/family (e.g. "no match") is kept
/// verbatim so it can be echoed into the validation-fails output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedRank {
    Species,
    Genus,
    Family,
    Other(String),
}

impl MatchedRank {
    pub fn parse(value: &str) -> MatchedRank {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "species" => MatchedRank::Species,
            "genus" => MatchedRank::Genus,
            "family" => MatchedRank::Family,
            _ => MatchedRank::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MatchedRank::Species => "species",
            MatchedRank::Genus => "genus",
            MatchedRank::Family => "family",
            MatchedRank::Other(raw) => raw,
        }
    }
}

impl fmt::Display for MatchedRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BACKBONE ENUMERATIONS
// ============================================================================

/// Taxonomic status reported by the backbone. Unknown statuses are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaxonomicStatus {
    Accepted,
    Synonym,
    Doubtful,
    Other(String),
}

impl TaxonomicStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaxonomicStatus::Accepted => "ACCEPTED",
            TaxonomicStatus::Synonym => "SYNONYM",
            TaxonomicStatus::Doubtful => "DOUBTFUL",
            TaxonomicStatus::Other(raw) => raw,
        }
    }

    /// Plain and qualified synonyms (HETEROTYPIC_SYNONYM, PROPARTE_SYNONYM, ...)
    pub fn is_synonym(&self) -> bool {
        match self {
            TaxonomicStatus::Synonym => true,
            TaxonomicStatus::Other(raw) => raw.ends_with("_SYNONYM"),
            _ => false,
        }
    }
}

impl From<String> for TaxonomicStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACCEPTED" => TaxonomicStatus::Accepted,
            "SYNONYM" => TaxonomicStatus::Synonym,
            "DOUBTFUL" => TaxonomicStatus::Doubtful,
            other => TaxonomicStatus::Other(other.to_string()),
        }
    }
}

impl From<TaxonomicStatus> for String {
    fn from(value: TaxonomicStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaxonomicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the backbone matched the submitted name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    Exact,
    Fuzzy,
    /// Name not found; backbone fell back to a higher taxon
    HigherRank,
    None,
    Other(String),
}

impl MatchType {
    pub fn as_str(&self) -> &str {
        match self {
            MatchType::Exact => "EXACT",
            MatchType::Fuzzy => "FUZZY",
            MatchType::HigherRank => "HIGHERRANK",
            MatchType::None => "NONE",
            MatchType::Other(raw) => raw,
        }
    }
}

impl From<String> for MatchType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "EXACT" => MatchType::Exact,
            "FUZZY" => MatchType::Fuzzy,
            "HIGHERRANK" => MatchType::HigherRank,
            "NONE" | "" => MatchType::None,
            other => MatchType::Other(other.to_string()),
        }
    }
}

impl From<MatchType> for String {
    fn from(value: MatchType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backbone usage key (GBIF `usageKey`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageKey(pub u64);

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// LINEAGE
// ============================================================================

/// Names at each major rank. Used both for the local identification of a
/// specimen and for the lineage the backbone returns with a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kingdom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phylum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}

impl Lineage {
    /// Name recorded at `rank`, if any
    pub fn at(&self, rank: TaxonRank) -> Option<&str> {
        let value = match rank {
            TaxonRank::Kingdom => &self.kingdom,
            TaxonRank::Phylum => &self.phylum,
            TaxonRank::Class => &self.class,
            TaxonRank::Order => &self.order,
            TaxonRank::Family => &self.family,
            TaxonRank::Genus => &self.genus,
            TaxonRank::Species => &self.species,
            TaxonRank::Infraspecific => return None,
        };
        value.as_deref()
    }
}

// ============================================================================
// CANDIDATE RECORD (local claim)
// ============================================================================

/// One specimen's local taxonomic claim, produced by the input join.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    /// Specimen identifier (BOLD Process ID), unique within a run
    pub process_id: String,

    /// Local identification; missing-value tokens are already stripped
    pub lineage: Lineage,

    /// Finest rank with a local identification
    pub matched_rank: MatchedRank,

    /// Pre-existing accession taxid, if the specimen already has one
    pub taxid: Option<String>,
}

impl CandidateRecord {
    pub fn new(process_id: impl Into<String>, matched_rank: MatchedRank) -> Self {
        CandidateRecord {
            process_id: process_id.into(),
            lineage: Lineage::default(),
            matched_rank,
            taxid: None,
        }
    }

    /// Builder: set the local name at `rank`
    pub fn with_name(mut self, rank: TaxonRank, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match rank {
            TaxonRank::Kingdom => self.lineage.kingdom = name,
            TaxonRank::Phylum => self.lineage.phylum = name,
            TaxonRank::Class => self.lineage.class = name,
            TaxonRank::Order => self.lineage.order = name,
            TaxonRank::Family => self.lineage.family = name,
            TaxonRank::Genus => self.lineage.genus = name,
            TaxonRank::Species | TaxonRank::Infraspecific => self.lineage.species = name,
        }
        self
    }

    /// Builder: set the existing taxid
    pub fn with_taxid(mut self, taxid: impl Into<String>) -> Self {
        self.taxid = Some(taxid.into());
        self
    }

    /// Already registered at species level, so no request is needed
    pub fn is_registered(&self) -> bool {
        self.matched_rank == MatchedRank::Species && self.taxid.is_some()
    }
}

// ============================================================================
// SUBJECT QUERY (what we ask the backbone)
// ============================================================================

/// ENA taxonomy request name type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameType {
    PublishedName,
    NovelSpecies,
    PlaceholderName,
}

impl NameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameType::PublishedName => "published_name",
            NameType::NovelSpecies => "novel_species",
            NameType::PlaceholderName => "placeholder_name",
        }
    }
}

impl fmt::Display for NameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name submitted for lookup, plus the name we will propose to ENA.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectQuery {
    pub process_id: String,
    pub subject_name: String,
    pub subject_rank: TaxonRank,
    pub name_type: NameType,
    pub proposed_name: String,
    /// Local lineage, carried along for the class/order cross-check
    pub local_lineage: Lineage,
}

// ============================================================================
// MATCH CANDIDATE (what the backbone answers)
// ============================================================================

/// One backbone match. Serialized field names follow the GBIF
/// species-match response so recorded responses can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub usage_key: UsageKey,
    pub scientific_name: String,
    #[serde(default)]
    pub canonical_name: Option<String>,
    /// Backbone rank code, kept verbatim (e.g. "SPECIES", "UNRANKED")
    pub rank: String,
    pub status: TaxonomicStatus,
    pub confidence: u8,
    pub match_type: MatchType,
    #[serde(flatten)]
    pub lineage: Lineage,
    #[serde(default)]
    pub synonym: bool,
    #[serde(default)]
    pub accepted_usage_key: Option<UsageKey>,
}

impl MatchCandidate {
    pub fn taxon_rank(&self) -> Option<TaxonRank> {
        TaxonRank::parse(&self.rank)
    }

    /// Identifier after synonym redirection
    pub fn resolved_key(&self) -> UsageKey {
        self.accepted_usage_key.unwrap_or(self.usage_key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
