// 🏷️ Name Selector - Hierarchical fallback from species to family
//
// Priority cascade (first match wins):
//   1. matched_rank = species + well-formed binomial  → published_name
//   2. matched_rank = genus + genus present           → "<Genus> sp. <id>"   novel_species
//   3. family present                                  → "<Family> sp. <id>"  placeholder_name
//   4. nothing usable                                  → no usable taxonomic rank

use crate::classifier::FailureReason;
use crate::policy::ResolutionPolicy;
use crate::taxonomy::{CandidateRecord, MatchedRank, NameType, SubjectQuery, TaxonRank};

/// Pick the subject name and proposed name for a record. Pure function.
pub fn select(
    record: &CandidateRecord,
    policy: &ResolutionPolicy,
) -> Result<SubjectQuery, FailureReason> {
    let lineage = &record.lineage;
    let present = |value: &Option<String>| policy.clean(value.as_deref());

    let query = |subject_name: String,
                 subject_rank: TaxonRank,
                 name_type: NameType,
                 proposed_name: String| SubjectQuery {
        process_id: record.process_id.clone(),
        subject_name,
        subject_rank,
        name_type,
        proposed_name,
        local_lineage: lineage.clone(),
    };

    if record.matched_rank == MatchedRank::Species {
        if let Some(species) = present(&lineage.species).filter(|s| is_binomial(s, policy)) {
            let species = normalize_spaces(&species);
            return Ok(query(
                species.clone(),
                TaxonRank::Species,
                NameType::PublishedName,
                species,
            ));
        }
    }

    if record.matched_rank == MatchedRank::Genus {
        if let Some(genus) = present(&lineage.genus) {
            let proposed = format!("{} sp. {}", genus, record.process_id);
            return Ok(query(genus, TaxonRank::Genus, NameType::NovelSpecies, proposed));
        }
    }

    if let Some(family) = present(&lineage.family) {
        let proposed = format!("{} sp. {}", family, record.process_id);
        return Ok(query(
            family,
            TaxonRank::Family,
            NameType::PlaceholderName,
            proposed,
        ));
    }

    Err(FailureReason::NoUsableRank)
}

/// At least genus + epithet, and no open-nomenclature marker (sp., cf., aff. ...)
fn is_binomial(name: &str, policy: &ResolutionPolicy) -> bool {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    tokens.len() >= 2 && !tokens.iter().any(|t| policy.is_open_nomenclature(t))
}

fn normalize_spaces(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
