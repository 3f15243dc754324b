// 🌐 GBIF Client - Blocking lookups against /v1/species/match
//
// One request per call, no retries. Supra-specific names carry a rank hint;
// `verbose=true` adds GBIF's alternatives as extra candidates.

use crate::error::OracleError;
use crate::oracle::{LookupResult, MatchOracle};
use crate::taxonomy::{Lineage, MatchCandidate, MatchType, TaxonRank, TaxonomicStatus, UsageKey};
use serde::Deserialize;
use std::time::Duration;

pub const GBIF_API_URL: &str = "https://api.gbif.org";
const MATCH_PATH: &str = "/v1/species/match";

/// GBIF species-match client (blocking).
#[derive(Clone)]
pub struct GbifClient {
    http: reqwest::blocking::Client,
    api_base: String,
    include_alternatives: bool,
}

impl GbifClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("taxonomy-request/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            include_alternatives: false,
        })
    }

    /// Also return GBIF's alternative matches (`verbose=true`) as extra candidates
    pub fn with_alternatives(mut self, include: bool) -> Self {
        self.include_alternatives = include;
        self
    }

    fn match_url(&self) -> String {
        format!("{}{}", self.api_base, MATCH_PATH)
    }
}

impl MatchOracle for GbifClient {
    fn lookup(&self, name: &str, rank: TaxonRank) -> LookupResult {
        let mut params: Vec<(&str, &str)> = vec![("name", name)];
        // Species names are matched unconstrained; supra-specific names get a
        // rank hint so a genus does not match a homonymous species epithet.
        if rank < TaxonRank::Species {
            params.push(("rank", rank.gbif_code()));
        }
        if self.include_alternatives {
            params.push(("verbose", "true"));
        }

        tracing::debug!(name = %name, rank = %rank, url = %self.match_url(), "Querying GBIF backbone");

        let response = self
            .http
            .get(self.match_url())
            .query(&params)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(e.to_string())
                } else {
                    OracleError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let matched: GbifMatch = response
            .json()
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        Ok(matched.into_candidates())
    }

    fn describe(&self) -> String {
        format!("GBIF {}", self.api_base)
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Raw `/species/match` response. Every field is optional because a
/// `matchType: NONE` answer carries almost nothing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbifMatch {
    usage_key: Option<u64>,
    scientific_name: Option<String>,
    canonical_name: Option<String>,
    rank: Option<String>,
    status: Option<String>,
    confidence: Option<u8>,
    match_type: Option<String>,
    kingdom: Option<String>,
    phylum: Option<String>,
    class: Option<String>,
    order: Option<String>,
    family: Option<String>,
    genus: Option<String>,
    species: Option<String>,
    #[serde(default)]
    synonym: bool,
    accepted_usage_key: Option<u64>,
    #[serde(default)]
    alternatives: Vec<GbifMatch>,
}

impl GbifMatch {
    fn into_candidates(mut self) -> Vec<MatchCandidate> {
        let alternatives = std::mem::take(&mut self.alternatives);
        self.into_candidate()
            .into_iter()
            .chain(alternatives.into_iter().filter_map(GbifMatch::into_candidate))
            .collect()
    }

    fn into_candidate(self) -> Option<MatchCandidate> {
        let match_type = MatchType::from(self.match_type.unwrap_or_default());
        if match_type == MatchType::None {
            return None;
        }
        let usage_key = UsageKey(self.usage_key?);

        Some(MatchCandidate {
            usage_key,
            scientific_name: self.scientific_name.unwrap_or_default(),
            canonical_name: self.canonical_name,
            rank: self.rank.unwrap_or_default(),
            status: TaxonomicStatus::from(self.status.unwrap_or_default()),
            confidence: self.confidence.unwrap_or(0),
            match_type,
            lineage: Lineage {
                kingdom: self.kingdom,
                phylum: self.phylum,
                class: self.class,
                order: self.order,
                family: self.family,
                genus: self.genus,
                species: self.species,
            },
            synonym: self.synonym,
            accepted_usage_key: self.accepted_usage_key.map(UsageKey),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> GbifClient {
        GbifClient::new(&server.base_url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_exact_species_match_is_decoded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/species/match")
                .query_param("name", "Apatania stylata");
            then.status(200).json_body(json!({
                "usageKey": 177658,
                "scientificName": "Apatania stylata Martynov, 1913",
                "canonicalName": "Apatania stylata",
                "rank": "SPECIES",
                "status": "ACCEPTED",
                "confidence": 98,
                "matchType": "EXACT",
                "kingdom": "Animalia",
                "phylum": "Arthropoda",
                "order": "Trichoptera",
                "family": "Apataniidae",
                "genus": "Apatania",
                "species": "Apatania stylata",
                "class": "Insecta",
                "synonym": false
            }));
        });

        let candidates = client(&server)
            .lookup("Apatania stylata", TaxonRank::Species)
            .unwrap();

        mock.assert();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.usage_key, UsageKey(177658));
        assert_eq!(c.status, TaxonomicStatus::Accepted);
        assert_eq!(c.match_type, MatchType::Exact);
        assert_eq!(c.confidence, 98);
        assert_eq!(c.lineage.class.as_deref(), Some("Insecta"));
        assert_eq!(c.accepted_usage_key, None);
    }

    #[test]
    fn test_genus_lookup_sends_rank_hint() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/species/match")
                .query_param("name", "Papomyia")
                .query_param("rank", "GENUS");
            then.status(200).json_body(json!({
                "usageKey": 1550123,
                "scientificName": "Papomyia Mohrig, 2004",
                "rank": "GENUS",
                "status": "ACCEPTED",
                "confidence": 94,
                "matchType": "EXACT",
                "class": "Insecta",
                "order": "Diptera"
            }));
        });

        let candidates = client(&server).lookup("Papomyia", TaxonRank::Genus).unwrap();

        mock.assert();
        assert_eq!(candidates[0].usage_key, UsageKey(1550123));
        assert_eq!(candidates[0].taxon_rank(), Some(TaxonRank::Genus));
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/species/match");
            then.status(200).json_body(json!({
                "confidence": 100,
                "matchType": "NONE",
                "synonym": false
            }));
        });

        let candidates = client(&server)
            .lookup("Nonexistia fabricata", TaxonRank::Species)
            .unwrap();

        assert!(candidates.is_empty());
    }

    #[test]
    fn test_alternatives_become_extra_candidates() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/species/match")
                .query_param("verbose", "true");
            then.status(200).json_body(json!({
                "usageKey": 1001,
                "scientificName": "Hydropsyche angustipennis",
                "rank": "SPECIES",
                "status": "SYNONYM",
                "confidence": 97,
                "matchType": "EXACT",
                "synonym": true,
                "acceptedUsageKey": 5000,
                "alternatives": [
                    {
                        "usageKey": 1002,
                        "scientificName": "Hydropsyche angustipennis (Curtis, 1834)",
                        "rank": "SPECIES",
                        "status": "ACCEPTED",
                        "confidence": 96,
                        "matchType": "EXACT",
                        "synonym": false
                    },
                    { "confidence": 10, "matchType": "NONE" }
                ]
            }));
        });

        let candidates = client(&server)
            .with_alternatives(true)
            .lookup("Hydropsyche angustipennis", TaxonRank::Species)
            .unwrap();

        mock.assert();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].resolved_key(), UsageKey(5000));
        assert!(candidates[0].synonym);
        assert_eq!(candidates[1].usage_key, UsageKey(1002));
    }

    #[test]
    fn test_server_error_is_transport_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/species/match");
            then.status(503).body("Service Unavailable");
        });

        let err = client(&server)
            .lookup("Apatania stylata", TaxonRank::Species)
            .unwrap_err();

        assert_eq!(
            err,
            OracleError::Http {
                status: 503,
                body: "Service Unavailable".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_body_is_parse_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/species/match");
            then.status(200).body("<html>maintenance</html>");
        });

        let err = client(&server)
            .lookup("Apatania stylata", TaxonRank::Species)
            .unwrap_err();

        assert!(matches!(err, OracleError::Parse(_)));
    }
}
