// End-to-end runs over CSV fixtures with a scripted backbone.
// Run with: cargo test --test pipeline -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use taxonomy_request::{
    execute, JoinOptions, Lineage, MatchCandidate, MatchType, OutputPaths, ResolutionPolicy,
    RunConfig, ScriptedOracle, TaxonomicStatus, UsageKey,
};

const METADATA: &str = "\
Process ID,kingdom,phylum,class,order,family,genus,species,matched_rank,taxid
BSNHM012-24,Animalia,Arthropoda,Insecta,Trichoptera,Apataniidae,Apatania,Apatania stylata,species,
BSNHM191-24,Animalia,Arthropoda,Insecta,Diptera,Sciaridae,Papomyia,not collected,genus,
BSNHM050-24,Animalia,Arthropoda,Insecta,Trichoptera,Hydropsychidae,Hydropsyche,Hydropsyche angustipennis,species,
BSNHM065-24,Animalia,Arthropoda,Insecta,,,,,no match,
BSNHM300-24,Animalia,Arthropoda,Insecta,Diptera,Limoniidae,,,family,
BSNHM001-24,Animalia,Arthropoda,Insecta,Trichoptera,Limnephilidae,Limnephilus,Limnephilus lunatus,species,177999
";

const SAMPLES: &str = "\
ID,plate
BSNHM012-24,BGE_0001
BSNHM191-24,BGE_0001
BSNHM050-24,BGE_0001
BSNHM065-24,BGE_0002
BSNHM300-24,BGE_0002
BSNHM001-24,BGE_0002
";

fn candidate(key: u64, rank: &str, order: &str, accepted: Option<u64>) -> MatchCandidate {
    MatchCandidate {
        usage_key: UsageKey(key),
        scientific_name: format!("Taxon {}", key),
        canonical_name: None,
        rank: rank.to_string(),
        status: TaxonomicStatus::Accepted,
        confidence: 98,
        match_type: MatchType::Exact,
        lineage: Lineage {
            kingdom: Some("Animalia".to_string()),
            class: Some("Insecta".to_string()),
            order: Some(order.to_string()),
            ..Lineage::default()
        },
        synonym: accepted.is_some(),
        accepted_usage_key: accepted.map(UsageKey),
    }
}

fn oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .with_candidates(
            "Apatania stylata",
            vec![candidate(177658, "SPECIES", "Trichoptera", None)],
        )
        .with_candidates("Papomyia", vec![candidate(1550123, "GENUS", "Diptera", None)])
        .with_candidates(
            "Hydropsyche angustipennis",
            vec![
                candidate(1001, "SPECIES", "Trichoptera", Some(5000)),
                candidate(1002, "SPECIES", "Trichoptera", Some(6000)),
            ],
        )
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(metadata: &str, samples: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.csv"), metadata).unwrap();
        fs::write(dir.path().join("samples.csv"), samples).unwrap();
        Fixture { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self, prefix: &str, workers: usize) -> RunConfig {
        RunConfig {
            metadata: self.path("metadata.csv"),
            samples: self.path("samples.csv"),
            outputs: OutputPaths::from_prefix(&self.path(prefix).to_string_lossy()),
            policy: ResolutionPolicy::new(),
            join: JoinOptions::default(),
            workers,
        }
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn full_run_routes_every_record() {
    let fixture = Fixture::new(METADATA, SAMPLES);
    let config = fixture.config("run", 1);
    let outputs = config.outputs.clone();
    let oracle = oracle();

    let summary = execute(config, &oracle).unwrap();

    // BSNHM001-24 already has a species taxid; it is still resolved and routed
    assert_eq!(summary.records(), 6);
    assert_eq!(summary.outcomes.accepted, 2);
    assert_eq!(summary.outcomes.naming_only, 1);
    assert_eq!(summary.outcomes.inconsistent, 1);
    assert_eq!(summary.outcomes.validation_failed, 2);
    assert_eq!(summary.lookups, 4);

    let request = read(&outputs.taxonomy_request);
    assert_eq!(
        request,
        "proposed_name\tname_type\thost\tproject_id\tdescription\n\
         Apatania stylata\tpublished_name\t\tBGE_BSNHM012-24\thttps://www.gbif.org/species/177658\n\
         Papomyia sp. BSNHM191-24\tnovel_species\t\tBGE_BSNHM191-24\thttps://www.gbif.org/species/1550123\n\
         Limoniidae sp. BSNHM300-24\tplaceholder_name\t\tBGE_BSNHM300-24\t\n"
    );

    let inconsistent = read(&outputs.gbif_inconsistent);
    let rows: Vec<&str> = inconsistent.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    for (row, key) in rows.iter().zip(["1001", "1002"]) {
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[0], "BSNHM050-24");
        assert_eq!(fields[1], "Hydropsyche angustipennis");
        assert_eq!(fields[2], key);
        assert_eq!(fields[17], "multiple synonymous identifiers (5000, 6000)");
    }

    assert_eq!(
        read(&outputs.tax_validation_fails),
        "process_id,subject_name,subject_rank,matched_rank,failure_reason\n\
         BSNHM065-24,,,no match,no usable taxonomic rank\n\
         BSNHM001-24,Limnephilus lunatus,species,species,no match returned\n"
    );
}

#[test]
fn skip_registered_leaves_out_species_with_taxid() {
    let fixture = Fixture::new(METADATA, SAMPLES);
    let mut config = fixture.config("skip", 1);
    config.join = JoinOptions {
        skip_registered: true,
    };
    let outputs = config.outputs.clone();
    let oracle = oracle();

    let summary = execute(config, &oracle).unwrap();

    assert_eq!(summary.records(), 5);
    assert_eq!(summary.outcomes.validation_failed, 1);
    assert!(!oracle.calls().iter().any(|name| name == "Limnephilus lunatus"));
    assert!(!read(&outputs.tax_validation_fails).contains("BSNHM001-24"));
}

#[test]
fn no_rank_record_makes_no_lookup() {
    let metadata = "\
Process ID,class,order,family,genus,species,matched_rank
BSNHM065-24,Insecta,,,,,no match
";
    let fixture = Fixture::new(metadata, "ID\nBSNHM065-24\n");
    let oracle = oracle();

    let summary = execute(fixture.config("norank", 1), &oracle).unwrap();

    assert_eq!(summary.outcomes.validation_failed, 1);
    assert_eq!(oracle.call_count(), 0);
}

#[test]
fn reruns_are_byte_identical() {
    let fixture = Fixture::new(METADATA, SAMPLES);

    let first = execute(fixture.config("first", 1), &oracle()).unwrap();
    let second = execute(fixture.config("second", 4), &oracle()).unwrap();

    let digests = |summary: &taxonomy_request::RunSummary| -> Vec<String> {
        summary.outputs.iter().map(|o| o.sha256.clone()).collect()
    };
    assert_eq!(digests(&first), digests(&second));
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn empty_outputs_still_have_headers() {
    let metadata = "\
Process ID,class,order,family,genus,species,matched_rank
BSNHM012-24,Insecta,Trichoptera,Apataniidae,Apatania,Apatania stylata,species
";
    let fixture = Fixture::new(metadata, "ID\nBSNHM012-24\n");
    let config = fixture.config("headers", 1);
    let outputs = config.outputs.clone();

    execute(config, &oracle()).unwrap();

    assert!(read(&outputs.gbif_inconsistent).starts_with("process_id\tproposed_name\tusageKey"));
    assert_eq!(read(&outputs.gbif_inconsistent).lines().count(), 1);
    assert_eq!(read(&outputs.tax_validation_fails).lines().count(), 1);
    assert_eq!(read(&outputs.taxonomy_request).lines().count(), 2);
}

#[test]
fn input_errors_abort_before_lookup() {
    // Empty join
    let fixture = Fixture::new(METADATA, "ID\nNOT-IN-METADATA\n");
    let config = fixture.config("empty", 1);
    let outputs = config.outputs.clone();
    let oracle = oracle();

    let err = execute(config, &oracle).unwrap_err();
    assert!(format!("{:#}", err).contains("no Process IDs in common"));
    assert_eq!(oracle.call_count(), 0);
    assert!(!outputs.taxonomy_request.exists());

    // Missing column
    let fixture = Fixture::new("Process ID,genus\nBSNHM191-24,Papomyia\n", SAMPLES);
    let err = execute(fixture.config("missing", 1), &oracle).unwrap_err();
    assert!(format!("{:#}", err).contains("missing required column 'class'"));
    assert_eq!(oracle.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Binary
// ---------------------------------------------------------------------------

fn taxonomy_request() -> Command {
    Command::new(env!("CARGO_BIN_EXE_taxonomy-request"))
}

#[test]
fn cli_replay_run_writes_outputs_and_log() {
    let fixture = Fixture::new(METADATA, SAMPLES);
    let replay = serde_json::json!({
        "Apatania stylata": [candidate(177658, "SPECIES", "Trichoptera", None)],
        "Papomyia": [candidate(1550123, "GENUS", "Diptera", None)],
    });
    fs::write(fixture.path("replay.json"), replay.to_string()).unwrap();
    let prefix = fixture.path("cli");

    let output = taxonomy_request()
        .arg(fixture.path("metadata.csv"))
        .arg(fixture.path("samples.csv"))
        .arg(&prefix)
        .arg("--replay")
        .arg(fixture.path("replay.json"))
        .args(["--project-code", "BIOSCAN"])
        .output()
        .expect("run taxonomy-request");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let paths = OutputPaths::from_prefix(&prefix.to_string_lossy());
    assert!(read(&paths.taxonomy_request).contains("BIOSCAN_BSNHM012-24"));
    // Hydropsyche is not in the replay file: no match
    assert!(read(&paths.tax_validation_fails).contains("BSNHM050-24,Hydropsyche angustipennis,species,species,no match returned"));
    assert!(read(&paths.log).contains("BSNHM065-24"));
}

#[test]
fn cli_fails_on_unreadable_metadata() {
    let fixture = Fixture::new(METADATA, SAMPLES);
    fs::write(fixture.path("replay.json"), "{}").unwrap();

    let output = taxonomy_request()
        .arg(fixture.path("does-not-exist.csv"))
        .arg(fixture.path("samples.csv"))
        .arg(fixture.path("bad"))
        .arg("--replay")
        .arg(fixture.path("replay.json"))
        .output()
        .expect("run taxonomy-request");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load metadata table"), "stderr: {}", stderr);
    assert!(stderr.contains("does-not-exist.csv"), "stderr: {}", stderr);
    assert!(!fixture.path("bad_taxonomy_request.tsv").exists());
}

#[test]
fn cli_fails_on_missing_required_column() {
    let fixture = Fixture::new("Process ID,genus\nBSNHM191-24,Papomyia\n", SAMPLES);
    fs::write(fixture.path("replay.json"), "{}").unwrap();

    let output = taxonomy_request()
        .arg(fixture.path("metadata.csv"))
        .arg(fixture.path("samples.csv"))
        .arg(fixture.path("nocol"))
        .arg("--replay")
        .arg(fixture.path("replay.json"))
        .output()
        .expect("run taxonomy-request");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing required column 'class'"), "stderr: {}", stderr);
    assert!(!fixture.path("nocol_taxonomy_request.tsv").exists());
}
