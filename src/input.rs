// 📥 Input Join - Metadata table + sample list → candidate records
//
// Headers are matched by alias, trimmed and case-insensitive, so the column
// order and spelling of upstream exports do not matter. The sample list
// restricts which metadata rows are processed; metadata order is kept.

use crate::error::InputError;
use crate::policy::ResolutionPolicy;
use crate::taxonomy::{CandidateRecord, MatchedRank, TaxonRank};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

/// Specimen id column in the metadata table
pub const METADATA_ID_ALIASES: &[&str] = &["Process ID", "process_id", "ProcessID", "PROCESS_ID", "ID"];

/// Specimen id column in the sample list (BGE sample sheets call it "ID")
pub const SAMPLE_ID_ALIASES: &[&str] = &["ID", "Process ID", "process_id", "ProcessID", "PROCESS_ID"];

const SPECIES_ALIASES: &[&str] = &["species", "Species", "scientific_name", "Scientific_Name", "scientific name"];

// ============================================================================
// COLUMN RESOLUTION
// ============================================================================

struct Columns {
    table: String,
    index: HashMap<String, usize>,
    available: Vec<String>,
}

impl Columns {
    fn new(table: &str, headers: &csv::StringRecord) -> Self {
        let mut index = HashMap::new();
        let mut available = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            let header = header.trim();
            index.entry(header.to_lowercase()).or_insert(i);
            available.push(header.to_string());
        }
        Columns {
            table: table.to_string(),
            index,
            available,
        }
    }

    fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.index.get(&alias.trim().to_lowercase()).copied())
    }

    fn id(&self, aliases: &[&str]) -> Result<usize, InputError> {
        self.find(aliases).ok_or_else(|| InputError::MissingIdColumn {
            table: self.table.clone(),
            expected: aliases.join(", "),
        })
    }

    fn required(&self, aliases: &[&str]) -> Result<usize, InputError> {
        self.find(aliases).ok_or_else(|| InputError::MissingColumn {
            table: self.table.clone(),
            column: aliases[0].to_string(),
            available: self.available.join(", "),
        })
    }
}

/// Column positions of the metadata table
struct MetadataLayout {
    id: usize,
    kingdom: Option<usize>,
    phylum: Option<usize>,
    class: usize,
    order: usize,
    family: usize,
    genus: usize,
    species: usize,
    matched_rank: usize,
    taxid: Option<usize>,
}

impl MetadataLayout {
    fn resolve(columns: &Columns) -> Result<Self, InputError> {
        Ok(MetadataLayout {
            id: columns.id(METADATA_ID_ALIASES)?,
            kingdom: columns.find(&["kingdom"]),
            phylum: columns.find(&["phylum"]),
            class: columns.required(&["class"])?,
            order: columns.required(&["order"])?,
            family: columns.required(&["family"])?,
            genus: columns.required(&["genus"])?,
            species: columns.required(SPECIES_ALIASES)?,
            matched_rank: columns.required(&["matched_rank"])?,
            taxid: columns.find(&["taxid"]),
        })
    }

    fn names(&self) -> [(TaxonRank, Option<usize>); 7] {
        [
            (TaxonRank::Kingdom, self.kingdom),
            (TaxonRank::Phylum, self.phylum),
            (TaxonRank::Class, Some(self.class)),
            (TaxonRank::Order, Some(self.order)),
            (TaxonRank::Family, Some(self.family)),
            (TaxonRank::Genus, Some(self.genus)),
            (TaxonRank::Species, Some(self.species)),
        ]
    }
}

// ============================================================================
// LOADING
// ============================================================================

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, InputError> {
    csv::Reader::from_path(path).map_err(|source| InputError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn headers<R: Read>(reader: &mut csv::Reader<R>, table: &str) -> Result<Columns, InputError> {
    let headers = reader.headers().map_err(|source| InputError::Malformed {
        table: table.to_string(),
        source,
    })?;
    Ok(Columns::new(table, headers))
}

/// Load the metadata table. Missing-value tokens become absent names.
pub fn load_metadata(path: &Path, policy: &ResolutionPolicy) -> Result<Vec<CandidateRecord>, InputError> {
    let table = path.display().to_string();
    read_metadata(open(path)?, &table, policy)
}

pub fn load_metadata_from_reader<R: Read>(
    reader: R,
    table: &str,
    policy: &ResolutionPolicy,
) -> Result<Vec<CandidateRecord>, InputError> {
    read_metadata(csv::Reader::from_reader(reader), table, policy)
}

fn read_metadata<R: Read>(
    mut reader: csv::Reader<R>,
    table: &str,
    policy: &ResolutionPolicy,
) -> Result<Vec<CandidateRecord>, InputError> {
    let layout = MetadataLayout::resolve(&headers(&mut reader, table)?)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|source| InputError::Malformed {
            table: table.to_string(),
            source,
        })?;
        let cell = |i: usize| row.get(i).unwrap_or("");

        let process_id = cell(layout.id).trim();
        if process_id.is_empty() {
            tracing::warn!(table = %table, "Skipping metadata row without a Process ID");
            continue;
        }

        let mut record = CandidateRecord::new(process_id, MatchedRank::parse(cell(layout.matched_rank)));
        for (rank, column) in layout.names() {
            if let Some(name) = column.and_then(|i| policy.clean(Some(cell(i)))) {
                record = record.with_name(rank, name);
            }
        }
        if let Some(taxid) = layout.taxid.and_then(|i| policy.clean(Some(cell(i)))) {
            record = record.with_taxid(taxid);
        }
        records.push(record);
    }

    tracing::debug!(table = %table, rows = records.len(), "Loaded metadata");
    Ok(records)
}

/// Load the sample list: one trimmed specimen id per row
pub fn load_samples(path: &Path) -> Result<Vec<String>, InputError> {
    let table = path.display().to_string();
    read_samples(open(path)?, &table)
}

pub fn load_samples_from_reader<R: Read>(reader: R, table: &str) -> Result<Vec<String>, InputError> {
    read_samples(csv::Reader::from_reader(reader), table)
}

fn read_samples<R: Read>(mut reader: csv::Reader<R>, table: &str) -> Result<Vec<String>, InputError> {
    let id = headers(&mut reader, table)?.id(SAMPLE_ID_ALIASES)?;

    let mut ids = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|source| InputError::Malformed {
            table: table.to_string(),
            source,
        })?;
        let value = row.get(id).unwrap_or("").trim();
        if !value.is_empty() {
            ids.push(value.to_string());
        }
    }

    tracing::debug!(table = %table, ids = ids.len(), "Loaded sample list");
    Ok(ids)
}

// ============================================================================
// JOIN
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOptions {
    /// Leave out species-level records that already carry a taxid.
    /// Off by default: every joined record reaches the engine.
    pub skip_registered: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    pub metadata_rows: usize,
    pub sample_ids: usize,
    /// Records handed to the engine
    pub joined: usize,
    /// Sample ids with no metadata row
    pub unmapped: Vec<String>,
    /// Metadata ids seen more than once (first occurrence kept)
    pub duplicates: Vec<String>,
    /// Species records left out because they already have a taxid
    pub registered_skipped: Vec<String>,
}

/// Inner join on the specimen id, in metadata order.
pub fn join(
    metadata: Vec<CandidateRecord>,
    samples: &[String],
    options: JoinOptions,
) -> Result<(Vec<CandidateRecord>, JoinReport), InputError> {
    let wanted: HashSet<&str> = samples.iter().map(|s| s.trim()).collect();
    let mut report = JoinReport {
        metadata_rows: metadata.len(),
        sample_ids: wanted.len(),
        ..JoinReport::default()
    };

    let known: HashSet<String> = metadata.iter().map(|r| r.process_id.clone()).collect();
    let mut unmapped: Vec<String> = wanted
        .iter()
        .filter(|id| !known.contains(**id))
        .map(|id| id.to_string())
        .collect();
    unmapped.sort();
    for id in &unmapped {
        tracing::warn!(process_id = %id, "Sample id not found in metadata");
    }
    report.unmapped = unmapped;

    let mut seen = HashSet::new();
    let mut matched = 0usize;
    let mut records = Vec::new();

    for record in metadata {
        if !wanted.contains(record.process_id.as_str()) {
            continue;
        }
        if !seen.insert(record.process_id.clone()) {
            tracing::warn!(process_id = %record.process_id, "Duplicate metadata row, keeping the first");
            report.duplicates.push(record.process_id);
            continue;
        }
        matched += 1;

        if options.skip_registered && record.is_registered() {
            tracing::info!(
                process_id = %record.process_id,
                outcome = "registered",
                taxid = %record.taxid.as_deref().unwrap_or(""),
                "Skipped: already registered at species level"
            );
            report.registered_skipped.push(record.process_id);
            continue;
        }
        records.push(record);
    }

    if matched == 0 {
        return Err(InputError::EmptyJoin);
    }

    report.joined = records.len();
    tracing::info!(
        metadata_rows = report.metadata_rows,
        sample_ids = report.sample_ids,
        joined = report.joined,
        unmapped = report.unmapped.len(),
        duplicates = report.duplicates.len(),
        registered_skipped = report.registered_skipped.len(),
        "Joined metadata with sample list"
    );

    Ok((records, report))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    const METADATA: &str = "\
Process ID,kingdom,phylum,class,order,family,genus,species,matched_rank,taxid
BSNHM012-24,Animalia,Arthropoda,Insecta,Trichoptera,Apataniidae,Apatania,Apatania stylata,species,
BSNHM191-24,Animalia,Arthropoda,Insecta,Diptera,Sciaridae,Papomyia,not collected,genus,
BSNHM065-24,Animalia,Arthropoda,Insecta,Diptera,nan,,,no match,
BSNHM001-24,Animalia,Arthropoda,Insecta,Trichoptera,Limnephilidae,Limnephilus,Limnephilus lunatus,species,177999
";

    fn metadata() -> Vec<CandidateRecord> {
        load_metadata_from_reader(METADATA.as_bytes(), "metadata.csv", &ResolutionPolicy::new()).unwrap()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_metadata_rows_become_records() {
        let records = metadata();

        assert_eq!(records.len(), 4);
        let apatania = &records[0];
        assert_eq!(apatania.process_id, "BSNHM012-24");
        assert_eq!(apatania.matched_rank, MatchedRank::Species);
        assert_eq!(apatania.lineage.species.as_deref(), Some("Apatania stylata"));
        assert_eq!(apatania.taxid, None);

        // Missing-value tokens are dropped
        assert_eq!(records[1].lineage.species, None);
        assert_eq!(records[2].lineage.family, None);
        assert_eq!(records[2].matched_rank, MatchedRank::Other("no match".to_string()));
        assert_eq!(records[3].taxid.as_deref(), Some("177999"));
    }

    #[test]
    fn test_header_aliases_and_order() {
        let csv = " genus ,Scientific_Name,MATCHED_RANK,family,order,class,process_id\n\
                   Papomyia,,genus,Sciaridae,Diptera,Insecta,BSNHM191-24\n";

        let records =
            load_metadata_from_reader(csv.as_bytes(), "bold.csv", &ResolutionPolicy::new()).unwrap();

        assert_eq!(records[0].process_id, "BSNHM191-24");
        assert_eq!(records[0].lineage.genus.as_deref(), Some("Papomyia"));
        assert_eq!(records[0].lineage.kingdom, None);
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let csv = "Process ID,class,order,family,genus,species\nX,,,,,\n";

        let err = load_metadata_from_reader(csv.as_bytes(), "metadata.csv", &ResolutionPolicy::new())
            .unwrap_err();

        match err {
            InputError::MissingColumn { column, .. } => assert_eq!(column, "matched_rank"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_id_column_is_fatal() {
        let err = load_samples_from_reader("sample,plate\nA,1\n".as_bytes(), "samples.csv").unwrap_err();
        assert!(matches!(err, InputError::MissingIdColumn { .. }));
    }

    #[test]
    fn test_unreadable_file() {
        let err = load_samples(Path::new("/nonexistent/samples.csv")).unwrap_err();
        assert!(matches!(err, InputError::Unreadable { .. }));
    }

    #[test]
    fn test_samples_are_trimmed() {
        let samples =
            load_samples_from_reader("ID,plate\n BSNHM012-24 ,1\n,2\nBSNHM191-24,3\n".as_bytes(), "samples.csv")
                .unwrap();
        assert_eq!(samples, ids(&["BSNHM012-24", "BSNHM191-24"]));
    }

    #[test]
    fn test_join_keeps_metadata_order_and_reports_unmapped() {
        let samples = ids(&["BSNHM191-24", "BSNHM012-24", "BSNHM999-24"]);

        let (records, report) = join(metadata(), &samples, JoinOptions::default()).unwrap();

        let joined: Vec<&str> = records.iter().map(|r| r.process_id.as_str()).collect();
        assert_eq!(joined, vec!["BSNHM012-24", "BSNHM191-24"]);
        assert_eq!(report.unmapped, ids(&["BSNHM999-24"]));
        assert_eq!(report.joined, 2);
    }

    #[test]
    fn test_registered_records_are_joined_by_default() {
        let samples = ids(&["BSNHM001-24", "BSNHM012-24"]);

        let (records, report) = join(metadata(), &samples, JoinOptions::default()).unwrap();

        let joined: Vec<&str> = records.iter().map(|r| r.process_id.as_str()).collect();
        assert_eq!(joined, vec!["BSNHM012-24", "BSNHM001-24"]);
        assert!(report.registered_skipped.is_empty());
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_skip_registered_logs_each_skipped_record() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let samples = ids(&["BSNHM001-24", "BSNHM012-24"]);
        let (records, report) = tracing::subscriber::with_default(subscriber, || {
            join(
                metadata(),
                &samples,
                JoinOptions {
                    skip_registered: true,
                },
            )
            .unwrap()
        });

        assert_eq!(records.len(), 1);
        assert_eq!(report.registered_skipped, ids(&["BSNHM001-24"]));

        let text = log.text();
        let line = text
            .lines()
            .find(|l| l.contains("process_id=BSNHM001-24"))
            .expect("per-record line for the skipped specimen");
        assert!(line.contains("outcome=\"registered\""), "{}", line);
        assert!(line.contains("taxid=177999"), "{}", line);
    }

    #[test]
    fn test_join_drops_duplicate_ids() {
        let mut rows = metadata();
        let mut duplicate = rows[0].clone();
        duplicate.lineage.species = Some("Apatania muliebris".to_string());
        rows.push(duplicate);

        let (records, report) = join(rows, &ids(&["BSNHM012-24"]), JoinOptions::default()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lineage.species.as_deref(), Some("Apatania stylata"));
        assert_eq!(report.duplicates, ids(&["BSNHM012-24"]));
    }

    #[test]
    fn test_empty_join_is_fatal() {
        let err = join(metadata(), &ids(&["NOPE-01"]), JoinOptions::default()).unwrap_err();
        assert!(matches!(err, InputError::EmptyJoin));
    }
}
