//! Genome database manifests and the validated working set.
//!
//! A *manifest* is a tab-delimited file with a header row and the required
//! columns `name` and `path`, one row per genome database:
//!
//! ```text
//! name	path
//! E_faecalis_6240	dbs/E_faecalis_6240.db
//! E_faecalis_6512	dbs/E_faecalis_6512.db
//! ```
//!
//! Relative `path` values are resolved against the manifest's own directory,
//! not the process working directory. [`WorkingSet::load`] opens every
//! referenced database read-only, copies its metadata block into a
//! [`GenomeDescriptor`], and closes it again; validation is fail-fast, the
//! first violated precondition wins.
use csv::ReaderBuilder;
use indexmap::IndexMap;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::file::{FileError, InputFile};

/// Metadata key holding a genome database's unique identity hash.
pub const DB_HASH_KEY: &str = "db_hash";

/// Metadata key flagging that gene calling has been completed.
pub const GENES_CALLED_KEY: &str = "genes_are_called";

#[derive(Error, Debug)]
pub enum GenomeSetError {
    #[error("Manifest parsing error: {0}")]
    ManifestParsing(#[from] csv::Error),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("File reading error: {0}")]
    FileError(#[from] FileError),
    #[error("Genome name '{0}' appears more than once in the manifest")]
    DuplicateName(String),
    #[error("At least two genome databases are required for a pangenome, found {0}")]
    TooFewGenomes(usize),
    #[error("Genome database for '{name}' not found at '{path}'")]
    MissingDatabase { name: String, path: PathBuf },
    #[error("Genome database for '{name}' has no '{key}' metadata entry")]
    MissingMetadata { name: String, key: String },
    #[error("Genomes '{first}' and '{second}' share the database hash '{hash}'")]
    DuplicateHash {
        first: String,
        second: String,
        hash: String,
    },
    #[error("Genes have not been called in the genome database for '{0}'")]
    GenesNotCalled(String),
    #[error("Malformed protein table in '{path}': {reason}")]
    MalformedProteinTable { path: PathBuf, reason: String },
}

/// Read-only access to a single genome database.
///
/// This is the seam to the genome database format: the pipeline only needs
/// the metadata block and the predicted protein sequences, so alternative
/// backends can be swapped in behind this trait. Implementations are opened
/// per access and dropped immediately; no handle is held across pipeline
/// steps.
pub trait GenomeDb: Sized {
    /// Open the database at `path` read-only.
    fn open(path: &Path) -> Result<Self, GenomeSetError>;

    /// The database's key/value metadata block.
    fn metadata(&self) -> &IndexMap<String, String>;

    /// The predicted protein sequences, keyed by the caller-assigned
    /// numeric gene id.
    fn protein_sequences(&self) -> Result<IndexMap<u64, String>, GenomeSetError>;
}

#[derive(Debug, Deserialize)]
struct ProteinRow {
    gene_callers_id: u64,
    sequence: String,
}

/// A flat-file genome database: a leading `#key=value` metadata block
/// followed by a tab-delimited protein table with the header row
/// `gene_callers_id	sequence`.
pub struct FlatGenomeDb {
    input: InputFile,
    path: PathBuf,
    metadata: IndexMap<String, String>,
}

impl GenomeDb for FlatGenomeDb {
    fn open(path: &Path) -> Result<Self, GenomeSetError> {
        let mut input = InputFile::new(&path.to_string_lossy());
        let metadata = input.collect_metadata("#")?;
        Ok(Self {
            input,
            path: path.to_path_buf(),
            metadata,
        })
    }

    fn metadata(&self) -> &IndexMap<String, String> {
        &self.metadata
    }

    fn protein_sequences(&self) -> Result<IndexMap<u64, String>, GenomeSetError> {
        let reader = self.input.continue_reading()?;
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(reader);

        let mut sequences = IndexMap::new();
        for result in rdr.deserialize() {
            let row: ProteinRow =
                result.map_err(|e| GenomeSetError::MalformedProteinTable {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;
            sequences.insert(row.gene_callers_id, row.sequence);
        }
        Ok(sequences)
    }
}

/// Validated metadata for one genome database in the working set.
#[derive(Debug, Clone)]
pub struct GenomeDescriptor {
    /// User-assigned genome name from the manifest, unique across the set.
    pub name: String,
    /// Resolved path to the database on disk.
    pub path: PathBuf,
    /// The database's identity hash, unique across the set.
    pub db_hash: String,
    /// Whether gene calling has been completed (always true after
    /// validation).
    pub genes_are_called: bool,
    /// Number of protein sequences, populated during extraction.
    pub num_genes: Option<u64>,
    /// The full metadata block copied out of the database.
    pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    path: String,
}

/// The validated set of genome databases, keyed by genome name in manifest
/// order. Built once by [`WorkingSet::load`] and read-only afterwards,
/// except for the `num_genes` annotation made during sequence extraction.
#[derive(Debug, Default)]
pub struct WorkingSet {
    genomes: IndexMap<String, GenomeDescriptor>,
}

impl WorkingSet {
    /// Load and validate a manifest of genome databases.
    ///
    /// Fails on the first violated precondition: a missing or malformed
    /// manifest, fewer than two entries, a duplicated genome name, a
    /// database path that does not exist, a database without an identity
    /// hash, two databases sharing a hash, or a database without completed
    /// gene calling.
    pub fn load<D: GenomeDb>(manifest_path: &Path) -> Result<WorkingSet, GenomeSetError> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(manifest_path)?;

        let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for result in rdr.deserialize() {
            let entry: ManifestEntry = result?;
            let path = PathBuf::from(&entry.path);
            let path = if path.is_relative() {
                manifest_dir.join(path)
            } else {
                path
            };
            entries.push((entry.name, path));
        }

        if entries.len() < 2 {
            return Err(GenomeSetError::TooFewGenomes(entries.len()));
        }

        let mut genomes: IndexMap<String, GenomeDescriptor> = IndexMap::new();
        // maps each db hash to the first genome that claimed it
        let mut seen_hashes: IndexMap<String, String> = IndexMap::new();

        for (name, path) in entries {
            if genomes.contains_key(&name) {
                return Err(GenomeSetError::DuplicateName(name));
            }
            if !path.exists() {
                return Err(GenomeSetError::MissingDatabase { name, path });
            }

            // open read-only, copy the metadata block, drop the handle
            let db = D::open(&path)?;
            let metadata = db.metadata().clone();

            let db_hash = metadata
                .get(DB_HASH_KEY)
                .cloned()
                .ok_or_else(|| GenomeSetError::MissingMetadata {
                    name: name.clone(),
                    key: DB_HASH_KEY.to_string(),
                })?;

            if let Some(first) = seen_hashes.get(&db_hash) {
                return Err(GenomeSetError::DuplicateHash {
                    first: first.clone(),
                    second: name,
                    hash: db_hash,
                });
            }
            seen_hashes.insert(db_hash.clone(), name.clone());

            let genes_are_called = metadata
                .get(GENES_CALLED_KEY)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if !genes_are_called {
                return Err(GenomeSetError::GenesNotCalled(name));
            }

            genomes.insert(
                name.clone(),
                GenomeDescriptor {
                    name,
                    path,
                    db_hash,
                    genes_are_called,
                    num_genes: None,
                    metadata,
                },
            );
        }

        log::info!("{} genome databases have been found", genomes.len());

        Ok(WorkingSet { genomes })
    }

    /// Return the number of genomes in the working set.
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    /// Return if the working set is empty.
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Get a descriptor by genome name.
    pub fn get(&self, name: &str) -> Option<&GenomeDescriptor> {
        self.genomes.get(name)
    }

    /// Iterate over descriptors in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &GenomeDescriptor> {
        self.genomes.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut GenomeDescriptor> {
        self.genomes.values_mut()
    }

    /// Total gene count across the set, if extraction has annotated it.
    pub fn total_genes(&self) -> u64 {
        self.genomes.values().filter_map(|g| g.num_genes).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{FlatGenomeDb, GenomeSetError, WorkingSet};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    pub(crate) fn write_genome_db(
        dir: &Path,
        file_name: &str,
        hash: &str,
        genes_called: &str,
        num_proteins: u64,
    ) -> PathBuf {
        let path = dir.join(file_name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#db_hash={}", hash).unwrap();
        writeln!(file, "#genes_are_called={}", genes_called).unwrap();
        writeln!(file, "gene_callers_id\tsequence").unwrap();
        for i in 0..num_proteins {
            writeln!(file, "{}\tMKVLA{}", i, i).unwrap();
        }
        path
    }

    pub(crate) fn write_manifest(dir: &Path, rows: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("external-genomes.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name\tpath").unwrap();
        for (name, db_path) in rows {
            writeln!(file, "{}\t{}", name, db_path).unwrap();
        }
        path
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        write_genome_db(dir.path(), "g1.db", "h1", "1", 3);
        write_genome_db(dir.path(), "g2.db", "h2", "1", 5);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db"), ("g2", "g2.db")]);

        let set = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap();
        assert_eq!(set.len(), 2);
        let g1 = set.get("g1").unwrap();
        assert_eq!(g1.db_hash, "h1");
        assert!(g1.genes_are_called);
        assert!(g1.path.is_absolute() || g1.path.starts_with(dir.path()));
        assert!(g1.num_genes.is_none());
    }

    #[test]
    fn test_load_requires_two_genomes() {
        let dir = tempdir().unwrap();
        write_genome_db(dir.path(), "g1.db", "h1", "1", 3);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db")]);

        let err = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap_err();
        match err {
            GenomeSetError::TooFewGenomes(n) => assert_eq!(n, 1),
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.to_string().contains("At least two"));
    }

    #[test]
    fn test_load_missing_database_path() {
        let dir = tempdir().unwrap();
        write_genome_db(dir.path(), "g1.db", "h1", "1", 3);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db"), ("g2", "g2.db")]);

        let err = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap_err();
        assert!(matches!(err, GenomeSetError::MissingDatabase { .. }));
        assert!(err.to_string().contains("g2"));
    }

    #[test]
    fn test_load_duplicate_hash() {
        let dir = tempdir().unwrap();
        write_genome_db(dir.path(), "g1.db", "h1", "1", 3);
        write_genome_db(dir.path(), "g2.db", "h1", "1", 5);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db"), ("g2", "g2.db")]);

        let err = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap_err();
        assert!(matches!(err, GenomeSetError::DuplicateHash { .. }));
    }

    #[test]
    fn test_load_genes_not_called() {
        let dir = tempdir().unwrap();
        write_genome_db(dir.path(), "g1.db", "h1", "1", 3);
        write_genome_db(dir.path(), "g2.db", "h2", "0", 5);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db"), ("g2", "g2.db")]);

        let err = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap_err();
        match err {
            GenomeSetError::GenesNotCalled(name) => assert_eq!(name, "g2"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_missing_hash_is_an_error() {
        let dir = tempdir().unwrap();
        // db without a #db_hash metadata line
        let path = dir.path().join("g1.db");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#genes_are_called=1").unwrap();
        writeln!(file, "gene_callers_id\tsequence").unwrap();
        drop(file);
        write_genome_db(dir.path(), "g2.db", "h2", "1", 5);
        let manifest = write_manifest(dir.path(), &[("g1", "g1.db"), ("g2", "g2.db")]);

        let err = WorkingSet::load::<FlatGenomeDb>(&manifest).unwrap_err();
        assert!(matches!(err, GenomeSetError::MissingMetadata { .. }));
        assert!(err.to_string().contains("db_hash"));
    }

    #[test]
    fn test_protein_sequences_read() {
        use super::GenomeDb;
        let dir = tempdir().unwrap();
        let path = write_genome_db(dir.path(), "g1.db", "h1", "1", 3);

        let db = FlatGenomeDb::open(&path).unwrap();
        let sequences = db.protein_sequences().unwrap();
        assert_eq!(sequences.len(), 3);
        assert_eq!(sequences.get(&0).unwrap(), "MKVLA0");
    }
}
