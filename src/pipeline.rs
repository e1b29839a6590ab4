//! The end-to-end pangenome search pipeline.
//!
//! [`Pipeline::process`] runs the whole workflow: validate the genome set,
//! extract every predicted protein into one combined FASTA file, then hand
//! off to the staged external search. Each step either succeeds or aborts
//! the run; there is no retry and no partial-result mode. A single pipeline
//! instance assumes exclusive ownership of its output directory for the
//! duration of the run.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::file::OutputFile;
use crate::genomes::{GenomeDb, GenomeSetError, WorkingSet};
use crate::search::{program_in_path, SearchError, SearchRunner};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    GenomeSet(#[from] GenomeSetError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("The program '{0}' was not found on your PATH; is it installed?")]
    MissingProgram(String),
    #[error(
        "The output directory '{0}' already exists; pass the overwrite flag \
         to replace it"
    )]
    OutputDirExists(PathBuf),
    #[error("The output directory '{0}' is not writable")]
    OutputDirNotWritable(PathBuf),
    #[error("The genome set has not been validated yet")]
    NotValidated,
}

/// Everything the pipeline needs to know, validated once at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tab-delimited manifest of genome names and database paths.
    pub manifest: PathBuf,
    /// Directory all outputs are rooted under.
    pub output_dir: PathBuf,
    /// Thread count passed through to the external search binary.
    pub num_threads: usize,
    /// Replace an existing output directory instead of refusing to run.
    pub overwrite: bool,
    /// Keep temporary intermediates for inspection.
    pub debug: bool,
    /// Name of the external search binary.
    pub program: String,
}

impl PipelineConfig {
    pub fn new(manifest: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            output_dir: output_dir.into(),
            num_threads: 1,
            overwrite: false,
            debug: false,
            program: "diamond".to_string(),
        }
    }
}

/// The derived output paths, computed once from the output directory.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    /// Combined protein FASTA file (temporary).
    pub combined_fasta: PathBuf,
    /// Search index prefix.
    pub index_prefix: PathBuf,
    /// Raw search output prefix.
    pub raw_output_prefix: PathBuf,
    /// Tabular result file, the final deliverable.
    pub tabular_output: PathBuf,
    /// Append-only log accumulating across the whole run.
    pub log_file: PathBuf,
}

impl PipelinePaths {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            combined_fasta: output_dir.join("combined-proteins.fa"),
            index_prefix: output_dir.join("search-db"),
            raw_output_prefix: output_dir.join("search-results"),
            tabular_output: output_dir.join("search-results.txt"),
            log_file: output_dir.join("log.txt"),
        }
    }
}

/// Temporary artifacts registered at creation and removed once at teardown.
///
/// Removal happens either through the explicit [`TempArtifacts::cleanup`]
/// call at the end of a successful run or through `Drop` on early exits.
/// When `keep` is set (the debug flag), every intermediate survives.
#[derive(Debug, Default)]
struct TempArtifacts {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl TempArtifacts {
    fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn cleanup(&mut self) {
        if self.keep {
            self.paths.clear();
            return;
        }
        for path in self.paths.drain(..) {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("could not remove temporary file '{}': {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Drives the workflow: `sanity_check` → `extract_sequences` → `run_search`.
///
/// State transitions are one-way; any failure propagates out and aborts the
/// run, and a rerun starts from scratch (reusing whatever stage artifacts
/// are still on disk).
pub struct Pipeline {
    pub config: PipelineConfig,
    pub paths: PipelinePaths,
    genomes: Option<WorkingSet>,
    temp: TempArtifacts,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let paths = PipelinePaths::new(&config.output_dir);
        let temp = TempArtifacts {
            paths: Vec::new(),
            keep: config.debug,
        };
        Self {
            config,
            paths,
            genomes: None,
            temp,
        }
    }

    /// The validated working set, once `sanity_check` has run.
    pub fn genomes(&self) -> Option<&WorkingSet> {
        self.genomes.as_ref()
    }

    /// Verify the external binary is discoverable, prepare the output
    /// directory, and validate the genome set.
    ///
    /// The binary check comes first so a missing program fails before
    /// anything is written to disk.
    pub fn sanity_check<D: GenomeDb>(&mut self) -> Result<(), PipelineError> {
        if !program_in_path(&self.config.program) {
            return Err(PipelineError::MissingProgram(self.config.program.clone()));
        }

        let output_dir = &self.config.output_dir;
        if output_dir.exists() {
            if !self.config.overwrite {
                return Err(PipelineError::OutputDirExists(output_dir.clone()));
            }
            fs::remove_dir_all(output_dir)?;
        }
        fs::create_dir_all(output_dir)?;

        // probe writability with a scratch file
        let probe = output_dir.join(".write-test");
        fs::write(&probe, b"")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|_| PipelineError::OutputDirNotWritable(output_dir.clone()))?;

        self.genomes = Some(WorkingSet::load::<D>(&self.config.manifest)?);
        Ok(())
    }

    /// Append every genome's predicted proteins to one combined FASTA file.
    ///
    /// Record identifiers concatenate the genome's database hash and the
    /// caller-assigned gene id (`>{hash}_{gene_id}`), which makes them
    /// globally unique across the set without a central counter. Annotates
    /// `num_genes` on each descriptor as a side effect. A failure mid-write
    /// leaves a truncated file; reruns start from scratch.
    pub fn extract_sequences<D: GenomeDb>(&mut self) -> Result<PathBuf, PipelineError> {
        if self.genomes.is_none() {
            return Err(PipelineError::NotValidated);
        }

        let combined_path = self.paths.combined_fasta.clone();
        self.temp.register(combined_path.clone());

        let output = OutputFile::new(&combined_path.to_string_lossy(), None);
        let mut writer = output.writer()?;

        let genomes = self.genomes.as_mut().ok_or(PipelineError::NotValidated)?;

        for descriptor in genomes.iter_mut() {
            log::info!("extracting protein sequences from {}", descriptor.name);
            let db = D::open(&descriptor.path)?;
            let sequences = db.protein_sequences()?;
            for (gene_id, sequence) in &sequences {
                writeln!(writer, ">{}_{}", descriptor.db_hash, gene_id)?;
                writeln!(writer, "{}", sequence)?;
            }
            descriptor.num_genes = Some(sequences.len() as u64);
        }
        writer.flush()?;

        log::info!(
            "{} protein sequences are stored for analysis",
            genomes.total_genes()
        );

        Ok(combined_path)
    }

    /// Run the staged external search against the combined FASTA file and
    /// return the tabular result path.
    pub fn run_search(
        &self,
        combined_path: &Path,
        runner: &mut dyn crate::search::CommandRunner,
    ) -> Result<PathBuf, PipelineError> {
        let search = SearchRunner {
            program: self.config.program.clone(),
            index_prefix: self.paths.index_prefix.clone(),
            raw_output_prefix: self.paths.raw_output_prefix.clone(),
            tabular_output: self.paths.tabular_output.clone(),
            log_file: self.paths.log_file.clone(),
            tmp_dir: std::env::temp_dir(),
            num_threads: self.config.num_threads,
            force: self.config.overwrite,
        };
        let outcome = search.run(combined_path, runner)?;
        Ok(outcome.tabular_path)
    }

    /// Run the whole workflow and return the tabular result path.
    pub fn process<D: GenomeDb>(
        &mut self,
        runner: &mut dyn crate::search::CommandRunner,
    ) -> Result<PathBuf, PipelineError> {
        self.sanity_check::<D>()?;
        let combined_path = self.extract_sequences::<D>()?;
        let tabular_path = self.run_search(&combined_path, runner)?;

        self.temp.cleanup();

        log::info!("tabular search results: {}", tabular_path.display());
        Ok(tabular_path)
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineConfig, PipelineError};
    use crate::genomes::tests::{write_genome_db, write_manifest};
    use crate::genomes::FlatGenomeDb;
    use crate::search::tests::RecordingRunner;
    use std::io::BufRead;
    use std::path::Path;
    use tempfile::tempdir;

    fn two_genome_config(dir: &Path) -> PipelineConfig {
        write_genome_db(dir, "g1.db", "h1", "1", 3);
        write_genome_db(dir, "g2.db", "h2", "1", 5);
        let manifest = write_manifest(dir, &[("g1", "g1.db"), ("g2", "g2.db")]);
        let mut config = PipelineConfig::new(manifest, dir.join("output"));
        // any binary guaranteed to be on PATH works for the discovery check
        config.program = "sh".to_string();
        config
    }

    #[test]
    fn test_existing_output_dir_refused_without_overwrite() {
        let dir = tempdir().unwrap();
        let config = two_genome_config(dir.path());
        std::fs::create_dir_all(&config.output_dir).unwrap();

        let mut pipeline = Pipeline::new(config);
        let err = pipeline.sanity_check::<FlatGenomeDb>().unwrap_err();
        assert!(matches!(err, PipelineError::OutputDirExists(_)));
        assert!(pipeline.genomes().is_none());
    }

    #[test]
    fn test_overwrite_replaces_output_dir() {
        let dir = tempdir().unwrap();
        let mut config = two_genome_config(dir.path());
        config.overwrite = true;
        std::fs::create_dir_all(&config.output_dir).unwrap();
        let stale = config.output_dir.join("stale.txt");
        std::fs::write(&stale, b"old").unwrap();

        let mut pipeline = Pipeline::new(config);
        pipeline.sanity_check::<FlatGenomeDb>().unwrap();
        assert!(!stale.exists());
        assert_eq!(pipeline.genomes().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_program_fails_before_any_output() {
        let dir = tempdir().unwrap();
        let mut config = two_genome_config(dir.path());
        config.program = "definitely-not-a-real-binary-4f2a".to_string();
        let output_dir = config.output_dir.clone();

        let mut pipeline = Pipeline::new(config);
        let err = pipeline.process::<FlatGenomeDb>(&mut RecordingRunner::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingProgram(_)));
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_extraction_builds_unique_record_ids() {
        let dir = tempdir().unwrap();
        let config = two_genome_config(dir.path());

        let mut pipeline = Pipeline::new(config);
        pipeline.sanity_check::<FlatGenomeDb>().unwrap();
        let combined = pipeline.extract_sequences::<FlatGenomeDb>().unwrap();

        let file = std::fs::File::open(&combined).unwrap();
        let ids: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map(|l| l.unwrap())
            .filter(|l| l.starts_with('>'))
            .collect();

        assert_eq!(ids.len(), 8);
        assert_eq!(ids.iter().filter(|id| id.starts_with(">h1_")).count(), 3);
        assert_eq!(ids.iter().filter(|id| id.starts_with(">h2_")).count(), 5);

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());

        let genomes = pipeline.genomes().unwrap();
        assert_eq!(genomes.get("g1").unwrap().num_genes, Some(3));
        assert_eq!(genomes.get("g2").unwrap().num_genes, Some(5));
        assert_eq!(genomes.total_genes(), 8);
    }

    #[test]
    fn test_process_cleans_up_combined_fasta() {
        let dir = tempdir().unwrap();
        let config = two_genome_config(dir.path());

        let mut pipeline = Pipeline::new(config);
        let mut runner = RecordingRunner::new();
        let tabular = pipeline.process::<FlatGenomeDb>(&mut runner).unwrap();

        assert!(tabular.exists());
        assert_eq!(runner.commands.len(), 3);
        assert!(!pipeline.paths.combined_fasta.exists());
        assert!(pipeline.paths.log_file.exists());
    }

    #[test]
    fn test_debug_keeps_intermediates() {
        let dir = tempdir().unwrap();
        let mut config = two_genome_config(dir.path());
        config.debug = true;

        let mut pipeline = Pipeline::new(config);
        pipeline.process::<FlatGenomeDb>(&mut RecordingRunner::new()).unwrap();
        assert!(pipeline.paths.combined_fasta.exists());
    }
}
