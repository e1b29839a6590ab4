//! Staged invocation of the external similarity-search binary.
//!
//! The all-vs-all protein search runs as three sequential subprocess
//! stages: `makedb` (index build), `blastp` (the search itself), and
//! `view` (tabular export). Every stage is idempotent: if its expected
//! output artifact already exists and no earlier stage was re-run, the
//! stage is skipped. Once a stage actually executes, all later stages are
//! forced to execute as well; forcing never cascades backward.
//!
//! The filesystem is the only state between stages. Each invoked command
//! line is appended to the run log before execution, and stdout/stderr of
//! the subprocess are appended to the same log.
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error(
        "The '{stage}' stage of '{program}' did not produce its expected \
         output; check the log at '{log_path}'"
    )]
    StageFailed {
        program: String,
        stage: String,
        log_path: PathBuf,
    },
}

/// Check whether an executable is discoverable, either as a direct path or
/// through the `PATH` environment variable.
pub fn program_in_path(program: &str) -> bool {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file();
    }
    match env::var_os("PATH") {
        Some(paths) => env::split_paths(&paths).any(|dir| dir.join(program).is_file()),
        None => false,
    }
}

/// The state of one search stage after a [`SearchRunner::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// The stage has not been considered yet.
    Pending,
    /// The stage's artifact already existed and was reused.
    Skipped,
    /// The stage's subprocess was invoked and its artifact verified.
    Executed,
    /// The subprocess ran but the expected artifact never appeared.
    Failed,
}

/// One fully-rendered external command, kept as program + argument list so
/// the exact invocation can be logged before it runs.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    /// Render the command line as logged and as executed.
    pub fn render(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Executes stage commands. The production implementation shells out; tests
/// substitute a recording implementation so stage logic can be exercised
/// without the external binary.
pub trait CommandRunner {
    /// Run the command synchronously, appending its stdout and stderr to
    /// `log_path`. Returns whether the process exited successfully.
    fn run(&mut self, command: &StageCommand, log_path: &Path) -> io::Result<bool>;
}

/// Runs stage commands as blocking subprocesses. There is no timeout and no
/// cancellation hook; a hung external binary hangs the run.
pub struct SubprocessRunner;

impl CommandRunner for SubprocessRunner {
    fn run(&mut self, command: &StageCommand, log_path: &Path) -> io::Result<bool> {
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let status = Command::new(&command.program)
            .args(&command.args)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .status()?;
        Ok(status.success())
    }
}

/// Per-stage outcome of a search run, plus the final deliverable path.
#[derive(Debug)]
pub struct SearchOutcome {
    pub makedb: StageState,
    pub blastp: StageState,
    pub view: StageState,
    pub tabular_path: PathBuf,
}

/// Coordinates the three search stages against the external binary.
///
/// All paths are derived by the pipeline from its output directory; the
/// runner itself never decides where artifacts live.
pub struct SearchRunner {
    /// Name of the external search binary (e.g. `diamond`).
    pub program: String,
    /// Index prefix; the index artifact is `<index_prefix>.dmnd`.
    pub index_prefix: PathBuf,
    /// Raw search output prefix; the artifact is `<raw_output_prefix>.daa`.
    pub raw_output_prefix: PathBuf,
    /// The tabular result file, the final deliverable.
    pub tabular_output: PathBuf,
    /// Append-only log shared by all stages.
    pub log_file: PathBuf,
    /// Scratch directory handed to the search stage.
    pub tmp_dir: PathBuf,
    /// Thread count passed through to the external binary.
    pub num_threads: usize,
    /// Force the index build (and therefore every later stage) even when
    /// artifacts exist.
    pub force: bool,
}

impl SearchRunner {
    /// Path of the index artifact produced by `makedb`.
    pub fn index_artifact(&self) -> PathBuf {
        append_extension(&self.index_prefix, "dmnd")
    }

    /// Path of the raw search artifact produced by `blastp`.
    pub fn raw_artifact(&self) -> PathBuf {
        append_extension(&self.raw_output_prefix, "daa")
    }

    fn makedb_command(&self, query: &Path) -> StageCommand {
        StageCommand {
            program: self.program.clone(),
            args: vec![
                "makedb".to_string(),
                "--in".to_string(),
                query.to_string_lossy().into_owned(),
                "-d".to_string(),
                self.index_prefix.to_string_lossy().into_owned(),
                "-p".to_string(),
                self.num_threads.to_string(),
            ],
        }
    }

    fn blastp_command(&self, query: &Path) -> StageCommand {
        StageCommand {
            program: self.program.clone(),
            args: vec![
                "blastp".to_string(),
                "-q".to_string(),
                query.to_string_lossy().into_owned(),
                "-d".to_string(),
                self.index_prefix.to_string_lossy().into_owned(),
                "-a".to_string(),
                self.raw_output_prefix.to_string_lossy().into_owned(),
                "-t".to_string(),
                self.tmp_dir.to_string_lossy().into_owned(),
                "-p".to_string(),
                self.num_threads.to_string(),
            ],
        }
    }

    fn view_command(&self) -> StageCommand {
        StageCommand {
            program: self.program.clone(),
            args: vec![
                "view".to_string(),
                "-a".to_string(),
                self.raw_artifact().to_string_lossy().into_owned(),
                "-o".to_string(),
                self.tabular_output.to_string_lossy().into_owned(),
                "-p".to_string(),
                self.num_threads.to_string(),
            ],
        }
    }

    /// Run the three stages in order against `query`, skipping any stage
    /// whose artifact is already present unless an earlier stage ran.
    pub fn run(
        &self,
        query: &Path,
        runner: &mut dyn CommandRunner,
    ) -> Result<SearchOutcome, SearchError> {
        let mut outcome = SearchOutcome {
            makedb: StageState::Pending,
            blastp: StageState::Pending,
            view: StageState::Pending,
            tabular_path: self.tabular_output.clone(),
        };

        // forcing cascades strictly forward
        let mut force_next = self.force;

        if self.index_artifact().exists() && !force_next {
            log::info!(
                "An existing search index was found at '{}' and will be reused",
                self.index_artifact().display()
            );
            outcome.makedb = StageState::Skipped;
        } else {
            outcome.makedb = self.execute_stage(
                "makedb",
                self.makedb_command(query),
                &self.index_artifact(),
                runner,
            )?;
            force_next = true;
        }

        if self.raw_artifact().exists() && !force_next {
            log::info!(
                "An existing search result was found at '{}'; skipping the search",
                self.raw_artifact().display()
            );
            outcome.blastp = StageState::Skipped;
        } else {
            outcome.blastp = self.execute_stage(
                "blastp",
                self.blastp_command(query),
                &self.raw_artifact(),
                runner,
            )?;
            force_next = true;
        }

        if self.tabular_output.exists() && !force_next {
            log::info!(
                "An existing tabular output was found at '{}'; not generating another one",
                self.tabular_output.display()
            );
            outcome.view = StageState::Skipped;
        } else {
            outcome.view =
                self.execute_stage("view", self.view_command(), &self.tabular_output, runner)?;
        }

        Ok(outcome)
    }

    fn execute_stage(
        &self,
        stage: &str,
        command: StageCommand,
        expected_output: &Path,
        runner: &mut dyn CommandRunner,
    ) -> Result<StageState, SearchError> {
        log::info!(
            "{}: running the '{}' stage (using {} thread(s))",
            self.program,
            stage,
            self.num_threads
        );

        // the exact command line goes into the log before it runs
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        writeln!(log, "CMD: {}", command.render())?;
        drop(log);

        let exited_ok = runner.run(&command, &self.log_file)?;

        if !exited_ok || !expected_output.exists() {
            return Err(SearchError::StageFailed {
                program: self.program.clone(),
                stage: stage.to_string(),
                log_path: self.log_file.clone(),
            });
        }

        log::info!("{} output: {}", stage, expected_output.display());
        Ok(StageState::Executed)
    }
}

fn append_extension(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
