//! Functionality for orchestrating all-against-all protein similarity
//! searches across a set of genome databases.
//!
//! The workflow is thin coordination glue around external collaborators:
//! a manifest of genome databases is validated into a [`WorkingSet`], every
//! predicted protein sequence is extracted into one combined FASTA file,
//! and an external alignment binary (`diamond` by default) is driven
//! through three staged invocations (index build, all-vs-all search,
//! tabular export) to produce a tabular similarity file for downstream
//! clustering. Stages are idempotent: a stage whose output artifact is
//! already on disk is skipped, unless an earlier stage was re-run.
//!
//! ```no_run
//! use pansearch::prelude::*;
//!
//! let config = PipelineConfig::new("external-genomes.txt", "pan-output");
//! let mut pipeline = Pipeline::new(config);
//! let tabular = pipeline
//!     .process::<FlatGenomeDb>(&mut SubprocessRunner)
//!     .expect("pipeline failed");
//! println!("search results: {}", tabular.display());
//! ```
//!
//! The genome database format sits behind the [`GenomeDb`] trait; the
//! bundled [`FlatGenomeDb`] reads flat TSV databases with a `#key=value`
//! metadata block. Likewise the external binary sits behind
//! [`CommandRunner`], so tests can exercise the staging logic without
//! `diamond` installed.
//!
//! [`WorkingSet`]: crate::genomes::WorkingSet
//! [`GenomeDb`]: crate::genomes::GenomeDb
//! [`FlatGenomeDb`]: crate::genomes::FlatGenomeDb
//! [`CommandRunner`]: crate::search::CommandRunner

pub mod file;
pub mod genomes;
pub mod pipeline;
pub mod search;

pub use genomes::{FlatGenomeDb, GenomeDb, GenomeDescriptor, GenomeSetError, WorkingSet};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelinePaths};
pub use search::{CommandRunner, SearchError, SearchOutcome, SearchRunner, StageState, SubprocessRunner};

pub mod prelude {
    pub use crate::genomes::{FlatGenomeDb, GenomeDb, WorkingSet};
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineError};
    pub use crate::search::{CommandRunner, SubprocessRunner};
}
