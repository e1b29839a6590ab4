use clap::Parser;
use pansearch::prelude::*;
use std::path::PathBuf;

const INFO: &str = "\
pansearch: all-against-all protein similarity search across genomes

Validates a manifest of genome databases, extracts their predicted
protein sequences into one combined FASTA file, and drives an external
alignment binary (diamond by default) to produce a tabular similarity
file for downstream pangenome clustering.
";

#[derive(Parser)]
#[clap(name = "pansearch")]
#[clap(about = INFO)]
struct Cli {
    /// a TSV manifest with 'name' and 'path' columns, one row per genome
    /// database; relative paths are resolved against the manifest's
    /// directory
    #[arg(short = 'i', long, required = true)]
    manifest: PathBuf,

    /// the directory all outputs are written under
    #[arg(short = 'o', long, required = true)]
    output_dir: PathBuf,

    /// number of threads handed to the external search binary
    #[arg(short = 'T', long, default_value_t = 1)]
    threads: usize,

    /// the external search binary to drive
    #[arg(long, default_value = "diamond")]
    program: String,

    /// replace an existing output directory (also forces the search
    /// index to be rebuilt)
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// keep temporary intermediate files for inspection
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn run() -> Result<(), PipelineError> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::new(cli.manifest, cli.output_dir);
    config.num_threads = cli.threads;
    config.program = cli.program;
    config.overwrite = cli.overwrite;
    config.debug = cli.debug;

    let mut pipeline = Pipeline::new(config);
    let tabular = pipeline.process::<FlatGenomeDb>(&mut SubprocessRunner)?;
    println!("{}", tabular.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    match run() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
