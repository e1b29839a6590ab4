//! Encapsulates plaintext and gzip-compressed file input and output.
//!
//! The [`InputFile`] and [`OutputFile`] abstractions are shared by the
//! manifest reader, the flat genome database reader, and the combined
//! FASTA writer. Genome database files carry a leading block of
//! `#key=value` metadata lines; [`InputFile::collect_metadata`] parses
//! that block and [`InputFile::continue_reading`] resumes at the first
//! content line.
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use std::fs::File;
use std::io::Write;
use std::io::{self, BufWriter};
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
}

/// Check if a file is a gzipped by looking for the magic numbers
fn is_gzipped_file(file_path: &str) -> io::Result<bool> {
    let mut file = File::open(file_path)?;
    let mut buffer = [0; 2];
    let nread = file.read(&mut buffer)?;

    Ok(nread == 2 && buffer == [0x1f, 0x8b])
}

/// Represents an input file.
///
/// This abstracts how data is read in, allowing both plaintext and
/// gzip-compressed input to be read through a common interface.
pub struct InputFile {
    pub filepath: String,
    /// Number of leading metadata lines found by [`InputFile::collect_metadata`],
    /// skipped by [`InputFile::continue_reading`].
    metadata_lines: usize,
}

impl InputFile {
    /// Constructs a new `InputFile`.
    ///
    /// # Arguments
    ///
    /// * `filepath` - A string slice that holds the path to the file. Gzip
    /// compression is detected from the file contents, not the extension.
    pub fn new(filepath: &str) -> Self {
        Self {
            filepath: filepath.to_string(),
            metadata_lines: 0,
        }
    }

    /// Opens the file and returns a buffered reader, transparently
    /// decompressing gzip input.
    pub fn reader(&self) -> Result<BufReader<Box<dyn Read>>, FileError> {
        let file = File::open(self.filepath.clone())?;
        let is_gzipped = is_gzipped_file(&self.filepath)?;
        let reader: Box<dyn Read> = if is_gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(BufReader::new(reader))
    }

    /// Checks if the first content line of the file starts with the expected
    /// header, ignoring any leading `#`-prefixed lines.
    pub fn has_header(&self, expect: &str) -> Result<bool, FileError> {
        let buf_reader = self.reader()?;
        for line in buf_reader.lines() {
            let line = line?;
            if line.starts_with('#') {
                continue;
            }
            return Ok(line.starts_with(expect));
        }
        Ok(false)
    }

    /// Parses the leading block of `#key=value` lines into an ordered map.
    ///
    /// The block ends at the first line that does not start with `prefix`.
    /// Lines under the prefix that lack an `=` are ignored (plain comments).
    /// The number of consumed lines is remembered so a subsequent
    /// [`InputFile::continue_reading`] starts at the first content line.
    pub fn collect_metadata(
        &mut self,
        prefix: &str,
    ) -> Result<IndexMap<String, String>, FileError> {
        let buf_reader = self.reader()?;
        let mut metadata = IndexMap::new();
        self.metadata_lines = 0;

        for line in buf_reader.lines() {
            let line = line?;
            if !line.starts_with(prefix) {
                break;
            }
            self.metadata_lines += 1;
            let stripped = &line[prefix.len()..];
            if let Some((key, value)) = stripped.split_once('=') {
                metadata.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Ok(metadata)
    }

    /// Re-opens the file, skipping past the metadata block found by
    /// [`InputFile::collect_metadata`].
    pub fn continue_reading(&self) -> Result<BufReader<Box<dyn Read>>, FileError> {
        let mut buf_reader = self.reader()?;
        let mut line = String::new();
        for _ in 0..self.metadata_lines {
            line.clear();
            buf_reader.read_line(&mut line)?;
        }
        Ok(buf_reader)
    }
}

/// Represents an output file.
///
/// This abstracts writing both plaintext and gzip-compressed files.
pub struct OutputFile {
    pub filepath: String,
    pub header: Option<Vec<String>>,
}

impl OutputFile {
    /// Constructs a new `OutputFile`.
    ///
    /// # Arguments
    ///
    /// * `filepath` - A string slice that holds the path to the file. If the
    /// file extension is `.gz`, `OutputFile` will automatically write
    /// gzip-compressed output.
    /// * `header` - An optional vector of strings representing commented
    /// header lines to be written to the file.
    pub fn new(filepath: &str, header: Option<Vec<String>>) -> Self {
        Self {
            filepath: filepath.to_string(),
            header,
        }
    }

    /// Opens the file and returns a writer. If a header is set, it is
    /// written first, each line prefixed with `#`.
    pub fn writer(&self) -> Result<Box<dyn Write>, io::Error> {
        let outfile = &self.filepath;
        let is_gzip = outfile.ends_with(".gz");
        let mut writer: Box<dyn Write> = if is_gzip {
            Box::new(BufWriter::new(GzEncoder::new(
                File::create(outfile)?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(File::create(outfile)?))
        };
        // write header if one is set
        if let Some(entries) = &self.header {
            for entry in entries {
                writeln!(writer, "#{}", entry)?;
            }
        }
        Ok(writer)
    }
}
