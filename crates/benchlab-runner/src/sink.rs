//! Append-only writer for the semicolon-separated result file.
//!
//! Everything goes through append mode so a resumed campaign keeps writing
//! to the same file, after the rows already present. Metadata travels as
//! `# key: value` comment lines; data rows share one header line whose
//! column order is the key order of the first emitted row.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use benchlab_core::Result;

pub const CSV_SEPARATOR: &str = ";";

pub struct ResultSink {
    path: PathBuf,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> ResultSink {
        ResultSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn comment(&self, text: &str) -> Result<()> {
        self.append(&format!("# {text}"))
    }

    pub fn line(&self, text: &str) -> Result<()> {
        self.append(text)
    }

    fn append(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{text}")?;
        Ok(())
    }
}

/// Drop a file into a run's record directory. A run without a record
/// directory silently keeps nothing, same as the result-row path.
pub fn write_record_file(
    record_data_dir: Option<&Path>,
    filename: &str,
    content: &str,
) -> Result<()> {
    let Some(dir) = record_data_dir else {
        return Ok(());
    };
    fs::create_dir_all(dir)?;
    fs::write(dir.join(filename), content)?;
    Ok(())
}
