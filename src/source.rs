//! Tabular row sources feeding the compiler.
//!
//! Parsing of real-world source formats lives behind [`RowSource`]. Two
//! implementations ship with the crate: [`MemorySource`] for rows built in
//! code and [`DelimitedFile`] for simple delimiter-separated text files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// One source row. Cells are addressed with 1-based column numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based line (or row) number in the source, for error context.
    pub line: usize,
    pub cells: Vec<String>,
}

impl SourceRow {
    pub fn new(line: usize, cells: Vec<String>) -> Self {
        Self { line, cells }
    }

    /// Cell at a 1-based column, if present.
    pub fn cell(&self, column: usize) -> Option<&str> {
        column
            .checked_sub(1)
            .and_then(|idx| self.cells.get(idx))
            .map(|s| s.as_str())
    }
}

/// A readable table of rows.
///
/// `rows` reads the whole source; the compiler stages a source only after
/// every row was read successfully.
pub trait RowSource: Send + Sync {
    /// Human-readable name used in error messages.
    fn name(&self) -> String;

    /// Read all data rows.
    fn rows(&self) -> Result<Vec<SourceRow>>;
}

/// In-memory row source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    rows: Vec<Vec<String>>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    /// Append a row.
    pub fn push<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    /// Builder-style variant of [`MemorySource::push`].
    pub fn with_row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(cells);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn rows(&self) -> Result<Vec<SourceRow>> {
        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(i, cells)| SourceRow::new(i + 1, cells.clone()))
            .collect())
    }
}

/// Delimiter-separated text file.
///
/// Fields may be wrapped in double quotes; a doubled quote inside a quoted
/// field stands for one quote. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    delimiter: char,
    first_row: usize,
}

impl DelimitedFile {
    /// Comma-separated file starting at line 1.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: ',',
            first_row: 1,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Result<Self> {
        if delimiter == '"' || delimiter == '\n' || delimiter == '\r' {
            return Err(Error::config(
                "delimiter",
                format!("{:?} can not be used as a delimiter", delimiter),
            ));
        }
        self.delimiter = delimiter;
        Ok(self)
    }

    /// First data line (1-based); earlier lines are headers and skipped.
    pub fn with_first_row(mut self, first_row: usize) -> Result<Self> {
        if first_row == 0 {
            return Err(Error::config("first_row", "must be a positive integer"));
        }
        self.first_row = first_row;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for DelimitedFile {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn rows(&self) -> Result<Vec<SourceRow>> {
        let file = File::open(&self.path)
            .map_err(|e| Error::ingest(self.name(), 0, format!("can not read the file: {}", e)))?;
        let reader = BufReader::new(file);

        let mut rows = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| Error::ingest(self.name(), line_no, e.to_string()))?;
            if line_no < self.first_row || line.trim().is_empty() {
                continue;
            }
            rows.push(SourceRow::new(line_no, split_record(&line, self.delimiter)));
        }

        log::debug!("Read {} rows from {:?}", rows.len(), self.path);
        Ok(rows)
    }
}

/// Split one line into cells, honoring double-quoted fields.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' && current.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    cells.push(current);
    cells
}
