// Event ingestion - one JSON object per line
//
// Blank lines are skipped. A malformed line yields a `Json` error carrying
// its 1-based line number and the reader moves on to the next line.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use tracing::info;

use crate::error::{AnalyzerError, Result};
use crate::event::Event;

pub struct EventReader<R: BufRead> {
    lines: Lines<R>,
    line: usize,
}

impl EventReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        info!(path = %path.display(), "Reading events");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Line number of the last line read
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(
                serde_json::from_str(&text).map_err(|source| AnalyzerError::Json { line, source }),
            );
        }
    }
}
