//! Character dictionary for CTC decoding
//!
//! Index 0 is the CTC blank. Line `k` of the dictionary file (1-indexed)
//! is the character for class index `k`.

use std::path::Path;
use tracing::{info, warn};

use super::error::VisionError;

/// Placeholder stored at the blank index
const BLANK: &str = "blank";

/// Immutable character table, shared read-only between recognition calls
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    entries: Vec<String>,
}

impl Dictionary {
    /// Build from dictionary text, one character per line
    ///
    /// Lines are trimmed, except that a line holding only spaces keeps a
    /// single space so a space class survives.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::with_capacity(text.lines().count() + 1);
        entries.push(BLANK.to_string());

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let trimmed = line.trim();
            if trimmed.is_empty() && line.contains(' ') {
                entries.push(" ".to_string());
            } else {
                entries.push(trimmed.to_string());
            }
        }

        Self { entries }
    }

    /// Load a dictionary file
    pub fn from_path(path: &Path) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(path)?;
        let dictionary = Self::parse(&text);
        info!(
            "Loaded dictionary with {} characters from {:?}",
            dictionary.len() - 1,
            path
        );
        Ok(dictionary)
    }

    /// Load a dictionary file, or fall back to [`Dictionary::ascii`]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(dictionary) if dictionary.len() > 1 => dictionary,
            Ok(_) => {
                warn!("Dictionary {:?} is empty, using built-in ASCII dictionary", path);
                Self::ascii()
            }
            Err(e) => {
                warn!(
                    "Failed to load dictionary {:?} ({}), using built-in ASCII dictionary",
                    path, e
                );
                Self::ascii()
            }
        }
    }

    /// Built-in dictionary: digits, upper and lower case ASCII letters
    pub fn ascii() -> Self {
        let chars: String = ('0'..='9')
            .chain('A'..='Z')
            .chain('a'..='z')
            .map(|c| format!("{}\n", c))
            .collect();
        Self::parse(&chars)
    }

    /// Number of entries including the blank
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn blank_index(&self) -> usize {
        0
    }

    /// Character for a class index; `None` for the blank and out-of-range
    pub fn get(&self, index: usize) -> Option<&str> {
        if index == self.blank_index() {
            return None;
        }
        self.entries.get(index).map(String::as_str)
    }

    /// Map class indices to a string, skipping unknown indices
    pub fn decode(&self, indices: &[usize]) -> String {
        indices.iter().filter_map(|&i| self.get(i)).collect()
    }
}
