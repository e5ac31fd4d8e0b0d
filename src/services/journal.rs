// src/services/journal.rs
//! Narrative journal ledger.
//!
//! Entries are Markdown blocks appended to `journal.md`: a `key: value`
//! metadata header between `---` delimiter lines, a free-text body, then a
//! separator line of 50 `=`. Entries are immutable once appended; there is no
//! update mechanism. The entry's timestamp is its identity; collisions within
//! the same instant are not deduplicated.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::utils::timestamps::{now_iso, validate_timestamp};

pub const ENTRY_TYPES: &[&str] = &["reflection", "gratitude", "learning", "goal_review", "planning"];

const SEPARATOR_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("entry content cannot be empty")]
    EmptyContent,
    #[error("invalid entry type: {0}")]
    InvalidType(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Parsed metadata header of a journal block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalMeta {
    pub timestamp: String,
    pub entry_type: String,
    pub tags: Vec<String>,
    pub mood: Option<String>,
    pub location: Option<String>,
    pub weather: Option<String>,
}

/// One journal entry: metadata plus body text.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalBlock {
    pub meta: JournalMeta,
    pub content: String,
}

/// Single writer for `journal.md`.
pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating memory directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new entry; returns the timestamp that identifies it.
    pub fn add_entry(
        &mut self,
        content: &str,
        entry_type: &str,
        tags: &[String],
        mood: Option<&str>,
        location: Option<&str>,
        weather: Option<&str>,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(JournalError::EmptyContent.into());
        }
        if !ENTRY_TYPES.contains(&entry_type) {
            return Err(JournalError::InvalidType(entry_type.to_string()).into());
        }
        let timestamp = now_iso();
        if !validate_timestamp(&timestamp) {
            return Err(JournalError::InvalidTimestamp(timestamp).into());
        }

        let meta = JournalMeta {
            timestamp: timestamp.clone(),
            entry_type: entry_type.to_string(),
            tags: tags.to_vec(),
            mood: mood.map(|s| s.to_string()),
            location: location.map(|s| s.to_string()),
            weather: weather.map(|s| s.to_string()),
        };
        let block = render_block(&meta, content);

        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal {}", self.path.display()))?;
        write!(f, "{}", block)
            .with_context(|| format!("appending to journal {}", self.path.display()))?;
        writeln!(f, "\n{}\n", "=".repeat(SEPARATOR_LEN))
            .with_context(|| format!("appending to journal {}", self.path.display()))?;

        tracing::info!(entry_type, %timestamp, "appended journal entry");
        Ok(timestamp)
    }

    /// All entries in file order. Blocks without a parseable header are
    /// skipped with a warning.
    pub fn get_all_entries(&self) -> Result<Vec<JournalBlock>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading journal {}", self.path.display()))?;

        let mut entries = Vec::new();
        for block in split_blocks(&text) {
            match parse_block(&block) {
                Some(entry) => entries.push(entry),
                None => {
                    tracing::warn!("skipping journal block without parseable header");
                }
            }
        }
        Ok(entries)
    }

    /// Conjunctive filtering: every supplied filter must match. The tag filter
    /// is a subset test (an entry with extra tags still matches); the text
    /// query is a case-insensitive substring match over content plus tags.
    pub fn search_entries(
        &self,
        query: Option<&str>,
        entry_type: Option<&str>,
        tags: Option<&[String]>,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Vec<JournalBlock>> {
        let entries = self.get_all_entries()?;
        let mut matched = Vec::new();

        for entry in entries {
            if let Some(want) = entry_type {
                if entry.meta.entry_type != want {
                    continue;
                }
            }
            if let Some(want_tags) = tags {
                let has_all = want_tags.iter().all(|t| entry.meta.tags.contains(t));
                if !has_all {
                    continue;
                }
            }
            if date_from.is_some() || date_to.is_some() {
                // Entries whose header timestamp does not parse are invisible
                // to date filters; a hand-edited block never aborts the search.
                let entry_date = date_prefix(&entry.meta.timestamp);
                if !validate_timestamp(entry_date) {
                    continue;
                }
                if let Some(from) = date_from {
                    if entry_date < date_prefix(from) {
                        continue;
                    }
                }
                if let Some(to) = date_to {
                    if entry_date > date_prefix(to) {
                        continue;
                    }
                }
            }
            if let Some(q) = query {
                let haystack = format!(
                    "{} {}",
                    entry.content.to_lowercase(),
                    entry.meta.tags.join(" ").to_lowercase()
                );
                if !haystack.contains(&q.to_lowercase()) {
                    continue;
                }
            }
            matched.push(entry);
        }
        Ok(matched)
    }

    /// Newest first by header timestamp, truncated to `limit`. Entries with
    /// unsortable timestamps simply sort by their (string) value.
    pub fn get_recent_entries(&self, limit: usize) -> Result<Vec<JournalBlock>> {
        let mut entries = self.get_all_entries()?;
        entries.sort_by(|a, b| b.meta.timestamp.cmp(&a.meta.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }
}

// Char-boundary safe: a garbled timestamp comes back whole rather than
// panicking mid-codepoint.
fn date_prefix(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

fn render_block(meta: &JournalMeta, content: &str) -> String {
    let mut header = String::new();
    header.push_str(&format!("timestamp: {}\n", meta.timestamp));
    header.push_str(&format!("type: {}\n", meta.entry_type));
    header.push_str(&format!("tags: [{}]\n", meta.tags.join(", ")));
    if let Some(mood) = &meta.mood {
        header.push_str(&format!("mood: {}\n", mood));
    }
    if let Some(location) = &meta.location {
        header.push_str(&format!("location: {}\n", location));
    }
    if let Some(weather) = &meta.weather {
        header.push_str(&format!("weather: {}\n", weather));
    }
    format!("---\n{}---\n\n{}\n\n", header, content)
}

/// Split the raw file on separator lines (50+ `=`).
fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.len() >= SEPARATOR_LEN && line.chars().all(|c| c == '=') {
            if !current.trim().is_empty() {
                blocks.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        blocks.push(current.trim().to_string());
    }
    blocks
}

/// Parse one block: `---` header lines, then body. Returns `None` when the
/// header delimiters or a timestamp are missing.
fn parse_block(block: &str) -> Option<JournalBlock> {
    let mut lines = block.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }

    let mut meta = JournalMeta::default();
    let mut saw_any = false;
    for line in lines.by_ref() {
        let line = line.trim();
        if line == "---" {
            if !saw_any || meta.timestamp.is_empty() {
                return None;
            }
            let body_start = block.find("---")? + 3;
            let rest = &block[body_start..];
            let body_end = rest.find("---")? + 3;
            let content = rest[body_end..].trim().to_string();
            return Some(JournalBlock { meta, content });
        }
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        match key.trim() {
            "timestamp" => meta.timestamp = value.to_string(),
            "type" => meta.entry_type = value.to_string(),
            "tags" => meta.tags = parse_tag_list(value),
            "mood" => meta.mood = Some(value.to_string()),
            "location" => meta.location = Some(value.to_string()),
            "weather" => meta.weather = Some(value.to_string()),
            _ => {}
        }
        saw_any = true;
    }
    None
}

fn parse_tag_list(value: &str) -> Vec<String> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
