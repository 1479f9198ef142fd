//! Correction history: an append-only log of the corrections applied per query

use super::store::KnowledgeStore;
use crate::entities::Correction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The log is written to disk every this many entries
pub const FLUSH_EVERY: usize = 10;
const TOP_PATTERNS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub corrections: Vec<Correction>,
}

/// Most frequent `original -> suggested` rewrites
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPatterns {
    pub total_corrections: usize,
    pub common_mistakes: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
pub struct CorrectionHistory {
    entries: Vec<CorrectionEntry>,
}

impl CorrectionHistory {
    pub fn from_entries(entries: Vec<CorrectionEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CorrectionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one query's corrections, flushing on every `FLUSH_EVERY`th entry.
    /// A failed flush is logged; the in-memory log is kept either way.
    pub fn record(&mut self, query: &str, corrections: &[Correction], store: &KnowledgeStore) {
        if corrections.is_empty() {
            return;
        }
        self.entries.push(CorrectionEntry {
            timestamp: Utc::now(),
            query: query.to_string(),
            corrections: corrections.to_vec(),
        });

        if self.entries.len() % FLUSH_EVERY == 0 {
            match store.save_history(&self.entries) {
                Ok(()) => debug!("Flushed {} correction history entries", self.entries.len()),
                Err(e) => warn!("Could not save correction history: {}", e),
            }
        }
    }

    pub fn analyze_patterns(&self) -> CorrectionPatterns {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for correction in self.entries.iter().flat_map(|e| e.corrections.iter()) {
            let key = format!("{} -> {}", correction.original, correction.suggested);
            match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, count)) => *count += 1,
                None => counts.push((key, 1)),
            }
        }
        // stable: equal counts keep first-seen order
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(TOP_PATTERNS);

        CorrectionPatterns {
            total_corrections: self.entries.len(),
            common_mistakes: counts,
        }
    }
}
