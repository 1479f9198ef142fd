//! Query Intent Classifier
//!
//! Shallow, rule-based classification of a natural-language question. Rules are
//! ordered tables of keyword buckets; the first bucket with a hit decides.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// What the user wants to do with the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    AggregationSum,
    AggregationCount,
    ListAll,
    LocationFilter,
    Ranking,
    MetaQuery,
    Select,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::AggregationSum => "aggregation_sum",
            IntentType::AggregationCount => "aggregation_count",
            IntentType::ListAll => "list_all",
            IntentType::LocationFilter => "location_filter",
            IntentType::Ranking => "ranking",
            IntentType::MetaQuery => "meta_query",
            IntentType::Select => "select",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which business entity the question is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEntity {
    Customer,
    Artist,
    Album,
    Track,
    Invoice,
}

impl TargetEntity {
    /// Table that conventionally stores this entity
    pub fn table_name(&self) -> &'static str {
        match self {
            TargetEntity::Customer => "Customer",
            TargetEntity::Artist => "Artist",
            TargetEntity::Album => "Album",
            TargetEntity::Track => "Track",
            TargetEntity::Invoice => "Invoice",
        }
    }
}

impl fmt::Display for TargetEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetEntity::Customer => "customer",
            TargetEntity::Artist => "artist",
            TargetEntity::Album => "album",
            TargetEntity::Track => "track",
            TargetEntity::Invoice => "invoice",
        };
        f.write_str(s)
    }
}

/// Classified intent of one question. Built once per query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: IntentType,
    pub target_entity: TargetEntity,
    pub requires_join: bool,
    pub has_filter: bool,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            intent_type: IntentType::Select,
            target_entity: TargetEntity::Customer,
            requires_join: false,
            has_filter: false,
        }
    }
}

/// Ordered (keywords, label) buckets. First bucket with a matching keyword wins.
pub const INTENT_RULES: &[(&[&str], IntentType)] = &[
    (&["sum", "total", "amount", "spent"], IntentType::AggregationSum),
    (&["count", "how many", "number"], IntentType::AggregationCount),
    (
        &["all customers", "all artists", "all albums", "list all", "show all"],
        IntentType::ListAll,
    ),
    (&["lives in", "from", "located in"], IntentType::LocationFilter),
    (
        &["most expensive", "highest", "top", "maximum"],
        IntentType::Ranking,
    ),
];

/// Catalog questions override every other bucket
pub const META_PHRASES: &[&str] = &["db name", "database name", "list tables", "show tables"];

pub const ENTITY_RULES: &[(&[&str], TargetEntity)] = &[
    (&["artist", "band"], TargetEntity::Artist),
    (&["album"], TargetEntity::Album),
    (&["track", "song"], TargetEntity::Track),
    (&["invoice"], TargetEntity::Invoice),
];

const FILTER_WORDS: &[&str] = &["where", "who", "which", "by"];

fn first_match<T: Copy>(text: &str, rules: &[(&[&str], T)]) -> Option<T> {
    rules
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, label)| *label)
}

pub struct QueryIntentClassifier;

impl QueryIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a question. Never fails; falls back to `select`/`customer`.
    pub fn classify(&self, query: &str) -> Intent {
        let lower = query.to_lowercase();

        let mut intent_type = first_match(&lower, INTENT_RULES).unwrap_or(IntentType::Select);
        if META_PHRASES.iter().any(|p| lower.contains(p)) {
            intent_type = IntentType::MetaQuery;
        }

        let target_entity = first_match(&lower, ENTITY_RULES).unwrap_or(TargetEntity::Customer);

        let requires_join = matches!(
            intent_type,
            IntentType::AggregationSum | IntentType::AggregationCount | IntentType::Ranking
        );
        let has_filter = intent_type == IntentType::LocationFilter
            || FILTER_WORDS.iter().any(|w| lower.contains(w));

        let intent = Intent {
            intent_type,
            target_entity,
            requires_join,
            has_filter,
        };
        debug!("Classified '{}' as {:?}", query, intent);
        intent
    }
}

impl Default for QueryIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}
