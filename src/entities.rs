//! Entity Extractor
//!
//! Regex-only extraction of candidate literal values (names, places, quoted terms)
//! from a question. Nothing here is checked against the schema; the knowledge base
//! does that in the autocorrect step.

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

lazy_static! {
    static ref PROPER_NAME: Regex = Regex::new(r"[A-Z][a-z]+(?:\s[A-Z][a-z]+)*").unwrap();
    static ref BY_PHRASE: Regex = Regex::new(r"\b[Bb][Yy]\s+([A-Z][A-Za-z0-9\s\.&\-'/]+)").unwrap();
    static ref QUOTED: Regex = Regex::new(r#"['"](.*?)['"]"#).unwrap();
    static ref PLACE: Regex =
        Regex::new(r"\b(?:lives in|located in|from|in)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)*)").unwrap();
}

/// Capitalized words that are never person names
const NAME_STOPLIST: &[&str] = &[
    "customer", "customers", "artist", "artists", "album", "albums", "track", "tracks",
    "invoice", "invoices", "genre", "employee", "select", "from", "where", "show", "list",
    "find", "get", "give", "display", "how", "what", "which", "who", "count", "sum", "the",
    "and", "or", "all", "top", "me",
];

const MAX_NAME_WORDS: usize = 2;

/// Why a value was rewritten by the autocorrect step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    PersonName,
    Organization,
    Entity,
}

/// One autocorrection applied to an extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub kind: CorrectionKind,
    pub original: String,
    pub suggested: String,
    pub confidence: f64,
    pub column: Option<String>,
}

impl Correction {
    pub fn describe(&self) -> String {
        format!(
            "'{}' → '{}' (confidence: {:.2})",
            self.original, self.suggested, self.confidence
        )
    }
}

/// Candidate literal values extracted from one question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub person_names: Vec<String>,
    pub locations: BTreeMap<String, String>,
    /// Organization / artist candidates captured after "by"
    pub other_entities: Vec<String>,
    pub target_values: Vec<String>,
    pub corrections: Vec<Correction>,
    pub warnings: Vec<String>,
}

/// EntitySet as sent to the completion oracle: the correction audit trail stays local.
#[derive(Debug, Serialize)]
pub struct PromptEntities<'a> {
    pub person_names: &'a [String],
    pub locations: &'a BTreeMap<String, String>,
    pub other_entities: &'a [String],
    pub target_values: &'a [String],
}

impl EntitySet {
    pub fn for_prompt(&self) -> PromptEntities<'_> {
        PromptEntities {
            person_names: &self.person_names,
            locations: &self.locations,
            other_entities: &self.other_entities,
            target_values: &self.target_values,
        }
    }

    pub fn prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.for_prompt()).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, query: &str) -> EntitySet {
        let mut entities = EntitySet::default();

        let places: Vec<String> = PLACE
            .captures_iter(query)
            .map(|c| c[1].trim().to_string())
            .collect();
        if let Some(place) = places.first() {
            entities.locations.insert("place".to_string(), place.clone());
        }

        entities.person_names = PROPER_NAME
            .find_iter(query)
            .filter_map(|m| strip_leading_stopwords(m.as_str()))
            .filter(|name| name.split_whitespace().count() <= MAX_NAME_WORDS)
            .filter(|name| !places.contains(name))
            .unique()
            .collect();

        if let Some(caps) = BY_PHRASE.captures(query) {
            let phrase = capitalized_prefix(&caps[1]);
            if !phrase.is_empty() && !entities.person_names.contains(&phrase) {
                entities.other_entities.push(phrase);
            }
        }

        entities.target_values = QUOTED
            .captures_iter(query)
            .map(|c| c[1].to_string())
            .filter(|v| !v.is_empty())
            .collect();

        debug!("Extracted entities from '{}': {:?}", query, entities);
        entities
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stopword(word: &str) -> bool {
    NAME_STOPLIST.contains(&word.to_lowercase().as_str())
}

/// "Show Helena Holy" -> "Helena Holy"; a phrase made only of stopwords is dropped.
fn strip_leading_stopwords(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase
        .split_whitespace()
        .skip_while(|w| is_stopword(w))
        .collect();
    if words.is_empty() || words.iter().any(|w| is_stopword(w)) {
        return None;
    }
    Some(words.join(" "))
}

/// Keep the leading run of capitalized words (and symbols such as '&')
fn capitalized_prefix(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .take_while(|w| !w.starts_with(|c: char| c.is_lowercase()))
        .join(" ")
        .trim_end_matches(['.', '-', '\''])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_names() {
        let entities = EntityExtractor::new().extract("Show customers named Helena and Bjorn");
        assert_eq!(entities.person_names, vec!["Helena", "Bjorn"]);
        assert!(entities.other_entities.is_empty());
    }

    #[test]
    fn test_leading_command_word_stripped() {
        let entities = EntityExtractor::new().extract("Find Helena Holy");
        assert_eq!(entities.person_names, vec!["Helena Holy"]);
    }

    #[test]
    fn test_three_word_phrase_dropped() {
        let entities = EntityExtractor::new().extract("info on Luis Goncalves Silva");
        assert!(entities.person_names.is_empty());
    }

    #[test]
    fn test_by_phrase() {
        let entities = EntityExtractor::new().extract("tracks by AC/DC");
        assert_eq!(entities.other_entities, vec!["AC/DC"]);
        assert!(entities.person_names.is_empty());
    }

    #[test]
    fn test_by_phrase_already_a_name() {
        let entities = EntityExtractor::new().extract("albums by Aerosmith");
        assert_eq!(entities.person_names, vec!["Aerosmith"]);
        assert!(entities.other_entities.is_empty());
    }

    #[test]
    fn test_quoted_values() {
        let entities = EntityExtractor::new().extract("albums titled 'Big Ones' or \"Facelift\"");
        assert_eq!(entities.target_values, vec!["Big Ones", "Facelift"]);
    }

    #[test]
    fn test_location_not_a_person() {
        let entities = EntityExtractor::new().extract("customers from Brazil");
        assert_eq!(entities.locations.get("place").map(String::as_str), Some("Brazil"));
        assert!(entities.person_names.is_empty());
    }

    #[test]
    fn test_prompt_view_strips_corrections() {
        let mut entities = EntityExtractor::new().extract("Show Bjprn");
        entities.corrections.push(Correction {
            kind: CorrectionKind::PersonName,
            original: "Bjprn".to_string(),
            suggested: "Bjorn".to_string(),
            confidence: 0.9,
            column: Some("FirstName".to_string()),
        });
        let json = entities.prompt_json();
        assert!(json.contains("Bjprn"));
        assert!(!json.contains("corrections"));
        assert!(!json.contains("confidence"));
    }
}
