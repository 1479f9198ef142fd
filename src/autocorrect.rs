//! Autocorrector
//!
//! Rewrites misspelled names in an `EntitySet` to values that actually occur in
//! the database, recording every rewrite so it can be reported and learned from.

use crate::entities::{Correction, CorrectionKind, EntitySet};
use crate::intent::{Intent, TargetEntity};
use crate::knowledge_base::{KnowledgeBase, KnowledgeSnapshot, DEFAULT_THRESHOLD};
use tracing::{info, warn};

const CUSTOMER_TABLE: &str = "Customer";
const FIRST_NAME: &str = "FirstName";
const LAST_NAME: &str = "LastName";
const ARTIST_TABLE: &str = "Artist";
const ARTIST_NAME: &str = "Name";

pub struct Autocorrector {
    threshold: f64,
}

impl Autocorrector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Correct `entities` in place against the current snapshot and log the
    /// corrections to the knowledge base history.
    pub fn correct(&self, kb: &KnowledgeBase, query: &str, intent: &Intent, entities: &mut EntitySet) {
        let snapshot = kb.snapshot();
        self.apply(&snapshot, intent, entities);

        if !entities.corrections.is_empty() {
            info!(
                "Autocorrect applied: {}",
                entities
                    .corrections
                    .iter()
                    .map(|c| c.describe())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            kb.record_corrections(query, &entities.corrections);
        }
    }

    pub fn apply(&self, kb: &KnowledgeSnapshot, intent: &Intent, entities: &mut EntitySet) {
        let entity_table = intent.target_entity.table_name();
        if !kb.schema.is_empty() && kb.resolve_table(entity_table).is_none() {
            if let Some((table, confidence)) = kb.find_closest_table(entity_table) {
                entities.corrections.push(Correction {
                    kind: CorrectionKind::Entity,
                    original: intent.target_entity.to_string(),
                    suggested: table,
                    confidence,
                    column: None,
                });
            }
        }

        match intent.target_entity {
            TargetEntity::Customer => self.correct_person_names(kb, entities),
            TargetEntity::Artist => self.correct_artists(kb, entities),
            _ => {}
        }
    }

    fn correct_person_names(&self, kb: &KnowledgeSnapshot, entities: &mut EntitySet) {
        for i in 0..entities.person_names.len() {
            let name = entities.person_names[i].clone();

            let (matched, column) = match kb.find_best_match(&name, CUSTOMER_TABLE, FIRST_NAME, self.threshold) {
                Some(m) => (m, FIRST_NAME),
                None => match kb.find_best_match(&name, CUSTOMER_TABLE, LAST_NAME, self.threshold) {
                    Some(m) => (m, LAST_NAME),
                    None => {
                        warn!("No match found for name '{}'", name);
                        entities.warnings.push(format!("No match found for name '{}'", name));
                        continue;
                    }
                },
            };

            let (suggested, confidence) = matched;
            if suggested != name {
                entities.person_names[i] = suggested.clone();
                entities.corrections.push(Correction {
                    kind: CorrectionKind::PersonName,
                    original: name,
                    suggested,
                    confidence,
                    column: Some(column.to_string()),
                });
            }
        }
    }

    fn correct_artists(&self, kb: &KnowledgeSnapshot, entities: &mut EntitySet) {
        for i in 0..entities.other_entities.len() {
            let name = entities.other_entities[i].clone();
            match kb.find_best_match(&name, ARTIST_TABLE, ARTIST_NAME, self.threshold) {
                Some((suggested, confidence)) if suggested != name => {
                    entities.other_entities[i] = suggested.clone();
                    entities.corrections.push(Correction {
                        kind: CorrectionKind::Organization,
                        original: name,
                        suggested,
                        confidence,
                        column: Some(ARTIST_NAME.to_string()),
                    });
                }
                Some(_) => {}
                None => entities.warnings.push(format!("No match found for artist '{}'", name)),
            }
        }
    }
}

impl Default for Autocorrector {
    fn default() -> Self {
        Self::new()
    }
}
