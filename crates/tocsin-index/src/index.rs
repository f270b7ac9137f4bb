use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use tocsin_common::types::Trigger;

/// Characters that separate search terms; everything in this class is
/// replaced by a space before splitting on whitespace.
const TERM_SEPARATORS: &str = r#"[|+\-=&<>!(){}\[\]^"'~*?\\/.,:;_@]"#;

/// Matched fragments per field for UI rendering; empty when the query
/// had no terms or the field did not match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHighlights {
    pub name: String,
    pub desc: String,
}

/// One search hit, most severe first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub trigger_id: String,
    pub highlights: SearchHighlights,
}

struct Document {
    name: String,
    name_lower: String,
    name_tokens: Vec<String>,
    desc: String,
    desc_tokens: Vec<String>,
    tags: HashSet<String>,
    last_check_score: i64,
}

impl Document {
    fn tokens(&self) -> impl Iterator<Item = &String> {
        self.name_tokens.iter().chain(self.desc_tokens.iter())
    }

    fn contains_term(&self, term: &str) -> bool {
        self.tokens().any(|token| token_matches(token, term))
    }
}

/// In-memory trigger search index.
///
/// Reads run concurrently; writes serialize on the document table.
pub struct TriggerIndex {
    documents: RwLock<HashMap<String, Document>>,
    separators: Regex,
}

impl TriggerIndex {
    pub fn new() -> Self {
        TriggerIndex {
            documents: RwLock::new(HashMap::new()),
            separators: Regex::new(TERM_SEPARATORS).expect("separator class is a valid regex"),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Document>> {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Document>> {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        self.separators
            .replace_all(text, " ")
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }

    /// Adds or replaces the document for a trigger.
    pub fn upsert(&self, trigger: &Trigger, last_check_score: i64) {
        let desc = trigger.desc.clone().unwrap_or_default();
        let document = Document {
            name: trigger.name.clone(),
            name_lower: trigger.name.to_lowercase(),
            name_tokens: self.tokenize(&trigger.name),
            desc_tokens: self.tokenize(&desc),
            desc,
            tags: trigger.tags.iter().cloned().collect(),
            last_check_score,
        };
        self.write().insert(trigger.id.clone(), document);
        tracing::debug!(trigger_id = %trigger.id, "Indexed trigger");
    }

    /// Bootstrap helper: indexes a batch of triggers with their scores.
    pub fn fill<'a>(&self, entries: impl IntoIterator<Item = (&'a Trigger, i64)>) {
        for (trigger, score) in entries {
            self.upsert(trigger, score);
        }
    }

    /// Updates a document's severity score; unknown ids are ignored (the
    /// trigger has not been indexed yet or was deleted concurrently).
    pub fn update_score(&self, trigger_id: &str, score: i64) {
        if let Some(document) = self.write().get_mut(trigger_id) {
            document.last_check_score = score;
        }
    }

    pub fn delete(&self, trigger_id: &str) {
        self.write().remove(trigger_id);
    }

    pub fn doc_count(&self) -> usize {
        self.read().len()
    }

    /// Searches the index.
    ///
    /// Every tag in `filter_tags` must be present on a hit; every query
    /// term must match a token of its name or description (by prefix).
    /// `only_errors` restricts hits to a positive check score. Results
    /// are ordered by check score descending, relevance ascending, then
    /// case-insensitive name. A negative `size` returns everything and
    /// forces `page` to 0.
    pub fn search(
        &self,
        filter_tags: &[String],
        query: &str,
        only_errors: bool,
        page: i64,
        size: i64,
    ) -> (Vec<SearchResult>, i64) {
        let terms = self.tokenize(query);
        let documents = self.read();

        let mut hits: Vec<(&String, &Document, f64)> = documents
            .iter()
            .filter(|(_, doc)| !only_errors || doc.last_check_score > 0)
            .filter(|(_, doc)| filter_tags.iter().all(|tag| doc.tags.contains(tag)))
            .filter(|(_, doc)| terms.iter().all(|term| doc.contains_term(term)))
            .map(|(id, doc)| (id, doc, relevance(doc, &terms, &documents)))
            .collect();

        hits.sort_by(|a, b| {
            b.1.last_check_score
                .cmp(&a.1.last_check_score)
                .then_with(|| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
                .then_with(|| a.1.name_lower.cmp(&b.1.name_lower))
        });

        let total = hits.len() as i64;
        let (page, size) = if size < 0 { (0, total) } else { (page.max(0), size) };
        let offset = (page * size).max(0) as usize;

        let results = hits
            .into_iter()
            .skip(offset)
            .take(size as usize)
            .map(|(id, doc, _)| SearchResult {
                trigger_id: id.clone(),
                highlights: SearchHighlights {
                    name: highlight(&doc.name, &terms, &self.separators),
                    desc: highlight(&doc.desc, &terms, &self.separators),
                },
            })
            .collect();

        (results, total)
    }
}

impl Default for TriggerIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn token_matches(token: &str, term: &str) -> bool {
    token == term || token.starts_with(term)
}

/// TF-IDF sum over the query terms. The sort uses it ascending.
fn relevance(doc: &Document, terms: &[String], documents: &HashMap<String, Document>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let doc_total = documents.len() as f64;
    terms
        .iter()
        .map(|term| {
            let tf = doc
                .tokens()
                .filter(|token| token_matches(token.as_str(), term))
                .count() as f64;
            let df = documents
                .values()
                .filter(|other| other.contains_term(term))
                .count() as f64;
            tf * (1.0 + doc_total / (1.0 + df)).ln()
        })
        .sum()
}

/// Wraps matched words of `text` in `<mark>` tags. Empty when nothing
/// matched or the query had no terms.
fn highlight(text: &str, terms: &[String], separators: &Regex) -> String {
    if terms.is_empty() {
        return String::new();
    }
    let mut matched_any = false;
    let fragments: Vec<String> = text
        .split_whitespace()
        .map(|word| {
            let word_matches = separators
                .replace_all(word, " ")
                .split_whitespace()
                .any(|part| {
                    let part = part.to_lowercase();
                    terms.iter().any(|term| token_matches(&part, term))
                });
            if word_matches {
                matched_any = true;
                format!("<mark>{word}</mark>")
            } else {
                word.to_string()
            }
        })
        .collect();

    if matched_any {
        fragments.join(" ")
    } else {
        String::new()
    }
}
