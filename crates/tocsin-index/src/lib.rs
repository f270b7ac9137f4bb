//! Full-text + tag search over triggers, ranked by severity.
//!
//! [`TriggerIndex`] keeps an in-memory inverted view of every trigger's
//! name, description and tags together with its last check score. The
//! check engine pushes score updates after each persisted check; trigger
//! CRUD upserts or deletes documents. Search results are ordered by
//! check score (most severe first), then text relevance, then name.

pub mod index;

pub use index::{SearchHighlights, SearchResult, TriggerIndex};

#[cfg(test)]
mod tests;
