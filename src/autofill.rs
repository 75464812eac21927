//! Autofill suggestions for partially typed queries
//!
//! Ranking quality is not this crate's concern; the contract is cardinality
//! (exactly `count` strings) and determinism for a given store state.

use std::sync::Arc;

use crate::error::EvalError;
use crate::store::Store;

/// Source of completions for a partial query
pub trait Autofill: Send + Sync {
    /// Return exactly `count` suggestions for `partial_query`
    fn suggest(&self, partial_query: &str, count: usize) -> Result<Vec<String>, EvalError>;
}

/// Endings appended to the partial query when history runs out
const COMPLETIONS: &[&str] = &[
    "near me",
    "tutorial",
    "examples",
    "for beginners",
    "best practices",
    "reddit",
    "vs alternatives",
    "meaning",
];

/// Prefix matching over previously reported queries, padded with canned completions
pub struct PrefixAutofill {
    store: Arc<Store>,
}

impl PrefixAutofill {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Reported raw queries extending `partial_query`, most frequent first
    fn from_history(&self, partial_query: &str) -> Result<Vec<String>, EvalError> {
        let needle = partial_query.trim().to_lowercase();
        let mut matches: Vec<(String, usize)> = self
            .store
            .raw_query_counts()?
            .into_iter()
            .filter(|(query, _)| {
                let lowered = query.to_lowercase();
                lowered.starts_with(&needle) && lowered != needle
            })
            .collect();

        // Frequency, then alphabetical, so equal counts order deterministically
        matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(matches.into_iter().map(|(query, _)| query).collect())
    }
}

impl Autofill for PrefixAutofill {
    fn suggest(&self, partial_query: &str, count: usize) -> Result<Vec<String>, EvalError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut suggestions = self.from_history(partial_query)?;
        suggestions.truncate(count);

        let stem = partial_query.trim().trim_end_matches('?').trim_end();
        let mut completions = COMPLETIONS
            .iter()
            .map(|ending| join(stem, ending))
            .filter(|s| !suggestions.contains(s))
            .collect::<Vec<_>>()
            .into_iter();

        let mut variant = 0;
        while suggestions.len() < count {
            let next = completions.next().unwrap_or_else(|| {
                variant += 1;
                format!("{} ({})", join(stem, "more"), variant)
            });
            suggestions.push(next);
        }

        Ok(suggestions)
    }
}

fn join(stem: &str, ending: &str) -> String {
    if stem.is_empty() {
        ending.to_string()
    } else {
        format!("{} {}", stem, ending)
    }
}
