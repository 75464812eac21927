//! Shared state handed to every request handler

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::allocator::QueryIdAllocator;
use crate::autofill::{Autofill, PrefixAutofill};
use crate::config::Config;
use crate::protocol::QueryId;
use crate::store::Store;

/// Shared state for the evaluation service
///
/// Cloning is cheap: every field is a handle to the single instance owned by
/// the running service.
#[derive(Clone)]
pub struct AppState {
    /// Issues query identifiers; the only counter on the hot path
    pub allocator: Arc<QueryIdAllocator>,
    /// Accepted reports and allocated identifiers
    pub store: Arc<Store>,
    /// Suggestion source for GetAutofill
    pub autofill: Arc<dyn Autofill>,
    /// Largest num_suggestions accepted
    pub max_suggestions: usize,
}

impl AppState {
    /// State over an existing store with the default prefix autofill
    pub fn new(store: Arc<Store>, first_query_id: QueryId, max_suggestions: usize) -> Self {
        Self {
            allocator: Arc::new(QueryIdAllocator::new(first_query_id)),
            autofill: Arc::new(PrefixAutofill::new(store.clone())),
            store,
            max_suggestions,
        }
    }

    /// Build state from configuration, opening the journal if one is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => Store::open(dir)
                .with_context(|| format!("Failed to open store in {}", dir.display()))?,
            None => Store::in_memory(),
        };

        Ok(Self::new(
            Arc::new(store),
            config.first_query_id,
            config.max_suggestions,
        ))
    }
}
