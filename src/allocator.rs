//! Query ID allocation
//!
//! The counter is the only mutable state shared by every request handler.
//! It is owned by one `QueryIdAllocator` that handlers reach through
//! `Arc`, never through a global.

use std::sync::Mutex;

use crate::error::EvalError;
use crate::protocol::QueryId;

/// Issues strictly increasing query identifiers
#[derive(Debug)]
pub struct QueryIdAllocator {
    next: Mutex<QueryId>,
}

impl QueryIdAllocator {
    /// Create an allocator whose first identifier is `first`
    pub fn new(first: QueryId) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }

    /// Allocate the next identifier
    ///
    /// The increment happens under the lock, so concurrent callers observe
    /// distinct values and back-to-back calls differ by exactly one.
    /// On failure no identifier is consumed.
    pub fn allocate(&self) -> Result<QueryId, EvalError> {
        self.allocate_with(|_| Ok(()))
    }

    /// Allocate the next identifier, running `record` before it is issued
    ///
    /// `record` runs while the counter is locked. If it fails the counter
    /// does not move and the caller gets `AllocatorUnavailable`.
    pub fn allocate_with<F>(&self, record: F) -> Result<QueryId, EvalError>
    where
        F: FnOnce(QueryId) -> Result<(), EvalError>,
    {
        let mut next = self
            .next
            .lock()
            .map_err(|e| EvalError::AllocatorUnavailable(format!("counter lock poisoned: {}", e)))?;

        let id = *next;
        let following = id
            .checked_add(1)
            .ok_or_else(|| EvalError::AllocatorUnavailable("query ID space exhausted".into()))?;
        record(id).map_err(|e| {
            EvalError::AllocatorUnavailable(format!("could not record query ID {}: {}", id, e))
        })?;

        *next = following;
        Ok(id)
    }

    /// The identifier the next successful `allocate` will return
    pub fn peek(&self) -> Result<QueryId, EvalError> {
        self.next
            .lock()
            .map(|next| *next)
            .map_err(|e| EvalError::AllocatorUnavailable(format!("counter lock poisoned: {}", e)))
    }
}

impl Default for QueryIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sequential_calls_increase_by_one() {
        let allocator = QueryIdAllocator::new(100);
        let ids: Vec<_> = (0..4).map(|_| allocator.allocate().unwrap()).collect();
        assert_eq!(ids, vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_concurrent_calls_never_collide() {
        let allocator = Arc::new(QueryIdAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            // Each thread's own calls never overlap, so they must be increasing
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate query ID {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(allocator.peek().unwrap(), 4001);
    }

    #[test]
    fn test_exhausted_counter_issues_nothing() {
        let allocator = QueryIdAllocator::new(QueryId::MAX);
        let err = allocator.allocate().unwrap_err();
        assert!(matches!(err, EvalError::AllocatorUnavailable(_)));
        // The failed call must not have moved the counter
        assert_eq!(allocator.peek().unwrap(), QueryId::MAX);
    }

    #[test]
    fn test_failed_record_issues_nothing() {
        let allocator = QueryIdAllocator::new(7);
        let err = allocator
            .allocate_with(|_| Err(EvalError::Storage("store lock poisoned".into())))
            .unwrap_err();
        assert!(matches!(err, EvalError::AllocatorUnavailable(_)));
        assert_eq!(allocator.peek().unwrap(), 7);

        let mut recorded = None;
        let id = allocator
            .allocate_with(|id| {
                recorded = Some(id);
                Ok(())
            })
            .unwrap();
        assert_eq!((id, recorded), (7, Some(7)));
    }

    #[test]
    fn test_poisoned_lock_reports_unavailable() {
        let allocator = Arc::new(QueryIdAllocator::new(1));
        let poisoner = allocator.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.next.lock().unwrap();
            panic!("poison the counter");
        })
        .join();

        assert!(matches!(
            allocator.allocate(),
            Err(EvalError::AllocatorUnavailable(_))
        ));
    }
}
