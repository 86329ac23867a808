//! Per-author sequence counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use procura_core::AuthorId;

/// Sequence store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceStoreError {
    /// The backing counter store could not be reached or is corrupted.
    #[error("sequence store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent `(author) -> last issued` counter.
///
/// `allocate` is the only mutator. For one author, concurrent callers must
/// each observe a distinct, strictly increasing value: implementations use an
/// atomic increment or a transactional read-increment-write, never an
/// unisolated read followed by a write. Different authors need no
/// coordination.
pub trait SequenceStore: Send + Sync {
    /// Increment and return the author's counter (the first call returns 1).
    fn allocate(&self, author: &AuthorId) -> Result<u64, SequenceStoreError>;

    /// Last value issued to `author`, if any.
    fn last_issued(&self, author: &AuthorId) -> Result<Option<u64>, SequenceStoreError>;
}

impl<S> SequenceStore for Arc<S>
where
    S: SequenceStore + ?Sized,
{
    fn allocate(&self, author: &AuthorId) -> Result<u64, SequenceStoreError> {
        (**self).allocate(author)
    }

    fn last_issued(&self, author: &AuthorId) -> Result<Option<u64>, SequenceStoreError> {
        (**self).last_issued(author)
    }
}

/// In-memory sequence store for tests/dev.
///
/// The map lock is only held to find or insert an author's counter; the
/// increment itself is a lock-free `fetch_add`.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    counters: RwLock<HashMap<AuthorId, Arc<AtomicU64>>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart `author` at `last_issued`, e.g. when restoring from a snapshot.
    pub fn seed(&self, author: AuthorId, last_issued: u64) -> Result<(), SequenceStoreError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| SequenceStoreError::Unavailable("counter map poisoned".into()))?;
        counters.insert(author, Arc::new(AtomicU64::new(last_issued)));
        Ok(())
    }

    fn counter(&self, author: &AuthorId) -> Result<Arc<AtomicU64>, SequenceStoreError> {
        {
            let counters = self
                .counters
                .read()
                .map_err(|_| SequenceStoreError::Unavailable("counter map poisoned".into()))?;
            if let Some(counter) = counters.get(author) {
                return Ok(Arc::clone(counter));
            }
        }

        let mut counters = self
            .counters
            .write()
            .map_err(|_| SequenceStoreError::Unavailable("counter map poisoned".into()))?;
        Ok(Arc::clone(counters.entry(author.clone()).or_default()))
    }
}

impl SequenceStore for InMemorySequenceStore {
    fn allocate(&self, author: &AuthorId) -> Result<u64, SequenceStoreError> {
        let counter = self.counter(author)?;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn last_issued(&self, author: &AuthorId) -> Result<Option<u64>, SequenceStoreError> {
        let counters = self
            .counters
            .read()
            .map_err(|_| SequenceStoreError::Unavailable("counter map poisoned".into()))?;
        Ok(counters
            .get(author)
            .map(|c| c.load(Ordering::SeqCst))
            .filter(|last| *last > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::thread;

    fn author(raw: &str) -> AuthorId {
        AuthorId::new(raw).unwrap()
    }

    #[test]
    fn first_allocation_starts_at_one() {
        let store = InMemorySequenceStore::new();
        let a = author("user-1");
        assert_eq!(store.last_issued(&a).unwrap(), None);
        assert_eq!(store.allocate(&a).unwrap(), 1);
        assert_eq!(store.allocate(&a).unwrap(), 2);
        assert_eq!(store.last_issued(&a).unwrap(), Some(2));
    }

    #[test]
    fn authors_are_counted_independently() {
        let store = InMemorySequenceStore::new();
        assert_eq!(store.allocate(&author("a")).unwrap(), 1);
        assert_eq!(store.allocate(&author("b")).unwrap(), 1);
        assert_eq!(store.allocate(&author("a")).unwrap(), 2);
    }

    #[test]
    fn seeded_store_continues_after_restored_value() {
        let a = author("user-1");
        let store = InMemorySequenceStore::new();
        store.allocate(&a).unwrap();
        store.seed(a.clone(), 41).unwrap();
        assert_eq!(store.allocate(&a).unwrap(), 42);
    }

    #[test]
    fn seeding_a_poisoned_store_reports_unavailable() {
        let store = Arc::new(InMemorySequenceStore::new());
        let holder = Arc::clone(&store);
        let _ = thread::spawn(move || {
            let _guard = holder.counters.write().unwrap();
            panic!("writer died holding the counter map");
        })
        .join();

        let err = store.seed(author("user-1"), 41).unwrap_err();
        assert!(matches!(err, SequenceStoreError::Unavailable(_)));
    }

    #[test]
    fn concurrent_allocations_never_duplicate() {
        let store = Arc::new(InMemorySequenceStore::new());
        let a = author("user-12345678");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let a = a.clone();
                thread::spawn(move || {
                    (0..250)
                        .map(|_| store.allocate(&a).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let values = handle.join().unwrap();
            // Each caller observes its own values in increasing order.
            assert!(values.windows(2).all(|w| w[0] < w[1]));
            for v in values {
                assert!(seen.insert(v), "duplicate sequence {v}");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(store.last_issued(&a).unwrap(), Some(2000));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: N sequential allocations are N distinct increasing values.
        #[test]
        fn sequential_allocations_strictly_increase(n in 1usize..200usize) {
            let store = InMemorySequenceStore::new();
            let a = author("prop-author");
            let values: Vec<u64> = (0..n).map(|_| store.allocate(&a).unwrap()).collect();
            prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(values.len(), n);
        }
    }
}
