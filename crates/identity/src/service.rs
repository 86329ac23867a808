//! Allocation + formatting, with the degraded-uniqueness fallback.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use procura_core::AuthorId;

use crate::lineage::{CartId, format_cart_id};
use crate::sequence::{SequenceStore, SequenceStoreError};

/// How strongly an issued id is known to be unique for its author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uniqueness {
    /// Sequence came from the counter store.
    Guaranteed,
    /// Counter store failed; the sequence is timestamp-derived. Distinct within
    /// this service, but it may collide with ids minted elsewhere.
    Degraded,
}

/// A freshly minted cart id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCartId {
    pub id: CartId,
    pub sequence: u64,
    pub uniqueness: Uniqueness,
}

impl IssuedCartId {
    pub fn is_degraded(&self) -> bool {
        self.uniqueness == Uniqueness::Degraded
    }
}

/// Identifier Derivation Service: allocates and formats cart ids.
#[derive(Debug)]
pub struct IdentifierService<S> {
    store: S,
    allow_degraded: bool,
    last_degraded: AtomicU64,
}

impl<S: SequenceStore> IdentifierService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            allow_degraded: true,
            last_degraded: AtomicU64::new(0),
        }
    }

    /// Whether a counter-store failure may fall back to timestamp ids.
    pub fn with_degraded_fallback(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically increment and return the author's sequence.
    pub fn allocate_sequence(&self, author: &AuthorId) -> Result<u64, SequenceStoreError> {
        self.store.allocate(author)
    }

    /// Allocate a sequence and format the cart id for `author`.
    pub fn next_cart_id(&self, author: &AuthorId) -> Result<IssuedCartId, SequenceStoreError> {
        match self.store.allocate(author) {
            Ok(sequence) => Ok(IssuedCartId {
                id: format_cart_id(author, sequence),
                sequence,
                uniqueness: Uniqueness::Guaranteed,
            }),
            Err(err) if self.allow_degraded => {
                let sequence = self.degraded_sequence();
                let id = format_cart_id(author, sequence);
                tracing::warn!(
                    author = %author,
                    cart_id = %id,
                    error = %err,
                    "sequence store failed; issuing timestamp-derived cart id with degraded uniqueness"
                );
                Ok(IssuedCartId {
                    id,
                    sequence,
                    uniqueness: Uniqueness::Degraded,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Millisecond timestamp, bumped past the last degraded sequence so two
    /// fallbacks in the same millisecond still differ.
    fn degraded_sequence(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let (Ok(last) | Err(last)) =
            self.last_degraded
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)));
        now.max(last + 1)
    }
}
