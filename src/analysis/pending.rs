//! Table of computations currently in flight, one per cache key.
//!
//! A caller either joins the outcome already registered for a key or
//! receives a [`Reservation`]. The shard lock is held only to register the
//! slot; the computation itself is built and started after it is released.

use super::errors::ComputeError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type Outcome = Result<Value, ComputeError>;

/// Outcome of one computation, awaitable by any number of callers
pub(crate) type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

struct Pending {
    /// Distinguishes this computation from a later one under the same key
    id: u64,
    outcome: SharedOutcome,
}

/// Exclusive right to compute the value for one key
///
/// Dropping it without calling [`Reservation::complete`] releases the slot
/// and resolves every joined caller with [`ComputeError::Aborted`].
pub(crate) struct Reservation {
    table: Arc<PendingTable>,
    key: String,
    id: u64,
    sender: Option<oneshot::Sender<Outcome>>,
}

impl Reservation {
    /// Release the slot, then hand `outcome` to every waiting caller
    pub(crate) fn complete(mut self, outcome: Outcome) {
        self.table.settle(&self.key, self.id);
        if let Some(sender) = self.sender.take() {
            // Every receiver may already be gone
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.table.settle(&self.key, self.id);
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: DashMap<String, Pending>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("in_flight", &self.entries.len())
            .finish()
    }
}

impl PendingTable {
    /// Join the computation for `key`, or reserve the slot if none is in
    /// flight
    ///
    /// Exactly one caller per slot gets `Some(reservation)`; all others get
    /// `None` and the shared outcome.
    pub(crate) fn join_or_reserve(
        self: &Arc<Self>,
        key: &str,
    ) -> (SharedOutcome, Option<Reservation>) {
        let (sender, receiver) = oneshot::channel::<Outcome>();

        let (id, outcome) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => return (occupied.get().outcome.clone(), None),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let outcome = async move {
                    receiver.await.unwrap_or_else(|_| {
                        Err(ComputeError::Aborted(
                            "computation ended without a result".to_string(),
                        ))
                    })
                }
                .boxed()
                .shared();
                vacant.insert(Pending {
                    id,
                    outcome: outcome.clone(),
                });
                (id, outcome)
            }
        };

        let reservation = Reservation {
            table: Arc::clone(self),
            key: key.to_string(),
            id,
            sender: Some(sender),
        };
        (outcome, Some(reservation))
    }

    /// Drop the slot for `key` if it still belongs to computation `id`
    fn settle(&self, key: &str, id: u64) {
        self.entries.remove_if(key, |_, pending| pending.id == id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_caller_joins() {
        let table = Arc::new(PendingTable::default());
        let (first, reservation) = table.join_or_reserve("k");
        let reservation = reservation.unwrap();

        let (second, joined) = table.join_or_reserve("k");
        assert!(joined.is_none());

        reservation.complete(Ok(json!(1)));
        assert_eq!(first.await.unwrap(), json!(1));
        assert_eq!(second.await.unwrap(), json!(1));
        assert!(!table.contains("k"));
    }

    #[tokio::test]
    async fn test_dropped_reservation_releases_slot() {
        let table = Arc::new(PendingTable::default());
        let (outcome, reservation) = table.join_or_reserve("k");
        drop(reservation);

        assert!(!table.contains("k"));
        assert!(matches!(outcome.await, Err(ComputeError::Aborted(_))));

        // The next caller owns a fresh slot
        let (_, reservation) = table.join_or_reserve("k");
        assert!(reservation.is_some());
    }

    #[test]
    fn test_table_is_usable_while_reserved() {
        let table = Arc::new(PendingTable::default());
        let (_, reservation) = table.join_or_reserve("k");
        // No shard lock is held once the reservation is handed out
        assert_eq!(table.len(), 1);
        assert!(table.contains("k"));

        let stale = Reservation {
            table: Arc::clone(&table),
            key: "k".to_string(),
            id: u64::MAX,
            sender: None,
        };
        stale.complete(Ok(json!(0)));
        assert!(table.contains("k"));

        drop(reservation);
        assert_eq!(table.len(), 0);
    }
}
