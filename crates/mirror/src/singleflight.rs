//! Per-key collapsing of concurrent duplicate fetches.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

/// Outcome of joining a flight.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlightError<E> {
    /// The leader's fetch failed; every caller of the flight sees the same
    /// error.
    #[error("fetch failed: {0}")]
    Failed(E),

    /// The leader was cancelled before completing, so no result exists for
    /// this flight. Each caller applies its own policy; nothing is retried
    /// implicitly.
    #[error("fetch leader was cancelled")]
    LeaderCancelled,
}

struct Flight<V, E> {
    id: u64,
    tx: broadcast::Sender<Result<V, E>>,
}

enum Role<V, E> {
    Leader { id: u64, tx: broadcast::Sender<Result<V, E>> },
    Waiter(broadcast::Receiver<Result<V, E>>),
}

/// Collapses concurrent operations for the same key into one execution.
///
/// The first caller for a key becomes the leader and runs its future in its
/// own task context; callers arriving while the flight is live subscribe to
/// the result broadcast instead of executing. The flight record is removed
/// *before* the result is sent, so a caller arriving after completion starts
/// a fresh flight rather than observing a finished one.
///
/// Cancellation: a waiter that stops polling simply drops its receiver and
/// the flight is unaffected. If the leader's future is dropped, the guard
/// removes the flight and the broadcast closes, surfacing
/// `FlightError::LeaderCancelled` to every waiter.
pub struct Singleflight<K, V, E> {
    flights: Mutex<HashMap<K, Flight<V, E>>>,
    next_id: AtomicU64,
}

impl<K, V, E> Default for Singleflight<K, V, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> Singleflight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live flights, for observability and tests.
    pub fn in_flight(&self) -> usize {
        lock_flights(&self.flights).len()
    }

    /// Execute `fetch` for `key`, or join an execution already in flight.
    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<V, FlightError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let role = {
            let mut flights = lock_flights(&self.flights);
            match flights.get(&key) {
                Some(flight) => Role::Waiter(flight.tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    flights.insert(key.clone(), Flight { id, tx: tx.clone() });
                    Role::Leader { id, tx }
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => match rx.recv().await {
                Ok(result) => result.map_err(FlightError::Failed),
                // The sender dropped without broadcasting: the leader was
                // cancelled mid-fetch.
                Err(_) => Err(FlightError::LeaderCancelled),
            },
            Role::Leader { id, tx } => {
                let guard = FlightGuard {
                    flights: &self.flights,
                    key: &key,
                    id,
                };
                let result = fetch().await;
                // Remove the record first so late arrivals start a fresh
                // flight instead of subscribing to a completed one.
                guard.finish();
                let _ = tx.send(result.clone());
                result.map_err(FlightError::Failed)
            }
        }
    }
}

/// The flight map lock is never held across an await; a poisoned lock is
/// recovered rather than propagated.
fn lock_flights<'a, K, V, E>(
    flights: &'a Mutex<HashMap<K, Flight<V, E>>>,
) -> std::sync::MutexGuard<'a, HashMap<K, Flight<V, E>>> {
    match flights.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Removes the flight record when the leader finishes or is dropped.
struct FlightGuard<'a, K: Eq + Hash, V, E> {
    flights: &'a Mutex<HashMap<K, Flight<V, E>>>,
    key: &'a K,
    id: u64,
}

impl<K: Eq + Hash, V, E> FlightGuard<'_, K, V, E> {
    fn finish(self) {
        // Drop runs the removal.
    }
}

impl<K: Eq + Hash, V, E> Drop for FlightGuard<'_, K, V, E> {
    fn drop(&mut self) {
        let mut flights = lock_flights(self.flights);
        // Only remove the flight this guard owns; a fresh flight for the
        // same key may already have replaced it.
        if flights.get(self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(self.key);
        }
    }
}
