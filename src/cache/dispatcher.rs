//! Coalescing Dispatcher Module
//!
//! Guarantees at most one outstanding source call per key. Concurrent callers
//! for the same key attach to a single in-flight request and all receive a
//! clone of its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Callback run at settlement while the request is still registered.
pub type Commit<V> = Box<dyn FnOnce(&Result<V>) + Send>;

// == Abandon Policy ==
/// What happens to a source call once every waiter has gone away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AbandonPolicy {
    /// Let the call finish and commit its result for later callers.
    #[default]
    Complete,
    /// Abort the call and forget the request.
    Cancel,
}

#[derive(Debug)]
struct Waiter<V> {
    id: u64,
    tx: oneshot::Sender<Result<V>>,
}

#[derive(Debug)]
struct InFlightRequest<K, V> {
    key: K,
    /// Pending callers, in wake order
    waiters: Vec<Waiter<V>>,
    abort: AbortHandle,
}

#[derive(Debug)]
struct Registry<K, V> {
    /// Every unsettled request, including detached ones
    flights: HashMap<u64, InFlightRequest<K, V>>,
    /// The request new callers for a key attach to
    current: HashMap<K, u64>,
}

#[derive(Debug)]
struct Table<K, V> {
    registry: Mutex<Registry<K, V>>,
    next_id: AtomicU64,
    coalesced: AtomicU64,
    abandon: AbandonPolicy,
}

impl<K: Eq + Hash, V> Table<K, V> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Removes a settled request and hands back its waiters.
    ///
    /// `commit` only runs if the request is still the current one for its key.
    fn finish(
        &self,
        flight_id: u64,
        outcome: Option<&Result<V>>,
        commit: Option<Commit<V>>,
    ) -> Vec<Waiter<V>> {
        let mut registry = self.registry.lock();
        let Some(flight) = registry.flights.remove(&flight_id) else {
            return Vec::new();
        };

        // Released before commit; a panicking commit must not strand the key
        if registry.current.get(&flight.key) == Some(&flight_id) {
            registry.current.remove(&flight.key);
            if let (Some(outcome), Some(commit)) = (outcome, commit) {
                commit(outcome);
            }
        }
        flight.waiters
    }

    fn leave(&self, flight_id: u64, waiter_id: u64) {
        let mut registry = self.registry.lock();
        let Some(flight) = registry.flights.get_mut(&flight_id) else {
            return;
        };

        flight.waiters.retain(|w| w.id != waiter_id);
        if !flight.waiters.is_empty() || self.abandon == AbandonPolicy::Complete {
            return;
        }

        if let Some(flight) = registry.flights.remove(&flight_id) {
            if registry.current.get(&flight.key) == Some(&flight_id) {
                registry.current.remove(&flight.key);
            }
            flight.abort.abort();
            debug!(flight_id, "Last waiter left, source call cancelled");
        }
    }
}

/// Owned by the spawned source task; settles the request exactly once,
/// even if the task panics or is aborted.
struct Settlement<K: Eq + Hash, V> {
    table: Arc<Table<K, V>>,
    flight_id: u64,
    commit: Option<Commit<V>>,
    settled: bool,
}

impl<K: Eq + Hash, V: Clone> Settlement<K, V> {
    fn settle(mut self, outcome: Result<V>) {
        self.settled = true;
        let waiters = self
            .table
            .finish(self.flight_id, Some(&outcome), self.commit.take());

        for waiter in waiters {
            // A waiter that stopped listening has already been accounted for
            let _ = waiter.tx.send(outcome.clone());
        }
    }
}

impl<K: Eq + Hash, V> Drop for Settlement<K, V> {
    fn drop(&mut self) {
        if !self.settled {
            let waiters = self.table.finish(self.flight_id, None, None);
            if !waiters.is_empty() {
                warn!(
                    flight_id = self.flight_id,
                    waiters = waiters.len(),
                    "Source call ended without a result"
                );
            }
        }
    }
}

/// Detaches a suspended caller from its request if the caller is dropped.
struct WaiterGuard<'a, K: Eq + Hash, V> {
    table: &'a Table<K, V>,
    flight_id: u64,
    waiter_id: u64,
    armed: bool,
}

impl<K: Eq + Hash, V> Drop for WaiterGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.armed {
            self.table.leave(self.flight_id, self.waiter_id);
        }
    }
}

// == Dispatcher ==
/// In-flight registry keyed by request key.
///
/// The caller that finds no request for its key spawns the source call onto
/// the tokio runtime; the call is owned by that task, not by any caller, so
/// any waiter (the first one included) may go away without stalling the rest.
/// When the last waiter leaves, [`AbandonPolicy`] decides whether the call
/// keeps running.
#[derive(Debug)]
pub struct Dispatcher<K, V> {
    table: Arc<Table<K, V>>,
}

impl<K, V> Clone for Dispatcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K, V> Dispatcher<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(abandon: AbandonPolicy) -> Self {
        Self {
            table: Arc::new(Table {
                registry: Mutex::new(Registry {
                    flights: HashMap::new(),
                    current: HashMap::new(),
                }),
                next_id: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                abandon,
            }),
        }
    }

    // == Fetch Once ==
    /// Resolves `key` through a single shared source call.
    ///
    /// - If a live request for `key` is in flight, the caller joins it.
    /// - Otherwise `recheck` runs under the registry lock; a `Some` answer is
    ///   returned directly. This closes the gap between a caller's miss and a
    ///   concurrent request committing.
    /// - Otherwise `fetch` is spawned and the caller waits on it. When it
    ///   settles, `commit` sees the outcome before the request is unregistered.
    pub async fn fetch_once<R, F, C>(&self, key: K, recheck: R, fetch: F, commit: C) -> Result<V>
    where
        R: FnOnce() -> Option<V>,
        F: Future<Output = Result<V>> + Send + 'static,
        C: FnOnce(&Result<V>) + Send + 'static,
    {
        let waiter_id = self.table.next_id();
        let (tx, rx) = oneshot::channel();

        let flight_id = {
            let mut registry = self.table.registry.lock();
            let joined = registry
                .current
                .get(&key)
                .copied()
                .filter(|flight_id| registry.flights.contains_key(flight_id));

            match joined {
                Some(flight_id) => {
                    if let Some(flight) = registry.flights.get_mut(&flight_id) {
                        flight.waiters.push(Waiter { id: waiter_id, tx });
                    }
                    self.table.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(flight_id, "Joined in-flight source call");
                    flight_id
                }
                None => {
                    if let Some(value) = recheck() {
                        return Ok(value);
                    }

                    let flight_id = self.table.next_id();
                    let settlement = Settlement {
                        table: Arc::clone(&self.table),
                        flight_id,
                        commit: Some(Box::new(commit) as Commit<V>),
                        settled: false,
                    };
                    let handle = tokio::spawn(async move {
                        let outcome = fetch.await;
                        settlement.settle(outcome);
                    });

                    registry.current.insert(key.clone(), flight_id);
                    registry.flights.insert(
                        flight_id,
                        InFlightRequest {
                            key,
                            waiters: vec![Waiter { id: waiter_id, tx }],
                            abort: handle.abort_handle(),
                        },
                    );
                    debug!(flight_id, "Started source call");
                    flight_id
                }
            }
        };

        let mut guard = WaiterGuard {
            table: &self.table,
            flight_id,
            waiter_id,
            armed: true,
        };
        let received = rx.await;
        guard.armed = false;

        received.unwrap_or_else(|_| {
            Err(CacheError::Abandoned(
                "source call ended without a result".to_string(),
            ))
        })
    }

    // == Forget ==
    /// Detaches the in-flight request for `key`, if any.
    ///
    /// Its current waiters still receive the outcome, but the outcome is not
    /// committed and new callers start a fresh source call.
    pub fn forget(&self, key: &K) -> bool {
        self.table.registry.lock().current.remove(key).is_some()
    }

    /// Detaches every in-flight request.
    pub fn forget_all(&self) -> usize {
        let mut registry = self.table.registry.lock();
        let count = registry.current.len();
        registry.current.clear();
        count
    }

    /// Number of unsettled source calls, detached ones included.
    pub fn in_flight(&self) -> usize {
        self.table.registry.lock().flights.len()
    }

    /// Whether new callers for `key` would join an existing call.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.table.registry.lock().current.contains_key(key)
    }

    /// Number of callers that joined an existing call instead of starting one.
    pub fn coalesced(&self) -> u64 {
        self.table.coalesced.load(Ordering::Relaxed)
    }

    pub fn abandon_policy(&self) -> AbandonPolicy {
        self.table.abandon
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;
    use tokio_test::{assert_pending, task};

    /// A fetch that counts invocations and waits for `gate` before answering.
    fn gated_fetch(
        calls: &Arc<AtomicUsize>,
        gate: &Arc<Notify>,
        outcome: Result<u32>,
    ) -> impl Future<Output = Result<u32>> + Send + 'static {
        let calls = Arc::clone(calls);
        let gate = Arc::clone(gate);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            outcome
        }
    }

    fn no_commit(_: &Result<u32>) {}

    #[tokio::test]
    async fn test_single_caller_gets_value() {
        let dispatcher: Dispatcher<String, u32> = Dispatcher::new(AbandonPolicy::Complete);

        let value = dispatcher
            .fetch_once("k".to_string(), || None, async { Ok(7) }, no_commit)
            .await;

        assert_eq!(value, Ok(7));
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.coalesced(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dispatcher = dispatcher.clone();
            let fetch = gated_fetch(&calls, &gate, Ok(42));
            handles.push(tokio::spawn(async move {
                dispatcher.fetch_once("B", || None, fetch, no_commit).await
            }));
        }

        // Let every caller register before releasing the source call
        while dispatcher.coalesced() < 9 {
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.is_in_flight(&"B"));
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_broadcast_to_all_waiters() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let err = CacheError::source_failure("upstream down");

        let failing = gated_fetch(&calls, &gate, Err(err.clone()));
        let first = dispatcher.fetch_once(1, || None, failing, no_commit);
        let unused = gated_fetch(&calls, &gate, Ok(0));
        let second = dispatcher.fetch_once(1, || None, unused, no_commit);
        let release = async {
            while dispatcher.coalesced() < 1 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
        };

        let (a, b, ()) = tokio::join!(first, second, release);
        assert_eq!(a, Err(err.clone()));
        assert_eq!(b, Err(err));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_sees_outcome_once() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let value = dispatcher
            .fetch_once(3, || None, async { Ok(9) }, move |outcome: &Result<u32>| {
                sink.lock().push(outcome.clone());
            })
            .await;

        assert_eq!(value, Ok(9));
        assert_eq!(*seen.lock(), vec![Ok(9)]);
    }

    #[tokio::test]
    async fn test_recheck_short_circuits() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let value = dispatcher
            .fetch_once(1, || Some(5), gated_fetch(&calls, &gate, Ok(1)), no_commit)
            .await;

        assert_eq!(value, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_disturb_others() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        // The first caller starts the call, then goes away
        let fetch = gated_fetch(&calls, &gate, Ok(11));
        let mut driver = task::spawn(dispatcher.fetch_once(1, || None, fetch, no_commit));
        assert_pending!(driver.poll());
        let unused = gated_fetch(&calls, &gate, Ok(0));
        let mut other = task::spawn(dispatcher.fetch_once(1, || None, unused, no_commit));
        assert_pending!(other.poll());
        drop(driver);

        assert_eq!(dispatcher.in_flight(), 1);
        gate.notify_one();

        assert_eq!(other.await, Ok(11));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_interest_complete_still_commits() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let committed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&committed);

        let mut caller = task::spawn(dispatcher.fetch_once(
            1,
            || None,
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(99)
            },
            move |outcome: &Result<u32>| *sink.lock() = Some(outcome.clone()),
        ));
        assert_pending!(caller.poll());
        drop(caller);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*committed.lock(), Some(Ok(99)));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_interest_cancel_aborts_call() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Cancel);
        let committed = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&committed);

        let mut caller = task::spawn(dispatcher.fetch_once(
            1,
            || None,
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(99)
            },
            move |_: &Result<u32>| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
        ));
        assert_pending!(caller.poll());
        drop(caller);

        assert_eq!(dispatcher.in_flight(), 0);
        assert!(!dispatcher.is_in_flight(&1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(committed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_source_resolves_as_abandoned() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);

        let result = dispatcher
            .fetch_once(
                1,
                || None,
                async {
                    if true {
                        panic!("source exploded");
                    }
                    Ok(0)
                },
                no_commit,
            )
            .await;

        assert!(matches!(result, Err(CacheError::Abandoned(_))));
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(!dispatcher.is_in_flight(&1));
    }

    #[tokio::test]
    async fn test_forget_detaches_in_flight_request() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let commits = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&commits);
        let mut old = task::spawn(dispatcher.fetch_once(
            1,
            || None,
            gated_fetch(&calls, &gate, Ok(1)),
            move |_: &Result<u32>| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
        ));
        assert_pending!(old.poll());

        assert!(dispatcher.forget(&1));
        assert!(!dispatcher.is_in_flight(&1));

        // A new caller starts its own call
        let value = dispatcher
            .fetch_once(1, || None, async { Ok(2) }, no_commit)
            .await;
        assert_eq!(value, Ok(2));

        gate.notify_one();
        assert_eq!(old.await, Ok(1));
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_commit_releases_key() {
        let dispatcher: Dispatcher<u8, u32> = Dispatcher::new(AbandonPolicy::Complete);

        let first = dispatcher
            .fetch_once(1, || None, async { Ok(1) }, |_: &Result<u32>| {
                panic!("commit exploded")
            })
            .await;
        assert!(matches!(first, Err(CacheError::Abandoned(_))));
        assert!(!dispatcher.is_in_flight(&1));
        assert_eq!(dispatcher.in_flight(), 0);

        // Later callers start a fresh call instead of joining a dead one
        let second = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.fetch_once(1, || None, async { Ok(2) }, no_commit),
        )
        .await;
        assert_eq!(second, Ok(Ok(2)));
        assert_eq!(dispatcher.coalesced(), 0);
    }
}
