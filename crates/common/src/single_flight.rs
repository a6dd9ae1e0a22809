//! Per-key single-flight coordination.
//!
//! A [`SingleFlight`] couples a piece of shared state with a set of keys
//! that currently have a producer running. All of it sits behind one mutex
//! and one condition variable: a caller that finds its key busy waits on the
//! condvar instead of starting a duplicate producer, and the producer itself
//! runs with the lock released.
//!
//! The attribute cache (busy paths), the blob store (hashes being faulted
//! into memory) and the fetch client (hashes being pulled from a peer) all
//! use this one primitive.

use std::collections::HashSet;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex, MutexGuard};

struct Flights<K, S> {
    busy: HashSet<K>,
    state: S,
}

/// Shared state plus the set of keys with an in-flight producer.
pub struct SingleFlight<K, S> {
    inner: Mutex<Flights<K, S>>,
    cond: Condvar,
}

/// Locked view of a [`SingleFlight`]. Dereferences to the guarded state.
///
/// Waiters are woken when the guard drops if any key was released through it.
pub struct FlightGuard<'a, K, S> {
    flight: &'a SingleFlight<K, S>,
    guard: MutexGuard<'a, Flights<K, S>>,
    wake: bool,
}

impl<K, S> SingleFlight<K, S>
where
    K: Eq + Hash + Clone,
{
    pub fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(Flights {
                busy: HashSet::new(),
                state,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> FlightGuard<'_, K, S> {
        FlightGuard {
            flight: self,
            guard: self.inner.lock(),
            wake: false,
        }
    }

    /// Look up `key` in the state, running `produce` at most once across all
    /// concurrent callers when the lookup misses.
    ///
    /// `lookup` runs under the lock; returning `Some` ends the call. When it
    /// misses and nobody else is producing `key`, this caller marks the key
    /// busy, drops the lock, runs `produce`, re-locks and hands the result to
    /// `commit`. Callers that miss while the key is busy wait, then retry the
    /// lookup. The busy mark is cleared even if `produce` panics.
    pub fn run<V, R>(
        &self,
        key: K,
        mut lookup: impl FnMut(&mut S) -> Option<V>,
        produce: impl FnOnce() -> R,
        commit: impl FnOnce(&mut S, R) -> V,
    ) -> V {
        let mut guard = self.lock();
        loop {
            if let Some(found) = lookup(&mut *guard) {
                return found;
            }
            if !guard.is_busy(&key) {
                break;
            }
            guard.wait();
        }
        guard.mark_busy(key.clone());
        drop(guard);

        let mut ticket = Ticket {
            flight: self,
            key: Some(key),
        };
        let produced = produce();

        let mut guard = self.lock();
        let value = commit(&mut *guard, produced);
        if let Some(key) = ticket.key.take() {
            guard.release(&key);
        }
        value
    }
}

impl<K, S> FlightGuard<'_, K, S>
where
    K: Eq + Hash + Clone,
{
    pub fn is_busy(&self, key: &K) -> bool {
        self.guard.busy.contains(key)
    }

    /// Number of keys with a producer in flight.
    pub fn busy_count(&self) -> usize {
        self.guard.busy.len()
    }

    /// Claim `key`. Returns false if it was already claimed.
    pub fn mark_busy(&mut self, key: K) -> bool {
        self.guard.busy.insert(key)
    }

    /// Clear the busy mark on `key`; waiters wake when this guard drops.
    pub fn release(&mut self, key: &K) -> bool {
        let removed = self.guard.busy.remove(key);
        self.wake |= removed;
        removed
    }

    /// Ask for waiters to be woken on drop even if no key was released.
    pub fn notify_on_drop(&mut self) {
        self.wake = true;
    }

    /// Block until another thread releases a key, re-acquiring the lock.
    pub fn wait(&mut self) {
        self.flight.cond.wait(&mut self.guard);
    }

    /// Block while `key` is busy.
    pub fn wait_while_busy(&mut self, key: &K) {
        while self.guard.busy.contains(key) {
            self.flight.cond.wait(&mut self.guard);
        }
    }
}

impl<K, S> Deref for FlightGuard<'_, K, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard.state
    }
}

impl<K, S> DerefMut for FlightGuard<'_, K, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard.state
    }
}

impl<K, S> Drop for FlightGuard<'_, K, S> {
    fn drop(&mut self) {
        if self.wake {
            self.flight.cond.notify_all();
        }
    }
}

/// Clears a busy mark if the producer unwinds before committing.
struct Ticket<'a, K, S>
where
    K: Eq + Hash + Clone,
{
    flight: &'a SingleFlight<K, S>,
    key: Option<K>,
}

impl<K, S> Drop for Ticket<'_, K, S>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut guard = self.flight.lock();
            guard.release(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    type Flight = SingleFlight<String, HashMap<String, u32>>;

    fn fetch(flight: &Flight, key: &str, calls: &AtomicUsize) -> u32 {
        flight.run(
            key.to_string(),
            |state| state.get(key).copied(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                42
            },
            |state, v| {
                state.insert(key.to_string(), v);
                v
            },
        )
    }

    #[test]
    fn test_concurrent_callers_share_one_producer() {
        let flight = Arc::new(Flight::new(HashMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = flight.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    fetch(&flight, "k", &calls)
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.lock().busy_count(), 0);
    }

    #[test]
    fn test_distinct_keys_do_not_block_each_other() {
        let flight = Flight::new(HashMap::new());
        let calls = AtomicUsize::new(0);
        fetch(&flight, "a", &calls);
        fetch(&flight, "b", &calls);
        fetch(&flight, "a", &calls);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_producer_releases_key() {
        let flight = Arc::new(Flight::new(HashMap::new()));
        let f = flight.clone();
        let result = thread::spawn(move || {
            f.run(
                "k".to_string(),
                |state| state.get("k").copied(),
                || -> u32 { panic!("producer failed") },
                |_, v| v,
            )
        })
        .join();
        assert!(result.is_err());
        assert!(!flight.lock().is_busy(&"k".to_string()));

        let calls = AtomicUsize::new(0);
        assert_eq!(fetch(&flight, "k", &calls), 42);
    }

    #[test]
    fn test_failed_producer_lets_next_caller_retry() {
        let flight: SingleFlight<String, HashMap<String, u32>> = SingleFlight::new(HashMap::new());
        let first: Result<u32, &str> = flight.run(
            "k".to_string(),
            |state| state.get("k").copied().map(Ok),
            || Err("transient"),
            |_, r| r,
        );
        assert!(first.is_err());

        let second: Result<u32, &str> = flight.run(
            "k".to_string(),
            |state| state.get("k").copied().map(Ok),
            || Ok(7),
            |state, r| {
                if let Ok(v) = r {
                    state.insert("k".to_string(), v);
                }
                r
            },
        );
        assert_eq!(second, Ok(7));
    }
}
