//! Keyed duplicate-work suppression.
//!
//! At most one computation runs per key at a time. Callers arriving while a
//! key is in flight block until it finishes and receive a clone of the same
//! result. Different keys never contend beyond a short map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub struct SingleFlight<V> {
    in_flight: Mutex<HashMap<String, Arc<Call<V>>>>,
}

struct Call<V> {
    state: Mutex<CallState<V>>,
    ready: Condvar,
}

enum CallState<V> {
    Pending,
    Done(V),
    /// The leader unwound before producing a value; waiters retry.
    Abandoned,
}

/// Whether the caller ran the computation itself or reused another's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flight {
    Leader,
    Shared,
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `compute` for `key` unless another caller already is, in which
    /// case waits for that caller's result instead.
    pub fn run<F>(&self, key: &str, compute: F) -> (V, Flight)
    where
        F: FnOnce() -> V,
    {
        let mut compute = Some(compute);
        loop {
            let (call, is_leader) = self.join(key);
            if !is_leader {
                match call.wait() {
                    Some(value) => return (value, Flight::Shared),
                    None => continue,
                }
            }

            let guard = LeaderGuard {
                flight: self,
                key,
                call: &call,
            };
            // A leader is only elected once per `run`, the retry path above
            // never reaches here with `compute` already taken.
            let value = match compute.take() {
                Some(f) => f(),
                None => unreachable!("single-flight leader elected twice"),
            };
            guard.complete(value.clone());
            return (value, Flight::Leader);
        }
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn join(&self, key: &str) -> (Arc<Call<V>>, bool) {
        let mut map = lock(&self.in_flight);
        if let Some(call) = map.get(key) {
            return (call.clone(), false);
        }
        let call = Arc::new(Call {
            state: Mutex::new(CallState::Pending),
            ready: Condvar::new(),
        });
        map.insert(key.to_string(), call.clone());
        (call, true)
    }

    fn finish(&self, key: &str, call: &Call<V>, outcome: CallState<V>) {
        *lock(&call.state) = outcome;
        call.ready.notify_all();
        lock(&self.in_flight).remove(key);
    }
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Call<V> {
    /// Blocks until the leader finishes. `None` if the leader abandoned.
    fn wait(&self) -> Option<V> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                CallState::Pending => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                CallState::Done(value) => return Some(value.clone()),
                CallState::Abandoned => return None,
            }
        }
    }
}

/// Marks the call abandoned if the leader's computation panics.
struct LeaderGuard<'a, V: Clone> {
    flight: &'a SingleFlight<V>,
    key: &'a str,
    call: &'a Call<V>,
}

impl<V: Clone> LeaderGuard<'_, V> {
    fn complete(self, value: V) {
        self.flight.finish(self.key, self.call, CallState::Done(value));
        std::mem::forget(self);
    }
}

impl<V: Clone> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        self.flight.finish(self.key, self.call, CallState::Abandoned);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_single_caller_is_leader() {
        let flight = SingleFlight::new();
        let (value, role) = flight.run("k", || 7);
        assert_eq!(value, 7);
        assert_eq!(role, Flight::Leader);
        assert_eq!(flight.in_flight(), 0);
    }

    #[test]
    fn test_sequential_calls_each_compute() {
        let flight = SingleFlight::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            flight.run("k", || calls.fetch_add(1, Ordering::SeqCst));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_same_key_computes_once() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = flight.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    flight.run("same", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        42
                    })
                })
            })
            .collect();

        let results: Vec<(i32, Flight)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|(v, _)| *v == 42));
        assert_eq!(
            results.iter().filter(|(_, r)| *r == Flight::Leader).count(),
            calls.load(Ordering::SeqCst)
        );
        // All eight threads pass the barrier well inside the 100ms window.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_keys_run_in_parallel() {
        let flight = Arc::new(SingleFlight::new());
        let barrier = Arc::new(Barrier::new(2));

        // Each computation waits for the other: only completes if both keys
        // are in flight at the same time.
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|key| {
                let flight = flight.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    flight.run(key, || {
                        barrier.wait();
                        key.len()
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), (1, Flight::Leader));
        }
    }

    #[test]
    fn test_panicking_leader_lets_waiter_retry() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flight = flight.clone();
            let started = started.clone();
            std::thread::spawn(move || {
                flight.run("k", || {
                    started.wait();
                    std::thread::sleep(Duration::from_millis(50));
                    panic!("leader failed");
                })
            })
        };

        started.wait();
        let (value, _) = flight.run("k", || 5);
        assert_eq!(value, 5);
        assert!(leader.join().is_err());
        assert_eq!(flight.in_flight(), 0);
    }
}
