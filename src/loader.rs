//! Single-flight load coordination with shared result delivery.
//!
//! Prevents a thundering herd when many threads request the same missing
//! key simultaneously: one loader execution per fingerprint, every waiter
//! receives the identical outcome. Both a synchronous and a channel-based
//! asynchronous surface are provided.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        LoaderGroup<V>                              │
//! │                                                                    │
//! │   inflight: Mutex<FxHashMap<u64, Arc<Inflight<V>>>>                │
//! │                                                                    │
//! │   thread A (leader)        thread B, C (waiters)                   │
//! │        │                         │                                 │
//! │        │ claim slot for fp       │ find existing slot              │
//! │        ▼                         ▼                                 │
//! │   run loader (no locks)     register one-shot channel              │
//! │        │                         │                                 │
//! │        ▼                         ▼                                 │
//! │   publish outcome ─────────► select { result, cancel-token }       │
//! │   (slot removed, Done       B: identical value, shared=true        │
//! │    cached for stragglers)   C: token tripped → Cancelled           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cancellation
//!
//! A [`CancelToken`] governs *waiting*, never execution: a cancelled waiter
//! returns [`CacheError::Cancelled`] while the in-flight load runs to
//! completion for the remaining waiters. A leader whose token trips
//! mid-load still publishes the result, then reports cancellation to its
//! own caller. Loaders receive the token and should honor it themselves.
//!
//! ## Loader contract
//!
//! The loader may be invoked concurrently for different fingerprints and
//! must not re-enter the cache it serves for the same key (deadlock). A
//! loader error is delivered to every waiter of that execution and is
//! never cached. A loader panic unblocks all waiters with a loader error
//! before resuming the unwind on the leader.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{BoxError, CacheError};

// ---------------------------------------------------------------------------
// Cancellation token
// ---------------------------------------------------------------------------

/// Observer half of a cancellation signal.
///
/// Cheap to clone; every clone observes the same signal. The token trips
/// when its [`Canceller`] is cancelled or dropped. [`CancelToken::none`]
/// never trips.
///
/// # Example
///
/// ```
/// use genarena::loader::CancelToken;
///
/// let (canceller, token) = CancelToken::pair();
/// assert!(!token.is_cancelled());
/// canceller.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    done: Receiver<()>,
}

impl CancelToken {
    /// A token that never cancels.
    pub fn none() -> Self {
        Self { done: never() }
    }

    /// Creates a connected `(Canceller, CancelToken)` pair.
    pub fn pair() -> (Canceller, CancelToken) {
        let (tx, rx) = bounded(0);
        (Canceller { _tx: tx }, CancelToken { done: rx })
    }

    /// Returns `true` once the paired canceller has cancelled or been
    /// dropped.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Channel that becomes ready on cancellation; used in `select!` arms.
    #[inline]
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }
}

/// Trigger half of a cancellation signal. Cancelling consumes the handle;
/// dropping it has the same effect.
#[derive(Debug)]
pub struct Canceller {
    _tx: Sender<()>,
}

impl Canceller {
    /// Trips every token cloned from the paired [`CancelToken`].
    pub fn cancel(self) {}
}

// ---------------------------------------------------------------------------
// Load results
// ---------------------------------------------------------------------------

/// Outcome of an asynchronous load delivered over a one-shot channel.
///
/// `shared == true` means this caller did not execute the loader itself
/// and received a result produced by a concurrent peer.
#[derive(Debug, Clone)]
pub struct LoadResult<V> {
    pub value: Result<V, CacheError>,
    pub shared: bool,
}

type Outcome<V> = Result<V, CacheError>;

#[derive(Debug)]
enum InflightState<V> {
    /// Execution running; registered waiters get the outcome pushed.
    Pending(Vec<Sender<Outcome<V>>>),
    /// Execution finished; stragglers read the cached outcome.
    Done(Outcome<V>),
}

#[derive(Debug)]
struct Inflight<V> {
    state: Mutex<InflightState<V>>,
}

enum Role<V> {
    Leader(Arc<Inflight<V>>),
    Waiter(Arc<Inflight<V>>),
}

// ---------------------------------------------------------------------------
// LoaderGroup
// ---------------------------------------------------------------------------

/// Fingerprint-keyed single-flight registry (one per shard, so fingerprints
/// from different shard seeds never collide).
#[derive(Debug)]
pub struct LoaderGroup<V> {
    inflight: Mutex<FxHashMap<u64, Arc<Inflight<V>>>>,
}

impl<V> Default for LoaderGroup<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LoaderGroup<V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of executions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<V: Clone> LoaderGroup<V> {
    /// Executes `loader` at most once per concurrent burst for
    /// `fingerprint`.
    ///
    /// The first caller becomes the leader and runs `loader` with no
    /// internal locks held; concurrent callers block until the leader
    /// publishes and receive the identical outcome with `shared == true`.
    /// A waiter whose `token` trips returns
    /// [`CacheError::Cancelled`](crate::error::CacheError::Cancelled)
    /// without disturbing the execution.
    pub fn load<K, F>(
        &self,
        token: &CancelToken,
        fingerprint: u64,
        key: &K,
        loader: F,
    ) -> (Outcome<V>, bool)
    where
        F: FnOnce(&CancelToken, &K) -> Result<V, BoxError>,
    {
        match self.claim(fingerprint) {
            Role::Leader(slot) => {
                let run = catch_unwind(AssertUnwindSafe(|| loader(token, key)));
                let outcome = match run {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(CacheError::loader(err)),
                    Err(payload) => {
                        self.publish(
                            fingerprint,
                            &slot,
                            Err(CacheError::loader("loader panicked".into())),
                        );
                        resume_unwind(payload);
                    },
                };
                self.publish(fingerprint, &slot, outcome.clone());
                if token.is_cancelled() {
                    (Err(CacheError::Cancelled), false)
                } else {
                    (outcome, false)
                }
            },
            Role::Waiter(slot) => (self.wait(&slot, token), true),
        }
    }

    /// Asynchronous variant: returns a one-shot channel delivering a
    /// [`LoadResult`].
    ///
    /// The execution is shared with synchronous callers of the same
    /// fingerprint. If `token` trips before the load finishes, the channel
    /// delivers `Cancelled`; the underlying execution is not aborted,
    /// since other waiters may still need it.
    pub fn load_async<K, F>(
        self: &Arc<Self>,
        token: CancelToken,
        fingerprint: u64,
        key: K,
        loader: F,
    ) -> Receiver<LoadResult<V>>
    where
        K: Send + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(&CancelToken, &K) -> Result<V, BoxError> + Send + 'static,
    {
        let (out_tx, out_rx) = bounded(1);
        let (exec_tx, exec_rx) = bounded::<LoadResult<V>>(1);

        // Execution proceeds under a non-cancellable token; the caller's
        // token only governs delivery below.
        let group = Arc::clone(self);
        thread::spawn(move || {
            let exec_token = CancelToken::none();
            let (value, shared) = group.load(&exec_token, fingerprint, &key, loader);
            let _ = exec_tx.send(LoadResult { value, shared });
        });

        thread::spawn(move || {
            select! {
                recv(exec_rx) -> res => {
                    if let Ok(res) = res {
                        let _ = out_tx.send(res);
                    }
                },
                recv(token.done()) -> _ => {
                    let _ = out_tx.send(LoadResult {
                        value: Err(CacheError::Cancelled),
                        shared: false,
                    });
                },
            }
        });

        out_rx
    }

    fn claim(&self, fingerprint: u64) -> Role<V> {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(&fingerprint) {
            return Role::Waiter(Arc::clone(existing));
        }
        let slot = Arc::new(Inflight {
            state: Mutex::new(InflightState::Pending(Vec::new())),
        });
        inflight.insert(fingerprint, Arc::clone(&slot));
        Role::Leader(slot)
    }

    /// Removes the slot from the registry, caches the outcome for
    /// stragglers already holding the slot, and pushes it to registered
    /// waiters.
    fn publish(&self, fingerprint: u64, slot: &Arc<Inflight<V>>, outcome: Outcome<V>) {
        self.inflight.lock().remove(&fingerprint);
        let waiters = {
            let mut state = slot.state.lock();
            match std::mem::replace(&mut *state, InflightState::Done(outcome.clone())) {
                InflightState::Pending(waiters) => waiters,
                InflightState::Done(_) => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn wait(&self, slot: &Arc<Inflight<V>>, token: &CancelToken) -> Outcome<V> {
        let rx = {
            let mut state = slot.state.lock();
            match &mut *state {
                InflightState::Done(outcome) => return outcome.clone(),
                InflightState::Pending(waiters) => {
                    let (tx, rx) = bounded(1);
                    waiters.push(tx);
                    rx
                },
            }
        };
        select! {
            recv(rx) -> outcome => match outcome {
                Ok(outcome) => outcome,
                // Leader vanished without publishing; surface as a load
                // failure rather than hanging.
                Err(_) => Err(CacheError::loader("load abandoned".into())),
            },
            recv(token.done()) -> _ => Err(CacheError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
