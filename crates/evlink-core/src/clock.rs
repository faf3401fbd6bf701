//! Injectable clock for deterministic scheduling
//!
//! Every timeout and periodic tick in the stack is measured against a
//! [`Clock`] handle instead of `tokio::time` directly. Production wires in
//! [`SystemClock`]; tests wire in [`TestClock`] and advance virtual time
//! explicitly, so lifecycle tests never sleep in real time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Monotonic clock with suspendable sleeps
///
/// One-shot timers are a single `sleep`; periodic timers are a loop around
/// `sleep`. Cancellation is dropping the future, so callers can race a
/// sleep against other work with `tokio::select!` without leaking timers.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created
    fn now(&self) -> Duration;

    /// Suspend until `duration` has elapsed on this clock
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `tokio::time`
pub struct SystemClock {
    started: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock that only moves when told to
///
/// Due sleepers fire in (deadline, then creation order) order during
/// [`TestClock::advance`], which yields to the scheduler after each firing
/// so a woken task can run and register a follow-up sleep that may still
/// fall inside the same advance window. Intended for current-thread test
/// runtimes.
pub struct TestClock {
    inner: Mutex<TestClockInner>,
}

struct TestClockInner {
    now: Duration,
    next_seq: u64,
    sleepers: BinaryHeap<Reverse<Sleeper>>,
}

struct Sleeper {
    deadline: Duration,
    seq: u64,
    wake: oneshot::Sender<()>,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Sleeper {}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TestClockInner {
                now: Duration::ZERO,
                next_seq: 0,
                sleepers: BinaryHeap::new(),
            }),
        }
    }

    /// Number of sleeps currently pending
    pub fn pending(&self) -> usize {
        self.inner.lock().sleepers.len()
    }

    /// Move virtual time forward, firing every sleeper that becomes due
    ///
    /// Yields after each firing (and once at the end) so woken tasks get a
    /// chance to run to their next await point before the caller resumes.
    pub async fn advance(&self, duration: Duration) {
        let target = self.inner.lock().now + duration;

        loop {
            let fired = {
                let mut inner = self.inner.lock();
                let due =
                    matches!(inner.sleepers.peek(), Some(Reverse(next)) if next.deadline <= target);
                if due {
                    if let Some(Reverse(sleeper)) = inner.sleepers.pop() {
                        inner.now = inner.now.max(sleeper.deadline);
                        // Receiver may have been dropped (cancelled sleep)
                        let _ = sleeper.wake.send(());
                    }
                    true
                } else {
                    inner.now = target;
                    false
                }
            };

            // Let the woken task (or anything else queued) run
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }

            if !fired {
                break;
            }
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }

        let rx = {
            let mut inner = self.inner.lock();
            let (tx, rx) = oneshot::channel();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let deadline = inner.now + duration;
            inner.sleepers.push(Reverse(Sleeper {
                deadline,
                seq,
                wake: tx,
            }));
            rx
        };

        // Sender dropped means the clock itself went away; treat as fired
        let _ = rx.await;
    }
}
