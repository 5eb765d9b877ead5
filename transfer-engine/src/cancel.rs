//! Cancellation and deadlines
//!
//! A token is checked before new work starts (a lock request, a commit, a
//! retry attempt). It never interrupts a store call already in flight: a
//! transaction that has started locking always ends in commit or rollback.

use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancel flag shared by a token and all of its children.
///
/// `cancel` drops the sender, which disconnects `closed` and wakes every
/// sleeper blocked on it.
#[derive(Debug)]
struct Signal {
    cancelled: AtomicBool,
    notify: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

/// Cloneable cancellation token with an optional deadline
#[derive(Debug, Clone)]
pub struct CancellationToken {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Token that only expires when cancelled
    pub fn new() -> Self {
        let (notify, closed) = channel::bounded(0);
        Self {
            signal: Arc::new(Signal {
                cancelled: AtomicBool::new(false),
                notify: Mutex::new(Some(notify)),
                closed,
            }),
            deadline: None,
        }
    }

    /// Token that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().narrowed(timeout)
    }

    /// Child token sharing the cancel flag, expiring no later than `timeout`
    /// from now
    pub fn narrowed(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(candidate)) => Some(current.min(candidate)),
            (current, candidate) => current.or(candidate),
        };
        Self {
            signal: Arc::clone(&self.signal),
            deadline,
        }
    }

    /// Cancel this token and every token sharing its flag
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify.lock().take();
    }

    /// Cancelled, or past the deadline
    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sleep for `duration`, cut short by cancellation or the deadline.
    ///
    /// Returns `true` only if the full duration elapsed and the token is
    /// still live.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let wait = match self.remaining() {
            Some(remaining) => duration.min(remaining),
            None => duration,
        };
        select! {
            recv(self.signal.closed) -> _ => false,
            recv(channel::after(wait)) -> _ => !self.is_cancelled(),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_without_deadline() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.remaining().is_none());
        assert!(token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.narrowed(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(!child.sleep(Duration::from_millis(50)));
    }

    #[test]
    fn test_narrowing_keeps_earliest_deadline() {
        let parent = CancellationToken::with_timeout(Duration::from_millis(10));
        let child = parent.narrowed(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_cancel_wakes_blocked_sleeper() {
        let token = CancellationToken::new();
        let sleeper = token.narrowed(Duration::from_secs(60));
        let started = Instant::now();
        let handle = std::thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(!handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_deadline_cuts_sleep_short() {
        let token = CancellationToken::with_timeout(Duration::from_millis(20));
        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_cancelled());
    }
}
