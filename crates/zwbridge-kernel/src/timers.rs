//! [`TimerSet`] – keyed single-slot delayed actions.
//!
//! Every key owns at most one pending timer.  [`TimerSet::arm`] cancels
//! whatever was pending under the key before starting the new one, so only
//! the most recently armed action for a key can ever fire.
//!
//! Timers run as Tokio tasks.  When the delay elapses the task calls its
//! `fire` closure with the [`TimerToken`] it was armed with.  If the set is
//! shared behind a lock, the closure should take that lock and call
//! [`TimerSet::claim`] before acting: a cancel or re-arm that got the lock
//! first removes the token, and `claim` then returns `false`.  Once a timer
//! has claimed its slot it is no longer pending and runs to completion.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Identity of one arming of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

struct PendingTimer {
    token: TimerToken,
    handle: JoinHandle<()>,
}

/// A set of keyed, single-shot timers.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use zwbridge_kernel::timers::TimerSet;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut timers = TimerSet::new();
/// timers.arm("pir.hall", Duration::from_secs(60), |_token| async {});
/// assert!(timers.is_armed(&"pir.hall"));
///
/// assert!(timers.cancel(&"pir.hall"));
/// assert!(!timers.is_armed(&"pir.hall"));
/// # }
/// ```
pub struct TimerSet<K> {
    next_token: u64,
    pending: HashMap<K, PendingTimer>,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            next_token: 0,
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> TimerSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to run `fire` after `delay`, cancelling any timer already
    /// pending under `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&mut self, key: K, delay: Duration, fire: F) -> TimerToken
    where
        F: FnOnce(TimerToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(&key);

        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(token).await;
        });
        self.pending.insert(key, PendingTimer { token, handle });
        token
    }

    /// Cancel the timer pending under `key`.  Returns `false` (and does
    /// nothing) when there was none.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Take ownership of the slot for a firing timer.
    ///
    /// Returns `true` and removes the entry when `token` is still the
    /// pending arming for `key`; returns `false` when it was cancelled or
    /// superseded in the meantime.
    pub fn claim(&mut self, key: &K, token: TimerToken) -> bool {
        match self.pending.get(key) {
            Some(timer) if timer.token == token => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel everything.  Returns how many timers were pending.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
        count
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Fired = Arc<Mutex<Vec<&'static str>>>;

    /// Arm `key` on a shared set with a fire closure that claims first, the
    /// way callers sharing a set behind a lock are expected to.
    fn arm_claiming(
        timers: &Arc<Mutex<TimerSet<&'static str>>>,
        fired: &Fired,
        key: &'static str,
        delay: Duration,
        label: &'static str,
    ) {
        let shared = Arc::clone(timers);
        let fired = Arc::clone(fired);
        timers.lock().unwrap().arm(key, delay, move |token| async move {
            if shared.lock().unwrap().claim(&key, token) {
                fired.lock().unwrap().push(label);
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_delay() {
        let timers = Arc::new(Mutex::new(TimerSet::new()));
        let fired: Fired = Arc::default();
        arm_claiming(&timers, &fired, "pir.hall", Duration::from_secs(60), "off");

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["off"]);
        assert!(timers.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_previous_timer() {
        let timers = Arc::new(Mutex::new(TimerSet::new()));
        let fired: Fired = Arc::default();
        arm_claiming(&timers, &fired, "pir.hall", Duration::from_secs(60), "first");

        tokio::time::sleep(Duration::from_secs(30)).await;
        arm_claiming(&timers, &fired, "pir.hall", Duration::from_secs(60), "second");

        // The first deadline passes without firing.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = Arc::new(Mutex::new(TimerSet::new()));
        let fired: Fired = Arc::default();
        arm_claiming(&timers, &fired, "lock.front", Duration::from_secs(5), "repeat");

        assert!(timers.lock().unwrap().cancel(&"lock.front"));
        assert!(!timers.lock().unwrap().cancel(&"lock.front"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let timers = Arc::new(Mutex::new(TimerSet::new()));
        let fired: Fired = Arc::default();
        arm_claiming(&timers, &fired, "a", Duration::from_secs(1), "a");
        arm_claiming(&timers, &fired, "b", Duration::from_secs(2), "b");
        assert_eq!(timers.lock().unwrap().len(), 2);

        timers.lock().unwrap().cancel(&"a");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn stale_token_cannot_claim() {
        let mut timers = TimerSet::new();
        let old = timers.arm("k", Duration::from_secs(60), |_| async {});
        let new = timers.arm("k", Duration::from_secs(60), |_| async {});
        assert!(!timers.claim(&"k", old));
        assert!(timers.is_armed(&"k"));
        assert!(timers.claim(&"k", new));
        assert!(!timers.is_armed(&"k"));
    }

    #[tokio::test]
    async fn cancel_all_empties_the_set() {
        let mut timers = TimerSet::new();
        timers.arm(1u32, Duration::from_secs(5), |_| async {});
        timers.arm(2u32, Duration::from_secs(5), |_| async {});
        assert_eq!(timers.cancel_all(), 2);
        assert!(timers.is_empty());
    }
}
