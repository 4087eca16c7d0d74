// File-descriptor admission control
// A counting semaphore that bounds how many connections the server holds
// open at once. Waiters park on a wakeup signal and re-check; fairness is
// not guaranteed. Releasing a permit out of saturation wakes exactly one
// waiter, which is sufficient because any waiter that loses the race
// simply re-parks on the next wake.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ServerError;

/// Counting semaphore bounding concurrent connection admission. Cloning
/// yields another handle to the same limiter.
///
/// Invariant: `0 <= count <= limit` at every observable moment.
#[derive(Clone)]
pub struct FdLimiter {
    shared: Arc<Shared>,
}

struct Shared {
    limit: usize,
    state: Mutex<State>,
    wakeup: Notify,
}

struct State {
    count: usize,
    notify_tx: Option<UnboundedSender<usize>>,
}

/// An admission permit. Dropping it releases the slot and, when the
/// counter leaves saturation, wakes one parked waiter.
pub struct Permit {
    limiter: FdLimiter,
}

impl FdLimiter {
    /// Panics if `limit` is zero; a server that can admit nothing is a
    /// configuration bug, not a runtime condition.
    pub fn new(limit: usize) -> FdLimiter {
        assert!(limit > 0, "fd limiter: limit must be positive");
        FdLimiter {
            shared: Arc::new(Shared {
                limit,
                state: Mutex::new(State {
                    count: 0,
                    notify_tx: None,
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Registers (or with `None`, removes) a channel that receives the
    /// current count on every change.
    pub fn set_notify_channel(&self, tx: Option<UnboundedSender<usize>>) {
        self.shared.state.lock().unwrap().notify_tx = tx;
    }

    /// Current number of held permits.
    pub fn count(&self) -> usize {
        self.shared.state.lock().unwrap().count
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.shared.state.lock().unwrap();
        if state.count < self.shared.limit {
            state.count += 1;
            publish(&state);
            Some(Permit {
                limiter: self.clone(),
            })
        } else {
            None
        }
    }

    /// Blocks until a permit is available.
    pub async fn acquire(&self) -> Permit {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            self.shared.wakeup.notified().await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up once `budget` wall
    /// time has elapsed across however many wakeup retries it takes.
    pub async fn acquire_timeout(&self, budget: Duration) -> Result<Permit, ServerError> {
        let deadline = Instant::now() + budget;
        loop {
            if let Some(permit) = self.try_acquire() {
                return Ok(permit);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ServerError::Timeout);
            }
            let _ = tokio::time::timeout(deadline - now, self.shared.wakeup.notified()).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but returns early if the cancel
    /// channel yields first. `Err(Some(v))` carries the received value;
    /// `Err(None)` means the cancel channel closed.
    pub async fn acquire_or_cancel<T>(
        &self,
        cancel: &mut Receiver<T>,
    ) -> Result<Permit, Option<T>> {
        loop {
            if let Some(permit) = self.try_acquire() {
                return Ok(permit);
            }
            tokio::select! {
                msg = cancel.recv() => return Err(msg),
                _ = self.shared.wakeup.notified() => {}
            }
        }
    }

    fn release(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.count == 0 {
            panic!("fd limiter: release without a held permit");
        }
        state.count -= 1;
        publish(&state);
        if state.count == self.shared.limit - 1 {
            self.shared.wakeup.notify_one();
        }
    }
}

fn publish(state: &State) {
    if let Some(tx) = &state.notify_tx {
        let _ = tx.send(state.count);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl std::fmt::Debug for FdLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdLimiter")
            .field("limit", &self.shared.limit)
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_count_tracks_permits() {
        let fdl = FdLimiter::new(2);
        assert_eq!(fdl.limit(), 2);
        assert_eq!(fdl.count(), 0);
        let a = fdl.acquire().await;
        let b = fdl.acquire().await;
        assert_eq!(fdl.count(), 2);
        drop(a);
        assert_eq!(fdl.count(), 1);
        drop(b);
        assert_eq!(fdl.count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_limit() {
        let fdl = FdLimiter::new(1);
        let held = fdl.acquire().await;
        let waiter = {
            let fdl = fdl.clone();
            tokio::spawn(async move {
                let _permit = fdl.acquire().await;
            })
        };
        // The waiter cannot finish while the permit is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken by the release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_timeout_expires() {
        let fdl = FdLimiter::new(1);
        let _held = fdl.acquire().await;
        let start = std::time::Instant::now();
        let res = fdl.acquire_timeout(Duration::from_millis(100)).await;
        assert!(matches!(res, Err(ServerError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(fdl.count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_succeeds_when_freed() {
        let fdl = FdLimiter::new(1);
        let held = fdl.acquire().await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        });
        let permit = fdl.acquire_timeout(Duration::from_secs(2)).await;
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_or_cancel() {
        let fdl = FdLimiter::new(1);
        let _held = fdl.acquire().await;
        let (tx, mut rx) = mpsc::channel(1);
        tx.send("stop").await.unwrap();
        let res = fdl.acquire_or_cancel(&mut rx).await;
        match res {
            Err(Some(v)) => assert_eq!(v, "stop"),
            other => panic!("expected cancellation, got ok={}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_notify_channel_sees_every_change() {
        let fdl = FdLimiter::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        fdl.set_notify_channel(Some(tx));
        let a = fdl.acquire().await;
        let b = fdl.acquire().await;
        drop(a);
        drop(b);
        let mut seen = Vec::new();
        while let Ok(v) = rx.try_recv() {
            seen.push(v);
        }
        assert_eq!(seen, vec![1, 2, 1, 0]);
    }

    #[test]
    #[should_panic(expected = "limit must be positive")]
    fn test_zero_limit_panics() {
        let _ = FdLimiter::new(0);
    }
}
