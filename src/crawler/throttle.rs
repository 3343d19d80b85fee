//! Jittered sequential rate limiter
//!
//! Each worker owns one [`RateLimiter`]. Operations are queued in submission
//! order and executed one at a time by a single dispatcher task, which is
//! started lazily on the first enqueue and exits once the queue drains.
//!
//! Before each dispatch the dispatcher draws `delay` uniformly from
//! `[min_delay, max_delay]` and sleeps `max(0, delay - since_last_dispatch)`,
//! so consecutive dispatches are at least `min_delay` apart and average
//! toward the middle of the window when the queue is saturated.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::utils::error::ThrottleError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Queue {
    jobs: VecDeque<Job>,
    dispatching: bool,
    last_dispatch: Option<Instant>,
}

struct Shared {
    queue: Mutex<Queue>,
    min_delay: Duration,
    max_delay: Duration,
}

/// FIFO rate limiter with a single lazily-started dispatcher
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_delay", &self.shared.min_delay)
            .field("max_delay", &self.shared.max_delay)
            .field("pending", &self.pending())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter; a reversed window is normalized
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };

        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    dispatching: false,
                    last_dispatch: None,
                }),
                min_delay,
                max_delay,
            }),
        }
    }

    /// Limiter that dispatches back-to-back
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min_delay(&self) -> Duration {
        self.shared.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.shared.max_delay
    }

    /// Operations waiting for dispatch
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|q| q.jobs.len())
            .unwrap_or(0)
    }

    /// Enqueue `operation` and return a future settling with its output
    ///
    /// The operation is queued before this returns, so submission order is
    /// call order even if the returned futures are awaited later. Must be
    /// called from within a tokio runtime.
    pub fn throttle<F, Fut, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, ThrottleError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            async move {
                // A panicking operation drops `tx`, which the caller sees as Cancelled
                let result = tokio::spawn(operation()).await;
                if let Ok(value) = result {
                    let _ = tx.send(value);
                }
            }
            .boxed()
        });

        let start_dispatcher = match self.shared.queue.lock() {
            Ok(mut queue) => {
                queue.jobs.push_back(job);
                if queue.dispatching {
                    false
                } else {
                    queue.dispatching = true;
                    true
                }
            }
            Err(_) => false,
        };

        if start_dispatcher {
            tokio::spawn(dispatch(Arc::clone(&self.shared)));
        }

        async move { rx.await.map_err(|_| ThrottleError::Cancelled) }
    }
}

impl Shared {
    fn jittered_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_micros() as u64;
        let max = self.max_delay.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(min..=max))
    }
}

/// Dispatcher loop: runs until the queue is empty, then marks itself idle
async fn dispatch(shared: Arc<Shared>) {
    loop {
        let wait = {
            let Ok(mut queue) = shared.queue.lock() else {
                return;
            };
            if queue.jobs.is_empty() {
                queue.dispatching = false;
                return;
            }
            let delay = shared.jittered_delay();
            match queue.last_dispatch {
                Some(last) => delay.saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            }
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let job = {
            let Ok(mut queue) = shared.queue.lock() else {
                return;
            };
            let Some(job) = queue.jobs.pop_front() else {
                queue.dispatching = false;
                return;
            };
            queue.last_dispatch = Some(Instant::now());
            job
        };

        tracing::trace!(wait_ms = wait.as_millis() as u64, "Dispatching throttled operation");
        job().await;
    }
}
