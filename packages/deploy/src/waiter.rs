// ABOUTME: Cancellable fixed-interval polling primitive with a hard deadline
// ABOUTME: Drives cluster task completion and container readiness waits

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const TASK_DEADLINE: Duration = Duration::from_secs(300);
pub const READINESS_DEADLINE: Duration = Duration::from_secs(180);

/// Result of a single predicate evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
    /// Terminal failure; the waiter stops immediately
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome<T> {
    pub value: T,
    pub polls: u32,
    pub elapsed: Duration,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("Deadline of {}s reached after {polls} polls", .deadline.as_secs())]
    TimedOut { polls: u32, deadline: Duration },

    #[error("Terminal failure after {polls} polls: {reason}")]
    Failed { polls: u32, reason: String },

    #[error("Wait cancelled after {polls} polls")]
    Cancelled { polls: u32 },
}

/// Polls a predicate every `interval` until it is ready, fails, or `deadline` elapses.
///
/// Polls start on a fixed grid of `interval` ticks measured from the start of the
/// wait, so a slow predicate does not push later polls off the grid. A deadline of
/// N intervals allows exactly N polls. No poll starts after the deadline, and a poll
/// still in flight when the deadline passes is abandoned.
#[derive(Debug, Clone)]
pub struct Waiter {
    interval: Duration,
    deadline: Duration,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn timed_out(&self, polls: u32) -> WaitError {
        WaitError::TimedOut {
            polls,
            deadline: self.deadline,
        }
    }

    pub async fn wait<T, F, Fut>(&self, mut poll: F) -> Result<WaitOutcome<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollStatus<T>>,
    {
        let start = Instant::now();
        let deadline = start + self.deadline;
        let expired = time::sleep_until(deadline);
        tokio::pin!(expired);

        let mut ticks = time::interval_at(start + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut polls = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WaitError::Cancelled { polls }),
                _ = ticks.tick() => {}
                _ = &mut expired => return Err(self.timed_out(polls)),
            }
            if Instant::now() > deadline {
                return Err(self.timed_out(polls));
            }

            polls += 1;
            let status = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WaitError::Cancelled { polls }),
                status = poll() => status,
                _ = &mut expired => {
                    debug!("Poll {} still running at the deadline", polls);
                    return Err(self.timed_out(polls));
                }
            };

            match status {
                PollStatus::Ready(value) => {
                    return Ok(WaitOutcome {
                        value,
                        polls,
                        elapsed: start.elapsed(),
                    })
                }
                PollStatus::Failed(reason) => return Err(WaitError::Failed { polls, reason }),
                PollStatus::Pending => {
                    if Instant::now() >= deadline {
                        return Err(self.timed_out(polls));
                    }
                    debug!("Poll {} pending", polls);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_polls_exactly_deadline_times() {
        let counter = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new(Duration::from_secs(1), Duration::from_secs(3));

        let c = counter.clone();
        let result: Result<WaitOutcome<()>, _> = waiter
            .wait(|| {
                c.fetch_add(1, Ordering::SeqCst);
                async { PollStatus::Pending }
            })
            .await;

        assert_eq!(
            result,
            Err(WaitError::TimedOut {
                polls: 3,
                deadline: Duration::from_secs(3)
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_second_poll() {
        let counter = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new(Duration::from_secs(1), Duration::from_secs(3));

        let c = counter.clone();
        let outcome = waiter
            .wait(|| {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 2 {
                        PollStatus::Ready(n)
                    } else {
                        PollStatus::Pending
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, 2);
        assert_eq!(outcome.polls, 2);
        assert_eq!(outcome.elapsed, Duration::from_secs(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_predicate_stays_on_grid_and_stops_at_deadline() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let waiter = Waiter::new(Duration::from_secs(1), Duration::from_secs(3));
        let begin = Instant::now();

        let recorded = starts.clone();
        let result: Result<WaitOutcome<()>, _> = waiter
            .wait(|| {
                recorded.lock().unwrap().push(begin.elapsed());
                async {
                    time::sleep(Duration::from_millis(400)).await;
                    PollStatus::Pending
                }
            })
            .await;

        assert_eq!(
            *starts.lock().unwrap(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(
            result,
            Err(WaitError::TimedOut {
                polls: 3,
                deadline: Duration::from_secs(3)
            })
        );
        assert_eq!(begin.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_predicate_is_abandoned_at_deadline() {
        let waiter = Waiter::new(Duration::from_secs(1), Duration::from_secs(3));
        let begin = Instant::now();

        let result = waiter
            .wait(|| async {
                time::sleep(Duration::from_secs(30)).await;
                PollStatus::Ready(())
            })
            .await;

        assert_eq!(
            result,
            Err(WaitError::TimedOut {
                polls: 1,
                deadline: Duration::from_secs(3)
            })
        );
        assert_eq!(begin.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_immediately() {
        let waiter = Waiter::new(POLL_INTERVAL, TASK_DEADLINE);
        let start = Instant::now();

        let result: Result<WaitOutcome<()>, _> = waiter
            .wait(|| async { PollStatus::Failed("exit status: command failed".to_string()) })
            .await;

        assert!(matches!(result, Err(WaitError::Failed { polls: 1, .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let waiter = Waiter::new(POLL_INTERVAL, READINESS_DEADLINE).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            time::sleep(Duration::from_millis(2500)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result: Result<WaitOutcome<()>, _> =
            waiter.wait(|| async { PollStatus::Pending }).await;
        canceller.await.unwrap();

        assert_eq!(result, Err(WaitError::Cancelled { polls: 2 }));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }
}
