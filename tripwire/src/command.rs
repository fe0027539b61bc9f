//! Command execution wrapper.
//!
//! Binds a target operation (and optional fallback) to a breaker and
//! adds per-call time budgeting, panic routing and event recording.
//! The target runs on an auxiliary task so the budget can preempt the
//! wait; aborting that task on timeout cancels the in-flight future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use twr_core::Result;

use crate::breaker::{Breaker, BreakerSummary, CutBreaker, CutBreakerConfig};

/// Timeout applied when the options do not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed error type accepted from run and fallback closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type RunFn<P, R> =
    Arc<dyn Fn(P) -> BoxFuture<'static, std::result::Result<R, BoxError>> + Send + Sync>;
type FallbackFn<P, R> =
    Arc<dyn Fn(P, BoxError) -> BoxFuture<'static, std::result::Result<R, BoxError>> + Send + Sync>;

/// Errors surfaced by [`Command::execute`].
///
/// Causes from the run and fallback closures stay reachable through
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The breaker rejected the call and no fallback was configured.
    #[error("{name}: {status}: unavailable")]
    Unavailable { name: String, status: String },

    /// The run (or the fallback) outlived its time budget.
    #[error("{name}: timeout")]
    Timeout { name: String },

    /// The run returned an error and no fallback was configured.
    #[error("{name}: run failed")]
    Run {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The fallback itself returned an error.
    #[error("{name}: fallback failed")]
    Fallback {
        name: String,
        #[source]
        source: BoxError,
    },
}

impl ExecuteError {
    /// True for the timeout outcome, whichever stage timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the breaker short-circuited the call.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Options for [`Command::new`]. The closure fields make this a
/// setter-style struct rather than a plain literal.
pub struct CommandOptions<P, R> {
    breaker: Option<Breaker>,
    fallback: Option<FallbackFn<P, R>>,
    timeout: Duration,
}

impl<P, R> Default for CommandOptions<P, R> {
    fn default() -> Self {
        Self {
            breaker: None,
            fallback: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl<P, R> CommandOptions<P, R> {
    /// Use the given breaker instead of a default cut breaker.
    #[must_use]
    pub fn breaker(mut self, breaker: Breaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Time budget for the run, and separately for the fallback.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Degradation path invoked when the call fails or is rejected.
    /// Receives the original parameter and the error being degraded.
    #[must_use]
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(P, BoxError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, BoxError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(
            move |param, cause| -> BoxFuture<'static, std::result::Result<R, BoxError>> {
                Box::pin(fallback(param, cause))
            },
        ));
        self
    }
}

/// A target operation bound to a breaker.
///
/// Per call: ask the breaker, run the target under a time budget,
/// record the outcome, and route failures through the fallback when
/// one is configured.
pub struct Command<P, R> {
    name: String,
    run: RunFn<P, R>,
    fallback: Option<FallbackFn<P, R>>,
    timeout: Duration,
    breaker: Breaker,
}

impl<P, R> Command<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Bind `run` to a breaker. Without an explicit breaker a cut
    /// breaker with default thresholds is created under this command's
    /// name. Must be called inside a Tokio runtime.
    pub fn new<F, Fut>(name: impl Into<String>, run: F, options: CommandOptions<P, R>) -> Result<Self>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, BoxError>> + Send + 'static,
    {
        let name = name.into();
        let breaker = match options.breaker {
            Some(breaker) => breaker,
            None => Breaker::Cut(CutBreaker::new(name.clone(), CutBreakerConfig::default())?),
        };

        Ok(Self {
            name,
            run: Arc::new(
                move |param| -> BoxFuture<'static, std::result::Result<R, BoxError>> {
                    Box::pin(run(param))
                },
            ),
            fallback: options.fallback,
            timeout: options.timeout,
            breaker,
        })
    }

    /// Execute under the default time budget.
    pub async fn execute(&self, param: P) -> std::result::Result<R, ExecuteError> {
        self.execute_with_deadline(Instant::now() + self.timeout, param)
            .await
    }

    /// Execute with the run budget capped at `min(deadline - now,
    /// default timeout)`. The fallback, if it comes into play, always
    /// gets a fresh full default budget.
    pub async fn execute_with_deadline(
        &self,
        deadline: Instant,
        param: P,
    ) -> std::result::Result<R, ExecuteError> {
        let (admitted, status) = self.breaker.allow().await;
        if !admitted {
            debug!(
                target: "tripwire::command",
                command = %self.name,
                status = %status,
                "short-circuited"
            );
            let cause = ExecuteError::Unavailable {
                name: self.name.clone(),
                status,
            };
            return match &self.fallback {
                Some(fallback) => {
                    self.degrade(Arc::clone(fallback), param, Box::new(cause), false)
                        .await
                }
                None => Err(cause),
            };
        }

        let budget = deadline.saturating_duration_since(Instant::now()).min(self.timeout);
        match bounded((self.run)(param.clone()), budget).await {
            Outcome::Done(value) => {
                self.breaker.success().await;
                Ok(value)
            }
            Outcome::Failed(cause) => {
                self.breaker.failure().await;
                match &self.fallback {
                    Some(fallback) => self.degrade(Arc::clone(fallback), param, cause, true).await,
                    None => Err(ExecuteError::Run {
                        name: self.name.clone(),
                        source: cause,
                    }),
                }
            }
            Outcome::TimedOut => {
                self.breaker.timeout().await;
                Err(ExecuteError::Timeout {
                    name: self.name.clone(),
                })
            }
            Outcome::Panicked(payload) => {
                self.breaker.failure().await;
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Route a failed or rejected call through the fallback under a
    /// fresh full budget, never a residue of the run deadline.
    ///
    /// `record_outcome` is false for short-circuited calls: fallback
    /// events bump the metric's `last_execute`, which an open breaker
    /// measures its sleep window against, so recording them under
    /// sustained rejected traffic would keep the breaker open forever.
    async fn degrade(
        &self,
        fallback: FallbackFn<P, R>,
        param: P,
        cause: BoxError,
        record_outcome: bool,
    ) -> std::result::Result<R, ExecuteError> {
        match bounded(fallback(param, cause), self.timeout).await {
            Outcome::Done(value) => {
                if record_outcome {
                    self.breaker.fallback_success().await;
                }
                Ok(value)
            }
            Outcome::Failed(cause) => {
                if record_outcome {
                    self.breaker.fallback_failure().await;
                }
                Err(ExecuteError::Fallback {
                    name: self.name.clone(),
                    source: cause,
                })
            }
            Outcome::TimedOut => {
                if record_outcome {
                    self.breaker.fallback_failure().await;
                }
                Err(ExecuteError::Timeout {
                    name: self.name.clone(),
                })
            }
            Outcome::Panicked(payload) => {
                if record_outcome {
                    self.breaker.fallback_failure().await;
                }
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Snapshot of the owned breaker.
    pub async fn summary(&self) -> BreakerSummary {
        self.breaker.summary().await
    }

    #[must_use]
    pub fn breaker(&self) -> &Breaker {
        &self.breaker
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the owned breaker's metric aggregator. Idempotent; calls
    /// executed afterwards still run but are no longer recorded.
    pub fn close(&self) {
        self.breaker.close();
    }
}

enum Outcome<R> {
    Done(R),
    Failed(BoxError),
    TimedOut,
    Panicked(Box<dyn std::any::Any + Send>),
}

/// Drive `fut` on an auxiliary task, bounded by `budget`. On timeout
/// the task is aborted, which cancels the in-flight future; the sleep
/// is dropped on the fast path, so no timer outlives the call. Panics
/// on the auxiliary task are captured for the caller to re-raise.
async fn bounded<R: Send + 'static>(
    fut: BoxFuture<'static, std::result::Result<R, BoxError>>,
    budget: Duration,
) -> Outcome<R> {
    let mut task = tokio::spawn(fut);
    tokio::select! {
        result = &mut task => match result {
            Ok(Ok(value)) => Outcome::Done(value),
            Ok(Err(cause)) => Outcome::Failed(cause),
            Err(join_error) if join_error.is_panic() => Outcome::Panicked(join_error.into_panic()),
            Err(join_error) => Outcome::Failed(Box::new(join_error)),
        },
        () = tokio::time::sleep(budget) => {
            task.abort();
            Outcome::TimedOut
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let unavailable = ExecuteError::Unavailable {
            name: "lookup".to_string(),
            status: "open".to_string(),
        };
        assert_eq!(unavailable.to_string(), "lookup: open: unavailable");
        assert!(unavailable.is_unavailable());
        assert!(!unavailable.is_timeout());

        let timeout = ExecuteError::Timeout {
            name: "lookup".to_string(),
        };
        assert_eq!(timeout.to_string(), "lookup: timeout");
        assert!(timeout.is_timeout());
    }

    #[test]
    fn test_error_sources_are_preserved() {
        let run = ExecuteError::Run {
            name: "lookup".to_string(),
            source: "connection refused".into(),
        };
        let source = std::error::Error::source(&run).unwrap();
        assert_eq!(source.to_string(), "connection refused");

        let fallback = ExecuteError::Fallback {
            name: "lookup".to_string(),
            source: "cache miss".into(),
        };
        let source = std::error::Error::source(&fallback).unwrap();
        assert_eq!(source.to_string(), "cache miss");
    }

    #[tokio::test]
    async fn test_default_options() {
        let options = CommandOptions::<u64, u64>::default();
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(options.breaker.is_none());
        assert!(options.fallback.is_none());
    }

    #[tokio::test]
    async fn test_bounded_outcomes() {
        let done = bounded(Box::pin(async { Ok::<_, BoxError>(7u64) }), Duration::from_secs(1)).await;
        assert!(matches!(done, Outcome::Done(7)));

        let failed = bounded(
            Box::pin(async { Err::<u64, BoxError>("nope".into()) }),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(failed, Outcome::Failed(_)));

        let timed_out = bounded(
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(7u64)
            }),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(timed_out, Outcome::TimedOut));
    }
}
