//! Retry loop for step execution.
//!
//! A failing step is re-attempted while the error is retryable and the
//! policy's `max_retries` is not exhausted, sleeping `delay * n` seconds
//! before retry `n`. The backoff sleep races the run's cancellation token.
//!
//! Two settlement modes decide how a successful retry relates to the failure
//! that triggered it (see [`RetryMode`]):
//! - `RetrySuccessClears`: the successful attempt's output is the result.
//! - `FirstFailureAuthoritative`: retries still run, but the step settles
//!   with the first failure even when a later attempt succeeded.

use std::future::Future;

use flowforge_types::JsonMap;
use flowforge_types::config::RetryMode;
use flowforge_types::workflow::RetryPolicy;
use tokio_util::sync::CancellationToken;

use super::step_runner::StepError;

/// Result of running a step through the retry loop.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: Result<JsonMap, StepError>,
    /// Retries performed (attempts - 1).
    pub retry_count: u32,
    /// A retry succeeded after at least one failure.
    pub recovered: bool,
}

/// Stateless retry decisions.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should follow `retries_done` retries that
    /// ended in `error`.
    pub fn should_retry(policy: &RetryPolicy, retries_done: u32, error: &StepError) -> bool {
        error.is_retryable() && retries_done < policy.max_retries
    }

    /// Run `attempt` until it succeeds, fails permanently or retries run out.
    ///
    /// `attempt` receives the 1-based attempt number. `on_retry` receives the
    /// 1-based retry number and the error being retried, and is awaited
    /// before the backoff sleep.
    pub async fn run<A, AFut, R, RFut>(
        policy: &RetryPolicy,
        mode: RetryMode,
        cancel: &CancellationToken,
        mut attempt: A,
        mut on_retry: R,
    ) -> RetryOutcome
    where
        A: FnMut(u32) -> AFut,
        AFut: Future<Output = Result<JsonMap, StepError>>,
        R: FnMut(u32, String) -> RFut,
        RFut: Future<Output = ()>,
    {
        let mut first_failure: Option<StepError> = None;
        let mut retries = 0u32;

        loop {
            match attempt(retries + 1).await {
                Ok(output) => {
                    let recovered = first_failure.is_some();
                    let result = match (mode, first_failure) {
                        (RetryMode::FirstFailureAuthoritative, Some(first)) => Err(first),
                        _ => Ok(output),
                    };
                    return RetryOutcome {
                        result,
                        retry_count: retries,
                        recovered,
                    };
                }
                Err(err) => {
                    if !Self::should_retry(policy, retries, &err) {
                        let result = match (mode, first_failure) {
                            (RetryMode::FirstFailureAuthoritative, Some(first)) => Err(first),
                            _ => Err(err),
                        };
                        return RetryOutcome {
                            result,
                            retry_count: retries,
                            recovered: false,
                        };
                    }

                    retries += 1;
                    let message = err.to_string();
                    first_failure.get_or_insert(err);
                    on_retry(retries, message).await;

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return RetryOutcome {
                                result: Err(StepError::Cancelled),
                                retry_count: retries,
                                recovered: false,
                            };
                        }
                        _ = tokio::time::sleep(policy.backoff(retries)) => {}
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, delay: 1.0 }
    }

    fn ok_output() -> JsonMap {
        json!({"ok": true}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_should_retry_respects_bound_and_error_kind() {
        let p = policy(2);
        let exec = StepError::execution("boom");
        assert!(RetryHandler::should_retry(&p, 0, &exec));
        assert!(RetryHandler::should_retry(&p, 1, &exec));
        assert!(!RetryHandler::should_retry(&p, 2, &exec));
        assert!(!RetryHandler::should_retry(&p, 0, &StepError::config("bad")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_step_is_attempted_max_retries_plus_one() {
        let attempts = Arc::new(AtomicU32::new(0));
        let retries_seen = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let outcome = RetryHandler::run(
            &policy(2),
            RetryMode::RetrySuccessClears,
            &cancel,
            |_| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::execution("always"))
                }
            },
            |_, _| {
                let retries_seen = Arc::clone(&retries_seen);
                async move {
                    retries_seen.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.retry_count, 2);
        assert!(outcome.result.is_err());
        // Linear backoff: 1s + 2s.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let outcome = RetryHandler::run(
            &policy(5),
            RetryMode::RetrySuccessClears,
            &CancellationToken::new(),
            |_| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::config("missing url"))
                }
            },
            |_, _| async {},
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.retry_count, 0);
        assert!(matches!(outcome.result, Err(StepError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_clears_first_failure() {
        let outcome = RetryHandler::run(
            &policy(2),
            RetryMode::RetrySuccessClears,
            &CancellationToken::new(),
            |n| async move {
                if n == 1 {
                    Err(StepError::execution("flaky"))
                } else {
                    Ok(ok_output())
                }
            },
            |_, _| async {},
        )
        .await;
        assert_eq!(outcome.result.unwrap(), ok_output());
        assert_eq!(outcome.retry_count, 1);
        assert!(outcome.recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_is_authoritative() {
        let outcome = RetryHandler::run(
            &policy(2),
            RetryMode::FirstFailureAuthoritative,
            &CancellationToken::new(),
            |n| async move {
                match n {
                    1 => Err(StepError::execution("first")),
                    2 => Err(StepError::execution("second")),
                    _ => Ok(ok_output()),
                }
            },
            |_, _| async {},
        )
        .await;
        assert_eq!(outcome.result.unwrap_err(), StepError::execution("first"));
        assert_eq!(outcome.retry_count, 2);
        assert!(outcome.recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleep_observes_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome = RetryHandler::run(
            &RetryPolicy { max_retries: 3, delay: 3600.0 },
            RetryMode::RetrySuccessClears,
            &cancel,
            |_| async { Err(StepError::execution("down")) },
            move |_, _| {
                let trigger = trigger.clone();
                async move { trigger.cancel() }
            },
        )
        .await;
        assert_eq!(outcome.result.unwrap_err(), StepError::Cancelled);
        assert_eq!(outcome.retry_count, 1);
    }
}
