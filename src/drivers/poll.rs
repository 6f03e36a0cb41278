//! Shared polling loop (spec §9 "duplicate poll logic" redesign note).
//!
//! The negotiation, transfer, and registry-transfer drivers all do the same
//! thing: poll a remote resource on an interval until it reaches a terminal
//! state or the process is cancelled. Previously each driver duplicated
//! this loop; here it's one generic helper parametrized on the per-call
//! check, returning a tagged `PollOutcome` instead of a silent `None` so a
//! cancelled poll can never be mistaken for "still pending".

use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;
use crate::registry::AbortSignal;

/// Result of a poll loop: either the awaited terminal value, or an explicit
/// cancellation signal. Never conflated with "not yet terminal".
#[derive(Debug)]
pub enum PollOutcome<T> {
    Terminal(T),
    Aborted,
}

/// Poll on `interval` by calling `poll_once` until it returns `Some(value)`
/// (terminal) or the process's abort signal is set. `poll_once` returning
/// `Ok(None)` means "checked, still pending, keep polling".
pub async fn poll_until_terminal<F, Fut, T>(
    interval: Duration,
    abort: &AbortSignal,
    mut poll_once: F,
) -> Result<PollOutcome<T>, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, EngineError>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; consume it before the first poll
    loop {
        if abort.is_set() {
            return Ok(PollOutcome::Aborted);
        }
        if let Some(value) = poll_once().await? {
            return Ok(PollOutcome::Terminal(value));
        }
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    fn fresh_abort() -> (AbortSignal, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (AbortSignal::for_test(flag.clone()), flag)
    }

    #[tokio::test]
    async fn stops_as_soon_as_poll_once_returns_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let (abort, _flag) = fresh_abort();
        let calls_clone = calls.clone();
        let outcome = poll_until_terminal(Duration::from_millis(1), &abort, move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n >= 2 {
                    Ok(Some(n))
                } else {
                    Ok(None)
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(outcome, PollOutcome::Terminal(2)));
    }

    #[tokio::test]
    async fn propagates_poll_errors() {
        let (abort, _flag) = fresh_abort();
        let result: Result<PollOutcome<()>, EngineError> =
            poll_until_terminal(Duration::from_millis(1), &abort, || async {
                Err(EngineError::ProtocolError("boom".into()))
            })
            .await;
        assert!(matches!(result, Err(EngineError::ProtocolError(_))));
    }
}
