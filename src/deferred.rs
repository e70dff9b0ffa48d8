//! Deferred participant results and the pending outcome cell

use crate::{HandlerError, HandlerResult, Operation};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

/// A participant result that becomes available later.
///
/// Returned by a callback that keeps working after it has answered. The value
/// it eventually yields is itself a handler result and may be anything except
/// another deferred value.
pub struct Deferred(BoxFuture<'static, HandlerResult>);

impl Deferred {
    /// Wrap any future producing a handler result
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(fut.boxed())
    }

    /// A deferred value resolved explicitly through the returned [`Completion`]
    pub fn channel() -> (Self, Completion) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let deferred = Self::new(async move {
            rx.await
                .unwrap_or_else(|_| Err(HandlerError::failed("deferred result abandoned")))
        });
        (deferred, Completion(tx))
    }
}

impl Future for Deferred {
    type Output = HandlerResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Deferred(..)")
    }
}

/// Resolving side of [`Deferred::channel`]
pub struct Completion(tokio::sync::oneshot::Sender<HandlerResult>);

impl Completion {
    /// Resolve with a value; returns false if nobody awaits it any more
    pub fn resolve(self, result: HandlerResult) -> bool {
        self.0.send(result).is_ok()
    }

    pub fn succeed(self, output: crate::HandlerOutput) -> bool {
        self.resolve(Ok(output))
    }

    pub fn fail(self, error: HandlerError) -> bool {
        self.resolve(Err(error))
    }
}

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 1;
const RESOLVED: u8 = 2;
const CONSUMED: u8 = 3;

/// Observable state of a [`PendingOutcome`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingState {
    Unresolved,
    Resolved,
    Consumed,
}

/// Eventually-resolved result of a deferred participant call.
///
/// The state only moves forward: Unresolved -> Resolved exactly once through
/// a compare-and-swap, then Resolved -> Consumed when the value is taken.
pub struct PendingOutcome {
    operation: Operation,
    state: AtomicU8,
    value: Mutex<Option<HandlerResult>>,
}

impl PendingOutcome {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            state: AtomicU8::new(UNRESOLVED),
            value: Mutex::new(None),
        }
    }

    /// Operation whose handler produced the deferred value
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Store the result. Only the first call wins; later calls return false.
    pub fn resolve(&self, result: HandlerResult) -> bool {
        if self
            .state
            .compare_exchange(UNRESOLVED, RESOLVING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.state.store(RESOLVED, Ordering::Release);
        true
    }

    pub fn state(&self) -> PendingState {
        match self.state.load(Ordering::Acquire) {
            RESOLVED => PendingState::Resolved,
            CONSUMED => PendingState::Consumed,
            // a resolver mid-store still counts as in progress
            _ => PendingState::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == PendingState::Resolved
    }

    /// Take the resolved value; `None` while unresolved or once consumed
    pub fn take(&self) -> Option<HandlerResult> {
        self.state
            .compare_exchange(RESOLVED, CONSUMED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.value.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl std::fmt::Debug for PendingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOutcome")
            .field("operation", &self.operation)
            .field("state", &self.state())
            .finish()
    }
}
