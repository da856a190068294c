use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use serde_json::Value;
use tenax_common::RpcError;

type SuccessFn = Box<dyn FnOnce(Value)>;
type FailureFn = Box<dyn FnOnce(Rc<RpcError>)>;

/// The decided outcome of a call. Errors are shared behind an `Rc` so the
/// failure continuation and an awaiting caller can both observe them.
pub type CallOutcome = Result<Value, Rc<RpcError>>;

struct Shared {
    // None while pending; set exactly once.
    outcome: Option<CallOutcome>,
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
    waker: Option<Waker>,
}

/// Single-resolution promise for one logical call.
///
/// Resolves at most once, ever: either the success channel or the failure
/// channel fires, never both, never twice. Registering a continuation after
/// resolution still delivers the decided outcome immediately.
///
/// `ResultFuture` is also a [`Future`], so callers can `.await` it instead
/// of registering continuations. Note that under
/// [`RaisePolicy::Raise`](crate::RaisePolicy::Raise) a failed call resolves
/// neither channel and the future stays pending forever; the error goes to
/// the client's supervisory handler instead.
#[derive(Clone)]
pub struct ResultFuture {
    shared: Rc<RefCell<Shared>>,
}

impl ResultFuture {
    pub(crate) fn new() -> Self {
        ResultFuture {
            shared: Rc::new(RefCell::new(Shared {
                outcome: None,
                on_success: None,
                on_failure: None,
                waker: None,
            })),
        }
    }

    /// Registers the success continuation. Runs immediately if the call has
    /// already succeeded.
    pub fn on_success(&self, f: impl FnOnce(Value) + 'static) {
        let mut shared = self.shared.borrow_mut();
        match shared.outcome.as_ref() {
            None => shared.on_success = Some(Box::new(f)),
            Some(Ok(value)) => {
                let value = value.clone();
                drop(shared);
                f(value);
            }
            Some(Err(_)) => {}
        }
    }

    /// Registers the failure continuation. Runs immediately if the call has
    /// already failed.
    pub fn on_failure(&self, f: impl FnOnce(Rc<RpcError>) + 'static) {
        let mut shared = self.shared.borrow_mut();
        match shared.outcome.as_ref() {
            None => shared.on_failure = Some(Box::new(f)),
            Some(Err(error)) => {
                let error = Rc::clone(error);
                drop(shared);
                f(error);
            }
            Some(Ok(_)) => {}
        }
    }

    /// True while no outcome has been decided.
    pub fn is_pending(&self) -> bool {
        self.shared.borrow().outcome.is_none()
    }

    pub(crate) fn succeed(&self, value: Value) {
        self.resolve(Ok(value));
    }

    pub(crate) fn fail(&self, error: RpcError) {
        self.resolve(Err(Rc::new(error)));
    }

    fn resolve(&self, outcome: CallOutcome) {
        let mut shared = self.shared.borrow_mut();
        if shared.outcome.is_some() {
            // Already decided; a second resolution is dropped.
            return;
        }
        shared.outcome = Some(outcome.clone());
        let on_success = shared.on_success.take();
        let on_failure = shared.on_failure.take();
        let waker = shared.waker.take();
        drop(shared);

        match outcome {
            Ok(value) => {
                if let Some(f) = on_success {
                    f(value);
                }
            }
            Err(error) => {
                if let Some(f) = on_failure {
                    f(error);
                }
            }
        }
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl Future for ResultFuture {
    type Output = CallOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.borrow_mut();
        match shared.outcome.as_ref() {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                shared.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
