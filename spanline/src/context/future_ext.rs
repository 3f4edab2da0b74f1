use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use crate::Context;

pin_project_lite::pin_project! {
    /// A future with an associated context attached for every poll.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: Future> Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        this.inner.poll(task_cx)
    }
}

/// Extension trait carrying a [`Context`] across await points.
///
/// The thread-local current context does not survive task suspension;
/// wrapping a future re-attaches the context at each poll so code inside
/// sees it as current regardless of which worker thread polls.
pub trait FutureExt: Sized {
    /// Attach `cx` as the current context whenever this future is polled.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attach the context that is current at call time.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(Context::current())
    }
}

impl<T: Future> FutureExt for T {}
