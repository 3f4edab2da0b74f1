//! Execution-scoped context propagation.
//!
//! A [`Context`] is an immutable bundle of request-scoped values, currently
//! the active [`SpanContext`]. The current context is tracked per thread as
//! a stack; [`Context::attach`] pushes an entry and returns a guard that
//! pops it on drop, so nested scopes restore their predecessor naturally.
//!
//! ```
//! use spanline::Context;
//! # use spanline::trace::SpanContext;
//! # let span_context = SpanContext::empty();
//!
//! let cx = Context::current().with_span_context(span_context);
//! {
//!     let _guard = cx.attach();
//!     // Context::current() now carries the span context.
//! }
//! // Previous context restored.
//! ```
//!
//! Thread-locals do not follow futures across await points; async code
//! re-attaches per poll through [`FutureExt::with_context`].

mod future_ext;

pub use future_ext::{FutureExt, WithContext};

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use crate::trace::SpanContext;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

/// An immutable snapshot of request-scoped propagation state.
#[derive(Clone, Default, PartialEq)]
pub struct Context {
    span_context: Option<SpanContext>,
}

impl Context {
    /// An empty context carrying no span.
    pub fn new() -> Self {
        Context::default()
    }

    /// Snapshot of the current thread's active context.
    pub fn current() -> Self {
        CURRENT_CONTEXT
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_default()
    }

    /// Copy of this context with `span_context` as its active span.
    pub fn with_span_context(&self, span_context: SpanContext) -> Self {
        Context {
            span_context: Some(span_context),
        }
    }

    /// The active span context, if any.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span_context.as_ref()
    }

    /// Whether this context carries a valid remote or local span.
    pub fn has_active_span(&self) -> bool {
        self.span_context.as_ref().is_some_and(|sc| sc.is_valid())
    }

    /// Make this context the thread's current one until the guard drops.
    ///
    /// Guards may be dropped out of attach order; each guard restores the
    /// stack to its own attach point, discarding anything pushed above it.
    pub fn attach(self) -> ContextGuard {
        let pos = CURRENT_CONTEXT.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self);
            stack.len()
        });
        ContextGuard {
            pos,
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("span_context", &self.span_context)
            .finish()
    }
}

/// Restores the previously attached context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    pos: usize,
    // Guards must stay on the thread whose stack they will unwind.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() >= self.pos {
                stack.truncate(self.pos - 1);
            }
        });
    }
}
