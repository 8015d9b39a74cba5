//! Stack safety for the recursive parser and evaluator.
//!
//! Deep but legal programs recurse through pest's descent, the AST builders and
//! nested `poll` calls of the evaluator's boxed futures. The helpers here grow
//! the native stack on demand with `stacker` so those paths end in a
//! `ParseError` or a `StackOverflow` runtime error rather than aborting the
//! process.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};

/// Grow when less than this much stack remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each additional stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Stack reserved for one pest parse. Input nesting is capped by
/// [`crate::parser::MAX_NESTING_DEPTH`], so this is never exhausted.
pub const PARSER_STACK_SIZE: usize = 16 * 1024 * 1024;

#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// Runs `f` on a fresh stack segment of `size` bytes.
pub fn with_stack<R>(size: usize, f: impl FnOnce() -> R) -> R {
    stacker::grow(size, f)
}

/// Future adapter that checks the remaining stack before every poll.
struct StackGuarded<'a, T> {
    inner: BoxFuture<'a, T>,
}

impl<T> Future for StackGuarded<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let inner = &mut self.inner;
        ensure_sufficient_stack(|| inner.as_mut().poll(cx))
    }
}

/// Boxes `future` so that polling it never runs into the red zone.
pub fn guarded<'a, T: 'a>(future: impl Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(StackGuarded {
        inner: future.boxed(),
    })
}
