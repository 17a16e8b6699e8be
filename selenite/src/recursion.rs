//! Keeps deep recursion in the parser, the evaluator and the table encoder off
//! the end of the native stack, by growing it onto the heap when it runs low.
//!
//! This only protects the native stack. How deep scripts may nest is limited
//! separately, by the parser's nesting limit and
//! [Options::max_depth][crate::vm::Options::max_depth].

/// If less than this is left, the stack is grown before recursing.
const RED_ZONE: usize = 128 * 1024;

/// How much is allocated every time the stack grows.
const GROWTH: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
	stacker::maybe_grow(RED_ZONE, GROWTH, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
	f()
}
