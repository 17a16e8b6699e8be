#![forbid(
	// Rationale: A script runtime must be reliable, and should not be vulnerable
	// to sandbox escape vulnerabilities.
	unsafe_code
)]
#![warn(
	// Rationale: Panics should be avoided in favor of returning a Result, and
	// situations where panics are intentional should be well documented
	// (requiring an allow attribute to signal complete documentation).
	clippy::unwrap_used,
	clippy::panic,

	// Rationale: These should not be in production code.
	clippy::todo,
	clippy::unimplemented
)]
#![allow(
	// Rationale: Tabs are superior, don't at me.
	clippy::tabs_in_doc_comments,

	// Rationale: Drop is a valid way to ensure an expression returns a unit. It
	// can be used like JavaScript's void keyword.
	clippy::drop_copy
)]
//! Selenite is an embeddable scripting language runtime for a small dialect of
//! Lua, written entirely in safe Rust. Scripts are run straight from their
//! expression tree, there is no bytecode.
//!
//! The runtime is made of a handful of components, each building on the last.
//! - [ast::lexer] - The lexer, responsible for turning source text into
//!   positioned tokens
//! - [ast::parser] - The parser, responsible for grouping tokens by their
//!   brackets and building an expression tree from the groups
//! - [vm] - The evaluator and the [State][vm::State] it runs against,
//!   responsible for executing expression trees
//! - [marshal] - The bridge between host values and script values, including
//!   host types with methods and properties
//! On top of these, the native libraries scripts expect are provided within
//! [lua_lib], and tables of plain data can be stored with [codec].
//!
//! Examples
//! --------
//! Most hosts only need a [State][vm::State].
//! ```rust
//! use selenite::vm::{State, value::Value};
//!
//! let mut state = State::new();
//! state.register_function("add", |_, stack| {
//! 	let sum = stack.take_arguments().iter().filter_map(Value::number).sum::<f64>();
//! 	stack.push(Value::from(sum));
//! 	Ok(1)
//! });
//!
//! let result = state.do_string("local x = add(1, 2, 3) return x * 2").unwrap();
//! assert_eq!(result, Value::from(12));
//! ```
//! Runtime errors don't come back as an [Err]. They're kept by the state, so
//! a host can run many chunks and only inspect the ones which failed.
//! ```rust
//! # use selenite::vm::{ErrorKind, State, value::Value};
//! let mut state = State::new();
//!
//! assert_eq!(state.do_string("return nil + 1").unwrap(), Value::Nil);
//! assert_eq!(state.last_error().unwrap().kind, ErrorKind::Arithmetic);
//! ```

pub mod ast;
pub mod codec;
pub mod lua_lib;
pub mod marshal;
mod recursion;
pub mod vm;
