use self::super::{CallFrame, value::Value};
use crate::ast::Error as SyntaxError;
use itertools::Itertools;
use std::{
	fmt::{Display, Formatter, Result as FMTResult},
	io::Error as IOError
};
use thiserror::Error;

/// Any error the runtime can produce.
#[derive(Debug, Error)]
pub enum Error {
	/// An error raised while evaluating a script.
	#[error(transparent)]
	Runtime(#[from] RuntimeError),

	#[error("syntax error: {0}")]
	Syntax(#[from] SyntaxError),

	#[error(transparent)]
	Io(#[from] IOError),

	/// A defect in the interpreter itself. These are never caught.
	#[error("internal error: {0}")]
	Internal(Box<str>)
}

/// What went wrong in a [RuntimeError].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
	IndexNonTable,
	NilIndex,
	Arithmetic,
	Comparison,
	Concatenation,
	Length,
	CallNonFunction,
	InvalidNativeInstance,
	UnregisteredType,
	StackOverflow,
	/// Raised by a script, through `error` or `assert`.
	Script,
	/// A native function failed.
	Native
}

impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::IndexNonTable => write!(f, "index error"),
			Self::NilIndex => write!(f, "nil index"),
			Self::Arithmetic => write!(f, "arithmetic error"),
			Self::Comparison => write!(f, "comparison error"),
			Self::Concatenation => write!(f, "concatenation error"),
			Self::Length => write!(f, "length error"),
			Self::CallNonFunction => write!(f, "call error"),
			Self::InvalidNativeInstance => write!(f, "invalid instance"),
			Self::UnregisteredType => write!(f, "unregistered type"),
			Self::StackOverflow => write!(f, "stack overflow"),
			Self::Script => write!(f, "script error"),
			Self::Native => write!(f, "native error")
		}
	}
}

/// An error raised during evaluation.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
	pub kind: ErrorKind,
	pub message: String,
	/// The value the error was raised with. Scripts can raise any value with
	/// `error`, for everything else this is the message.
	pub value: Value,
	/// The operand stack when the error was raised.
	pub stack: Vec<Value>,
	/// The call stack when the error was raised, innermost call last.
	pub trace: Vec<CallFrame>
}

impl RuntimeError {
	/// Creates an error with no stack snapshot or trace.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		let message = message.into();
		let value = Value::from(&message as &str);
		Self {kind, message, value, stack: Vec::new(), trace: Vec::new()}
	}

	/// Renders the call stack, one frame per line, innermost first.
	pub fn traceback(&self) -> String {
		self.trace.iter().rev()
			.map(|frame| format!("\tin {}", frame))
			.join("\n")
	}
}

impl From<RuntimeError> for Value {
	fn from(error: RuntimeError) -> Self {
		error.value
	}
}
