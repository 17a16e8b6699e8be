pub mod lexer;
pub mod parser;
#[cfg(test)]
pub mod tests;

use self::{lexer::Error as LexerError, parser::Error as ParserError};
use std::result::Result as STDResult;
use thiserror::Error;

pub type Result<T> = STDResult<T, Error>;

/// A syntax error, raised either while tokenizing or parsing.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
	#[error(transparent)]
	Lexer(#[from] LexerError),

	#[error(transparent)]
	Parser(#[from] ParserError)
}
