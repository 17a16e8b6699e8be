use itertools::{Itertools, MultiPeek};
use std::{
	fmt::{Display, Formatter, Result as FMTResult},
	result::Result as STDResult
};
use thiserror::Error;

pub type Result<T> = STDResult<T, Error>;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
	#[error("{1}: unexpected symbol {0:?}")]
	UnexpectedCharacter(char, Position),

	#[error("{1}: invalid escape sequence '\\{0}'")]
	IllegalEscapeCode(char, Position),

	#[error("{0}: unfinished string")]
	UnterminatedString(Position),

	#[error("{1}: malformed number near '{0}'")]
	MalformedNumber(Box<str>, Position)
}

/// A location in source text. Lines and columns both start at one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Position {
	pub line: usize,
	pub column: usize
}

impl Default for Position {
	fn default() -> Self {
		Self {line: 1, column: 1}
	}
}

impl Display for Position {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "{}:{}", self.line, self.column)
	}
}

/// A token, and where it started.
#[derive(Clone, Debug, PartialEq)]
pub struct Lexeme {
	pub token: Token,
	pub position: Position
}

/// Tokenizes all of `source`, stopping at the first malformed token.
pub fn tokenize(source: &str) -> Result<Vec<Lexeme>> {
	Lexer::new(source.chars()).collect()
}

/// Tokenizes source text, character by character.
///
/// The Lexer wraps some [`Iterator`] of [`char`]s, T, and can be iterated over,
/// producing [`Lexeme`]s. Whitespace never produces a token.
///
/// Examples
/// --------
/// ```rust
/// # use selenite::ast::lexer::{Lexer, Position, Token};
/// let mut lexer = Lexer::new("x = 1\n  .. y".chars())
/// 	.map(|lexeme| lexeme.map(|lexeme| (lexeme.token, lexeme.position)));
///
/// assert_eq!(lexer.next(), Some(Ok((Token::Identifier("x".to_owned()), Position {line: 1, column: 1}))));
/// assert_eq!(lexer.next(), Some(Ok((Token::Assign, Position {line: 1, column: 3}))));
/// assert_eq!(lexer.next(), Some(Ok((Token::Number(1.0, true), Position {line: 1, column: 5}))));
/// assert_eq!(lexer.next(), Some(Ok((Token::Concat, Position {line: 2, column: 3}))));
/// assert_eq!(lexer.next(), Some(Ok((Token::Identifier("y".to_owned()), Position {line: 2, column: 6}))));
/// assert_eq!(lexer.next(), None);
/// ```
pub struct Lexer<T>
		where T: Iterator<Item = char> {
	source: MultiPeek<T>,
	position: Position
}

/// The private Lexer API.
impl<T> Lexer<T>
		where T: Iterator<Item = char> {
	pub fn new(source: T) -> Self {
		Self {source: source.multipeek(), position: Position::default()}
	}

	/// The position of the next character to be consumed.
	pub fn position(&self) -> Position {
		self.position
	}

	/// Eats a character, disposing of it.
	pub(crate) fn eat(&mut self) {
		drop(self.next());
	}

	/// Returns the next character, if any, keeping track of lines and columns.
	#[must_use = "all characters should be consumed, if you already peeked this, you should use `eat`"]
	pub(crate) fn next(&mut self) -> Option<char> {
		let next = self.source.next()?;
		match next {
			'\n' => {self.position.line += 1; self.position.column = 1},
			_ => self.position.column += 1
		}
		Some(next)
	}

	/// Returns the next character, assuming that the character was already
	/// peeked, and did infact, exist.
	pub(crate) fn peeked_next(&mut self) -> char {
		match self.next() {
			Some(next) => next,
			None => unreachable!("called peeked_next when there wasn't anything next")
		}
	}

	/// Peeks the next character, if any.
	pub(crate) fn peek(&mut self) -> Option<char> {
		self.source.reset_peek();
		self.source.peek().copied()
	}

	/// Peeks the character after the next one, if any.
	pub(crate) fn peek_second(&mut self) -> Option<char> {
		self.source.reset_peek();
		self.source.peek();
		self.source.peek().copied()
	}

	/// Parses and discards all whitespace, and returns the last peeked non
	/// whitespace character.
	pub(crate) fn parse_whitespace(&mut self) -> Option<char> {
		loop {
			match self.peek()? {
				' ' | '\n' | '\r' | '\t' => self.eat(),
				character => break Some(character)
			}
		}
	}

	/// Parses an identifier or keyword into a token.
	pub(crate) fn parse_identifier(&mut self) -> Token {
		let mut identifier = String::new();

		while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.peek()
			{identifier.push(self.peeked_next())}

		match &identifier as &str {
			"and" => Token::KeywordAnd,
			"true" => Token::LiteralTrue,
			"false" => Token::LiteralFalse,
			"nil" => Token::LiteralNil,
			"break" => Token::KeywordBreak,
			"do" => Token::KeywordDo,
			"else" => Token::KeywordElse,
			"elseif" => Token::KeywordElseIf,
			"end" => Token::KeywordEnd,
			"for" => Token::KeywordFor,
			"function" => Token::KeywordFunction,
			"goto" => Token::KeywordGoto,
			"if" => Token::KeywordIf,
			"in" => Token::KeywordIn,
			"local" => Token::KeywordLocal,
			"not" => Token::KeywordNot,
			"or" => Token::KeywordOr,
			"repeat" => Token::KeywordRepeat,
			"return" => Token::KeywordReturn,
			"then" => Token::KeywordThen,
			"until" => Token::KeywordUntil,
			"while" => Token::KeywordWhile,
			_ => Token::Identifier(identifier)
		}
	}

	/// Parses a quoted string into a token. Assumes the opening quote *was not*
	/// consumed. The delimiters are not part of the resulting string.
	pub(crate) fn parse_string(&mut self) -> Result<Token> {
		let start = self.position;
		let delimiter = self.peeked_next();
		let mut string = String::new();

		loop {
			match self.peek() {
				None | Some('\n') => break Err(Error::UnterminatedString(start)),
				Some('\\') => {
					let escape = self.position;
					self.eat();
					match self.peek() {
						None => break Err(Error::UnterminatedString(start)),
						Some('a') => {self.eat(); string.push('\x07')},
						Some('b') => {self.eat(); string.push('\x08')},
						Some('f') => {self.eat(); string.push('\x0C')},
						Some('n') => {self.eat(); string.push('\n')},
						Some('r') => {self.eat(); string.push('\r')},
						Some('t') => {self.eat(); string.push('\t')},
						Some('v') => {self.eat(); string.push('\x0B')},
						Some('\\') => {self.eat(); string.push('\\')},
						Some('"') => {self.eat(); string.push('"')},
						Some('\'') => {self.eat(); string.push('\'')},
						Some('\n') => {self.eat(); string.push('\n')},
						Some('0'..='9') => {
							let mut code = 0u32;
							for _ in 0..3 {
								match self.peek().and_then(|digit| digit.to_digit(10)) {
									Some(digit) => {self.eat(); code = code * 10 + digit},
									None => break
								}
							}

							match char::from_u32(code).filter(|_| code <= 255) {
								Some(character) => string.push(character),
								None => break Err(Error::IllegalEscapeCode(
									char::from_digit(code % 10, 10).unwrap_or('0'), escape))
							}
						},
						Some(character) => break Err(Error::IllegalEscapeCode(character, escape))
					}
				},
				Some(character) if character == delimiter =>
					{self.eat(); break Ok(Token::String(string))},
				Some(_) => string.push(self.peeked_next())
			}
		}
	}

	/// Parses a number into a token. Assumes the first character *was not*
	/// consumed.
	///
	/// Integers (decimal or hexadecimal) carry the integer hint, anything with a
	/// fraction or exponent does not.
	pub(crate) fn parse_number(&mut self) -> Result<Token> {
		let start = self.position;
		let mut number = String::new();

		if let (Some('0'), Some('x' | 'X')) = (self.peek(), self.peek_second()) {
			self.eat(); self.eat();
			while let Some('0'..='9' | 'a'..='f' | 'A'..='F') = self.peek()
				{number.push(self.peeked_next())}
			self.reject_trailing(&mut number, start)?;

			return i64::from_str_radix(&number, 16)
				.map(|number| Token::Number(number as f64, true))
				.map_err(|_| Error::MalformedNumber(
					format!("0x{}", number).into_boxed_str(), start))
		}

		let mut integer = true;
		while let Some('0'..='9') = self.peek()
			{number.push(self.peeked_next())}

		// A period followed by another period is the concatenation operator.
		if let (Some('.'), second) = (self.peek(), self.peek_second()) {
			if second != Some('.') {
				integer = false;
				number.push(self.peeked_next());
				while let Some('0'..='9') = self.peek()
					{number.push(self.peeked_next())}
			}
		}

		if let Some('e' | 'E') = self.peek() {
			integer = false;
			number.push(self.peeked_next());
			if let Some('+' | '-') = self.peek() {number.push(self.peeked_next())}
			while let Some('0'..='9') = self.peek()
				{number.push(self.peeked_next())}
		}

		if let (Some('.'), Some('0'..='9')) = (self.peek(), self.peek_second()) {
			while let Some('0'..='9' | '.') = self.peek()
				{number.push(self.peeked_next())}
			return Err(Error::MalformedNumber(number.into_boxed_str(), start))
		}
		self.reject_trailing(&mut number, start)?;

		number.parse::<f64>()
			.map(|value| Token::Number(value, integer))
			.map_err(|_| Error::MalformedNumber(number.into_boxed_str(), start))
	}

	/// Numbers may not run straight into identifiers, as in `12abc`.
	fn reject_trailing(&mut self, number: &mut String, start: Position)
			-> Result<()> {
		match self.peek() {
			Some('a'..='z' | 'A'..='Z' | '_') => {
				while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.peek()
					{number.push(self.peeked_next())}
				Err(Error::MalformedNumber(std::mem::take(number).into_boxed_str(), start))
			},
			_ => Ok(())
		}
	}

	/// Parses a comment into a token. Assumes the first characters were `--`,
	/// and *were* consumed.
	pub(crate) fn parse_comment(&mut self, start: Position) -> Result<Token> {
		match (self.peek(), self.peek_second()) {
			(Some('['), Some('[' | '=')) => {
				self.eat();
				self.parse_bracketed(start).map(Token::Comment)
			},
			_ => {
				let mut comment = String::new();
				loop {
					match self.peek() {
						None => break Ok(Token::Comment(comment)),
						Some('\n') => {self.eat(); break Ok(Token::Comment(comment))},
						Some(_) => comment.push(self.peeked_next())
					}
				}
			}
		}
	}

	/// Parses some bracketed item, a long string or a long comment. Assumes the
	/// first character was a `[`, and *was* consumed.
	pub(crate) fn parse_bracketed(&mut self, start: Position) -> Result<String> {
		let mut level = 0usize;
		loop {
			match self.next() {
				Some('=') => level += 1,
				Some('[') => break,
				Some(character) =>
					return Err(Error::UnexpectedCharacter(character, start)),
				None => return Err(Error::UnterminatedString(start))
			}
		}

		// A newline straight after the opening bracket is skipped.
		if let Some('\n') = self.peek() {self.eat()}

		let mut string = String::new();
		loop {
			match self.next() {
				None => break Err(Error::UnterminatedString(start)),
				Some(']') => {
					let mut closing = 0usize;
					while let Some('=') = self.peek() {self.eat(); closing += 1}

					match self.peek() {
						Some(']') if closing == level => {self.eat(); break Ok(string)},
						_ => {
							string.push(']');
							(0..closing).for_each(|_| string.push('='));
						}
					}
				},
				Some(character) => string.push(character)
			}
		}
	}

	fn single(&mut self, token: Token) -> Option<Result<Token>> {
		self.eat();
		Some(Ok(token))
	}
}

/// The main interface to the Lexer.
impl<T> Iterator for Lexer<T>
		where T: Iterator<Item = char> {
	type Item = Result<Lexeme>;

	/// Parses a single token and returns it.
	fn next(&mut self) -> Option<Result<Lexeme>> {
		let character = self.parse_whitespace()?;
		let position = self.position;

		let token = match character {
			// Single character token Minus (-)
			// OR Multiple character Comment (--[[]])
			'-' => match self.peek_second() {
				Some('-') => {self.eat(); self.eat(); Some(self.parse_comment(position))},
				_ => self.single(Token::Minus)
			},

			// Single character token OpenBracket ([)
			// OR Multiple character token String ([[]])
			'[' => match self.peek_second() {
				Some('=' | '[') => {
					self.eat();
					Some(self.parse_bracketed(position).map(Token::String))
				},
				_ => self.single(Token::OpenBracket)
			},

			// Single character token Assign (=)
			// OR Double character token Relational Equal (==)
			'=' => match self.peek_second() {
				Some('=') => {self.eat(); self.single(Token::Equal)},
				_ => self.single(Token::Assign)
			},

			'<' => match self.peek_second() {
				Some('=') => {self.eat(); self.single(Token::LessThanOrEqual)},
				_ => self.single(Token::LessThan)
			},

			'>' => match self.peek_second() {
				Some('=') => {self.eat(); self.single(Token::GreaterThanOrEqual)},
				_ => self.single(Token::GreaterThan)
			},

			// Only valid as part of the relational NotEqual (~=)
			'~' => match self.peek_second() {
				Some('=') => {self.eat(); self.single(Token::NotEqual)},
				_ => Some(Err(Error::UnexpectedCharacter('~', position)))
			},

			// Single character token Period (.)
			// OR Double character token Concat (..)
			// OR a number with no integral part (.5)
			'.' => match self.peek_second() {
				Some('.') => {self.eat(); self.single(Token::Concat)},
				Some('0'..='9') => {
					self.eat();
					let mut number = String::from("0.");
					while let Some('0'..='9') = self.peek()
						{number.push(self.peeked_next())}
					Some(number.parse::<f64>()
						.map(|value| Token::Number(value, false))
						.map_err(|_| Error::MalformedNumber(number.into_boxed_str(), position)))
				},
				_ => self.single(Token::Period)
			},

			// Arithmetic
			'+' => self.single(Token::Add),
			'*' => self.single(Token::Multiply),
			'/' => self.single(Token::Divide),
			'%' => self.single(Token::Modulo),
			'^' => self.single(Token::Exponent),

			// Other
			':' => self.single(Token::Colon),
			',' => self.single(Token::Comma),
			';' => self.single(Token::SemiColon),
			'#' => self.single(Token::Length),

			// Sectioning
			'(' => self.single(Token::OpenParen),
			')' => self.single(Token::CloseParen),
			'{' => self.single(Token::OpenCurly),
			'}' => self.single(Token::CloseCurly),
			']' => self.single(Token::CloseBracket),

			// Literals
			'"' | '\'' => Some(self.parse_string()),
			'0'..='9' => Some(self.parse_number()),
			'a'..='z' | 'A'..='Z' | '_' => Some(Ok(self.parse_identifier())),

			character => Some(Err(Error::UnexpectedCharacter(character, position)))
		};

		token.map(|token| token.map(|token| Lexeme {token, position}))
	}
}

/// A single syntactical unit of source code.
///
/// Represents identifiers, punctuation, and everything in between.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
	/// A comment, line or block. Block comments may span lines.
	Comment(String),

	/// An identifier, excluding keywords.
	Identifier(String),

	/// A number, and whether it was written as an integer.
	Number(f64, bool),

	/// A string, without its delimiters.
	String(String),

	LiteralTrue,
	LiteralFalse,
	LiteralNil,

	// Operators, in the order `+ - * / % ^`, `== ~= < <= > >=`, then `..` and
	// `#`.
	Add,
	Minus,
	Multiply,
	Divide,
	Modulo,
	Exponent,
	Equal,
	NotEqual,
	LessThan,
	LessThanOrEqual,
	GreaterThan,
	GreaterThanOrEqual,
	Concat,
	Length,

	// Punctuation, `= : , . ;`.
	Assign,
	Colon,
	Comma,
	Period,
	SemiColon,

	OpenParen,
	CloseParen,
	OpenCurly,
	CloseCurly,
	OpenBracket,
	CloseBracket,

	// Keywords

	KeywordAnd,
	KeywordBreak,
	KeywordDo,
	KeywordElse,
	KeywordElseIf,
	KeywordEnd,
	KeywordFor,
	KeywordFunction,
	/// Reserved, never accepted by the parser.
	KeywordGoto,
	KeywordIf,
	KeywordIn,
	KeywordLocal,
	KeywordNot,
	KeywordOr,
	/// Reserved, never accepted by the parser.
	KeywordRepeat,
	KeywordReturn,
	KeywordThen,
	/// Reserved, never accepted by the parser.
	KeywordUntil,
	KeywordWhile
}

impl Display for Token {
	fn fmt(&self, f: &mut Formatter<'_>) -> FMTResult {
		match self {
			// Comment
			Self::Comment(comment) => write!(f, "--[===[{}]===]", comment),

			// Literals
			Self::Identifier(identifier) => write!(f, "{}", identifier),
			Self::Number(number, true) => write!(f, "{}", number),
			Self::Number(number, false) => write!(f, "{:?}", number),
			Self::String(string) => write!(f, "{:?}", string),

			// Literal Values
			Self::LiteralTrue => write!(f, "true"),
			Self::LiteralFalse => write!(f, "false"),
			Self::LiteralNil => write!(f, "nil"),

			// Arithmetic
			Self::Add => write!(f, "+"),
			Self::Minus => write!(f, "-"),
			Self::Multiply => write!(f, "*"),
			Self::Divide => write!(f, "/"),
			Self::Modulo => write!(f, "%"),
			Self::Exponent => write!(f, "^"),

			// Relational
			Self::Equal => write!(f, "=="),
			Self::NotEqual => write!(f, "~="),
			Self::LessThan => write!(f, "<"),
			Self::LessThanOrEqual => write!(f, "<="),
			Self::GreaterThan => write!(f, ">"),
			Self::GreaterThanOrEqual => write!(f, ">="),

			// Other
			Self::Assign => write!(f, "="),
			Self::Colon => write!(f, ":"),
			Self::Comma => write!(f, ","),
			Self::Period => write!(f, "."),
			Self::SemiColon => write!(f, ";"),
			Self::Concat => write!(f, ".."),
			Self::Length => write!(f, "#"),

			// Sectioning
			Self::OpenParen => write!(f, "("),
			Self::CloseParen => write!(f, ")"),
			Self::OpenCurly => write!(f, "{{"),
			Self::CloseCurly => write!(f, "}}"),
			Self::OpenBracket => write!(f, "["),
			Self::CloseBracket => write!(f, "]"),

			// Keywords
			Self::KeywordAnd => write!(f, "and"),
			Self::KeywordBreak => write!(f, "break"),
			Self::KeywordDo => write!(f, "do"),
			Self::KeywordElse => write!(f, "else"),
			Self::KeywordElseIf => write!(f, "elseif"),
			Self::KeywordEnd => write!(f, "end"),
			Self::KeywordFor => write!(f, "for"),
			Self::KeywordFunction => write!(f, "function"),
			Self::KeywordGoto => write!(f, "goto"),
			Self::KeywordIf => write!(f, "if"),
			Self::KeywordIn => write!(f, "in"),
			Self::KeywordLocal => write!(f, "local"),
			Self::KeywordNot => write!(f, "not"),
			Self::KeywordOr => write!(f, "or"),
			Self::KeywordRepeat => write!(f, "repeat"),
			Self::KeywordReturn => write!(f, "return"),
			Self::KeywordThen => write!(f, "then"),
			Self::KeywordUntil => write!(f, "until"),
			Self::KeywordWhile => write!(f, "while")
		}
	}
}
