//! Parses tokens into an expression tree.
//!
//! Parsing happens in three passes. Tokens are first mapped to leaf nodes,
//! then brackets are grouped into nested nodes (table constructors, index
//! groups and parenthesized lists), and finally a grammar pass reads
//! statements by keyword and collapses each expression span positionally.
//!
//! Binary operators have no precedence, `1 + 2 * 3` is `(1 + 2) * 3`. Only
//! `or` and `and` are special, they split an expression before anything else
//! does, so `a + 1 or b` is `(a + 1) or b`.
//!
//! Nesting is limited. Brackets, blocks and the operators of an expression all
//! count towards [MAX_NESTING], and source nested any deeper is rejected with
//! [Error::TooDeep].

use self::super::{
	Error as ASTError, Result,
	lexer::{Lexeme, Position, Token, tokenize}
};
use crate::{recursion::ensure_sufficient_stack, vm::value::Value};
use itertools::Itertools;
use std::{
	fmt::{Display, Formatter, Result as FMTResult},
	iter::Peekable,
	mem::{replace, take},
	rc::Rc,
	vec::IntoIter
};
use thiserror::Error;

/// How deeply source may nest.
pub const MAX_NESTING: usize = 200;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
	#[error("{}: unexpected {}", .1, describe(.0))]
	Unexpected(Option<Token>, Position),

	#[error("{1}: '{0}' is never closed")]
	Unbalanced(Token, Position),

	#[error("{1}: unmatched '{0}'")]
	UnmatchedClose(Token, Position),

	#[error("{0}: an index must be exactly one expression")]
	MalformedIndex(Position),

	#[error("{0}: cannot assign to this expression")]
	InvalidAssignmentTarget(Position),

	#[error("{0}: expression is not a statement")]
	NotAStatement(Position),

	#[error("{0}: 'break' outside a loop")]
	BreakOutsideLoop(Position),

	#[error("{0}: too many nested levels")]
	TooDeep(Position)
}

fn describe(token: &Option<Token>) -> String {
	match token {
		Some(token) => format!("'{}'", token),
		None => "end of file".to_owned()
	}
}

/// Parses a chunk of source code, a list of statements.
pub fn parse(source: &str) -> Result<Expression> {
	let mut iter = NodeIterator::new(group_source(source)?, 0);
	let block = parse_block(&mut iter)?;

	match iter.peek() {
		Some(_) => Err(iter.unexpected()),
		None => Ok(Expression::Chunk(block))
	}
}

/// Parses exactly one expression.
pub fn parse_expression(source: &str) -> Result<Expression> {
	let mut iter = NodeIterator::new(group_source(source)?, 0);
	let expression = parse_span(&mut iter)?;

	match iter.peek() {
		Some(_) => Err(iter.unexpected()),
		None => Ok(expression)
	}
}

/// An intermediate parse tree node.
#[derive(Clone, Debug)]
enum Node {
	/// A complete expression.
	Leaf(Expression, Position),

	/// A token which isn't an expression by itself.
	Token(Token, Position),

	/// A table constructor, with its fields.
	Table(Vec<Vec<Node>>, Position),

	/// Everything between a pair of square brackets.
	Index(Vec<Node>, Position),

	/// A parenthesized list.
	Paren(Vec<Vec<Node>>, Position)
}

impl Node {
	fn position(&self) -> Position {
		match self {
			Self::Leaf(_, position) | Self::Token(_, position) |
				Self::Table(_, position) | Self::Index(_, position) |
				Self::Paren(_, position) => *position
		}
	}

	/// The token this node started with, for error reporting.
	fn token(&self) -> Token {
		match self {
			Self::Leaf(Expression::Identifier(name), _) => Token::Identifier(name.clone()),
			Self::Leaf(Expression::Literal(Value::Number(number, integer)), _) =>
				Token::Number(*number, *integer),
			Self::Leaf(Expression::Literal(Value::String(string)), _) =>
				Token::String(string.to_string()),
			Self::Leaf(Expression::Literal(Value::Boolean(true)), _) => Token::LiteralTrue,
			Self::Leaf(Expression::Literal(Value::Boolean(false)), _) => Token::LiteralFalse,
			Self::Leaf(Expression::Comment(comment), _) => Token::Comment(comment.clone()),
			Self::Leaf(Expression::Function {..}, _) => Token::KeywordFunction,
			Self::Leaf(Expression::Table(_), _) | Self::Table(..) => Token::OpenCurly,
			Self::Leaf(..) => Token::LiteralNil,
			Self::Token(token, _) => token.clone(),
			Self::Index(..) => Token::OpenBracket,
			Self::Paren(..) => Token::OpenParen
		}
	}

	/// Whether this node can follow an expression as a call's arguments.
	fn is_arguments(&self) -> bool {
		matches!(self, Self::Paren(..) | Self::Table(..) |
			Self::Leaf(Expression::Literal(Value::String(_)), _))
	}
}

fn unexpected(node: Option<Node>, end: Position) -> ASTError {
	match node {
		Some(node) => Error::Unexpected(Some(node.token()), node.position()).into(),
		None => Error::Unexpected(None, end).into()
	}
}

// Leaf mapping

fn leaf(Lexeme {token, position}: Lexeme) -> Node {
	let expression = match token {
		Token::Number(number, integer) => Expression::Literal(Value::Number(number, integer)),
		Token::String(string) => Expression::Literal(Value::from(string)),
		Token::LiteralTrue => Expression::Literal(Value::Boolean(true)),
		Token::LiteralFalse => Expression::Literal(Value::Boolean(false)),
		Token::LiteralNil => Expression::Literal(Value::Nil),
		Token::Identifier(identifier) => Expression::Identifier(identifier),
		Token::Comment(comment) => Expression::Comment(comment),
		token => return Node::Token(token, position)
	};

	Node::Leaf(expression, position)
}

// Grouping

fn group_source(source: &str) -> Result<Vec<Node>> {
	let leaves = tokenize(source)?.into_iter().map(leaf).collect::<Vec<_>>();
	group(&mut leaves.into_iter(), None, 0)
}

/// Groups nodes up to the token closing `open`, or to the end if there is
/// nothing to close. `depth` is how many brackets are already open.
fn group(iter: &mut IntoIter<Node>, open: Option<(Token, Position)>, depth: usize)
		-> Result<Vec<Node>> {
	if let Some((_, position)) = &open {
		if depth > MAX_NESTING {return Err(Error::TooDeep(*position).into())}
	}

	let mut nodes = Vec::new();

	while let Some(node) = iter.next() {
		match node {
			Node::Token(Token::OpenCurly, position) => {
				let inner = group(iter, Some((Token::OpenCurly, position)), depth + 1)?;
				nodes.push(Node::Table(split(inner, true)?, position))
			},
			Node::Token(Token::OpenBracket, position) => {
				let inner = group(iter, Some((Token::OpenBracket, position)), depth + 1)?;
				nodes.push(Node::Index(inner, position))
			},
			Node::Token(Token::OpenParen, position) => {
				let inner = group(iter, Some((Token::OpenParen, position)), depth + 1)?;
				nodes.push(Node::Paren(split(inner, false)?, position))
			},

			Node::Token(close @ (Token::CloseCurly | Token::CloseBracket |
					Token::CloseParen), position) => return match &open {
				Some((Token::OpenCurly, _)) if close == Token::CloseCurly => Ok(nodes),
				Some((Token::OpenBracket, _)) if close == Token::CloseBracket => Ok(nodes),
				Some((Token::OpenParen, _)) if close == Token::CloseParen => Ok(nodes),
				_ => Err(Error::UnmatchedClose(close, position).into())
			},

			// Comments only matter between statements.
			Node::Leaf(Expression::Comment(_), _) if open.is_some() => (),

			node => nodes.push(node)
		}
	}

	match open {
		Some((token, position)) => Err(Error::Unbalanced(token, position).into()),
		None => Ok(nodes)
	}
}

/// Splits grouped nodes into fields on commas, and on semicolons within
/// tables. Separators inside function bodies don't split anything.
fn split(nodes: Vec<Node>, table: bool) -> Result<Vec<Vec<Node>>> {
	let mut fields = Vec::new();
	let mut field = Vec::new();
	let mut depth = 0usize;

	for node in nodes {
		match node {
			Node::Token(Token::KeywordFunction | Token::KeywordIf |
					Token::KeywordDo, _) => {depth += 1; field.push(node)},
			Node::Token(Token::KeywordEnd, _) => {
				depth = depth.saturating_sub(1);
				field.push(node)
			},

			Node::Token(Token::Comma, position) if depth == 0 =>
				fields.push(non_empty(take(&mut field), Token::Comma, position)?),
			Node::Token(Token::SemiColon, position) if depth == 0 && table =>
				fields.push(non_empty(take(&mut field), Token::SemiColon, position)?),

			node => field.push(node)
		}
	}

	// A trailing separator is fine in a table constructor.
	match (field.is_empty(), fields.is_empty(), table) {
		(true, true, _) | (true, false, true) => Ok(fields),
		(true, false, false) => Err(Error::Unexpected(Some(Token::CloseParen),
			Position::default()).into()),
		(false, ..) => {fields.push(field); Ok(fields)}
	}
}

fn non_empty(field: Vec<Node>, separator: Token, position: Position)
		-> Result<Vec<Node>> {
	match field.is_empty() {
		true => Err(Error::Unexpected(Some(separator), position).into()),
		false => Ok(field)
	}
}

// Grammar

/// A peekable iterator of grouped nodes with helper methods for parsing.
///
/// Comments are skipped by every method but [NodeIterator::comment].
struct NodeIterator {
	nodes: Peekable<IntoIter<Node>>,
	end: Position,
	/// How deeply the nodes being read are nested.
	depth: usize,
	/// How many loops enclose the nodes being read, within the innermost
	/// function.
	loops: usize
}

impl NodeIterator {
	fn new(nodes: Vec<Node>, depth: usize) -> Self {
		let end = nodes.last().map(Node::position).unwrap_or_default();
		Self {nodes: nodes.into_iter().peekable(), end, depth, loops: 0}
	}

	/// Runs `parse` one level deeper, failing if that is too deep.
	fn nested<T, F>(&mut self, parse: F) -> Result<T>
			where F: FnOnce(&mut Self) -> Result<T> {
		let position = self.position();
		self.depth += 1;
		let result = match self.depth > MAX_NESTING {
			true => Err(Error::TooDeep(position).into()),
			false => ensure_sufficient_stack(|| parse(self))
		};
		self.depth -= 1;
		result
	}

	/// Runs `parse` with the loop count given, restoring it afterwards.
	fn with_loops<T, F>(&mut self, loops: usize, parse: F) -> Result<T>
			where F: FnOnce(&mut Self) -> Result<T> {
		let outer = replace(&mut self.loops, loops);
		let result = parse(self);
		self.loops = outer;
		result
	}

	/// Peeks the next node, if any.
	fn peek(&mut self) -> Option<&Node> {
		while let Some(Node::Leaf(Expression::Comment(_), _)) = self.nodes.peek()
			{self.nodes.next();}
		self.nodes.peek()
	}

	/// Peeks the next node, if it is a token.
	fn peek_token(&mut self) -> Option<&Token> {
		match self.peek() {
			Some(Node::Token(token, _)) => Some(token),
			_ => None
		}
	}

	/// Returns the next node, if any.
	fn next(&mut self) -> Option<Node> {
		self.peek();
		self.nodes.next()
	}

	/// Eats a node, disposing of it.
	fn eat(&mut self) {
		drop(self.next())
	}

	/// Returns the next comment, if the next node is one.
	fn comment(&mut self) -> Option<String> {
		match self.nodes.peek() {
			Some(Node::Leaf(Expression::Comment(_), _)) => match self.nodes.next() {
				Some(Node::Leaf(Expression::Comment(comment), _)) => Some(comment),
				_ => None
			},
			_ => None
		}
	}

	/// The position of the next node.
	fn position(&mut self) -> Position {
		let end = self.end;
		self.peek().map_or(end, Node::position)
	}

	/// An error for the next node being unexpected.
	fn unexpected(&mut self) -> ASTError {
		let end = self.end;
		unexpected(self.peek().cloned(), end)
	}

	/// Consumes the next node, which must be the token given.
	fn expect(&mut self, expected: Token) -> Result<()> {
		match self.peek_token() {
			Some(token) if *token == expected => {self.eat(); Ok(())},
			_ => Err(self.unexpected())
		}
	}

	/// Consumes the next node, which must be an identifier.
	fn identifier(&mut self) -> Result<String> {
		match self.peek() {
			Some(Node::Leaf(Expression::Identifier(_), _)) => match self.next() {
				Some(Node::Leaf(Expression::Identifier(identifier), _)) => Ok(identifier),
				_ => unreachable!()
			},
			_ => Err(self.unexpected())
		}
	}
}

/// Parses statements up to the end of input, or to a token ending a block.
fn parse_block(iter: &mut NodeIterator) -> Result<Vec<Expression>> {
	iter.nested(|iter| {
		let mut statements = Vec::new();

		loop {
			while let Some(comment) = iter.comment()
				{statements.push(Expression::Comment(comment))}

			match iter.peek() {
				None | Some(Node::Token(Token::KeywordEnd | Token::KeywordElse |
					Token::KeywordElseIf, _)) => break Ok(statements),
				Some(Node::Token(Token::SemiColon, _)) => iter.eat(),
				Some(_) => statements.push(parse_statement(iter)?)
			}
		}
	})
}

/// Parses the body of a loop.
fn parse_loop_body(iter: &mut NodeIterator) -> Result<Expression> {
	let loops = iter.loops + 1;
	iter.with_loops(loops, parse_body)
}

/// Parses a block and the `end` closing it.
fn parse_body(iter: &mut NodeIterator) -> Result<Expression> {
	let block = parse_block(iter)?;
	iter.expect(Token::KeywordEnd)?;
	Ok(Expression::Chunk(block))
}

fn parse_statement(iter: &mut NodeIterator) -> Result<Expression> {
	let keyword = iter.peek_token().cloned();

	match keyword {
		Some(Token::KeywordLocal) => {iter.eat(); parse_local(iter)},
		Some(Token::KeywordFunction) => {iter.eat(); parse_function_statement(iter)},
		Some(Token::KeywordIf) => {iter.eat(); parse_if(iter)},
		Some(Token::KeywordFor) => {iter.eat(); parse_for(iter)},

		// while condition do ... end
		Some(Token::KeywordWhile) => {
			iter.eat();
			let condition = Box::new(parse_span(iter)?);
			iter.expect(Token::KeywordDo)?;
			let body = Box::new(parse_loop_body(iter)?);
			Ok(Expression::While {condition, body})
		},

		// do ... end
		Some(Token::KeywordDo) => {iter.eat(); parse_body(iter)},

		Some(Token::KeywordReturn) => {
			iter.eat();
			let empty = matches!(iter.peek(), None | Some(Node::Token(Token::KeywordEnd |
				Token::KeywordElse | Token::KeywordElseIf | Token::SemiColon, _)));
			match empty {
				true => Ok(Expression::Return(Vec::new())),
				false => Ok(Expression::Return(parse_list(iter)?))
			}
		},

		Some(Token::KeywordBreak) => {
			let position = iter.position();
			iter.eat();
			match iter.loops {
				0 => Err(Error::BreakOutsideLoop(position).into()),
				_ => Ok(Expression::Break)
			}
		},

		_ => parse_expression_statement(iter)
	}
}

/// Parses what follows `local`.
fn parse_local(iter: &mut NodeIterator) -> Result<Expression> {
	// local function name() ... end
	if let Some(Token::KeywordFunction) = iter.peek_token() {
		iter.eat();
		let name = iter.identifier()?;
		let (parameters, body) = parse_function_body(iter)?;

		return Ok(Expression::Assign {
			targets: vec![Expression::Identifier(name.clone())],
			values: vec![Expression::Function {name: Some(name), parameters, body}],
			local: true
		})
	}

	// local name, name = value, value
	let mut targets = vec![Expression::Identifier(iter.identifier()?)];
	while let Some(Token::Comma) = iter.peek_token()
		{iter.eat(); targets.push(Expression::Identifier(iter.identifier()?))}

	let values = match iter.peek_token() {
		Some(Token::Assign) => {iter.eat(); parse_list(iter)?},
		_ => Vec::new()
	};

	Ok(Expression::Assign {targets, values, local: true})
}

/// Parses what follows `function` in a statement, `a.b.c:d() ... end`.
fn parse_function_statement(iter: &mut NodeIterator) -> Result<Expression> {
	let mut target = Expression::Identifier(iter.identifier()?);
	let mut method = false;

	loop {
		match iter.peek_token() {
			Some(Token::Period) => iter.eat(),
			Some(Token::Colon) if !method => {iter.eat(); method = true},
			_ => break
		}

		target = Expression::Lookup {
			target: Box::new(target),
			key: Box::new(Expression::Literal(Value::from(iter.identifier()?)))
		};
		if method {break}
	}

	let (mut parameters, body) = parse_function_body(iter)?;
	if method {parameters.insert(0, "self".to_owned())}

	Ok(Expression::Assign {
		targets: vec![target],
		values: vec![Expression::Function {name: None, parameters, body}],
		local: false
	})
}

/// Parses a parameter list, a block and the `end` closing it.
fn parse_function_body(iter: &mut NodeIterator)
		-> Result<(Vec<String>, Rc<Expression>)> {
	let parameters = match iter.next() {
		Some(Node::Paren(fields, position)) => fields.into_iter()
			.map(|field| {
				let mut field = field.into_iter();
				match (field.next(), field.next()) {
					(Some(Node::Leaf(Expression::Identifier(parameter), _)), None) =>
						Ok(parameter),
					(_, Some(node)) | (Some(node), None) => Err(unexpected(Some(node), position)),
					(None, None) => Err(unexpected(None, position))
				}
			})
			.collect::<Result<Vec<_>>>()?,
		node => return Err(unexpected(node, iter.end))
	};

	// Loops around a function don't enclose its body.
	let body = iter.with_loops(0, parse_body)?;
	Ok((parameters, Rc::new(body)))
}

/// Parses what follows `if`.
fn parse_if(iter: &mut NodeIterator) -> Result<Expression> {
	let mut branches = Vec::new();

	loop {
		let condition = parse_span(iter)?;
		iter.expect(Token::KeywordThen)?;
		branches.push((condition, Expression::Chunk(parse_block(iter)?)));

		match iter.peek_token() {
			Some(Token::KeywordElseIf) => iter.eat(),
			Some(Token::KeywordElse) => {
				iter.eat();
				let otherwise = Some(Box::new(parse_body(iter)?));
				break Ok(Expression::If {branches, otherwise})
			},
			Some(Token::KeywordEnd) =>
				{iter.eat(); break Ok(Expression::If {branches, otherwise: None})},
			_ => break Err(iter.unexpected())
		}
	}
}

/// Parses what follows `for`, either loop.
fn parse_for(iter: &mut NodeIterator) -> Result<Expression> {
	let variable = iter.identifier()?;

	// for variable = start, limit, step do ... end
	if let Some(Token::Assign) = iter.peek_token() {
		iter.eat();
		let start = Box::new(parse_span(iter)?);
		iter.expect(Token::Comma)?;
		let limit = Box::new(parse_span(iter)?);
		let step = match iter.peek_token() {
			Some(Token::Comma) => {iter.eat(); Some(Box::new(parse_span(iter)?))},
			_ => None
		};
		iter.expect(Token::KeywordDo)?;
		let body = Box::new(parse_loop_body(iter)?);

		return Ok(Expression::NumericFor {variable, start, limit, step, body})
	}

	// for variable, variable in iterator do ... end
	let mut variables = vec![variable];
	while let Some(Token::Comma) = iter.peek_token()
		{iter.eat(); variables.push(iter.identifier()?)}
	iter.expect(Token::KeywordIn)?;
	let iterators = parse_list(iter)?;
	iter.expect(Token::KeywordDo)?;
	let body = Box::new(parse_loop_body(iter)?);

	Ok(Expression::GenericFor {variables, iterators, body})
}

/// Parses a call, or an assignment.
fn parse_expression_statement(iter: &mut NodeIterator) -> Result<Expression> {
	let position = iter.position();
	let targets = parse_list(iter)?;

	match iter.peek_token() {
		Some(Token::Assign) => {
			iter.eat();
			if !targets.iter().all(|target|
					matches!(target, Expression::Identifier(_) | Expression::Lookup {..}))
				{return Err(Error::InvalidAssignmentTarget(position).into())}

			let values = parse_list(iter)?;
			Ok(Expression::Assign {targets, values, local: false})
		},
		_ => match <[Expression; 1]>::try_from(targets) {
			Ok([call @ Expression::Call {..}]) => Ok(call),
			_ => Err(Error::NotAStatement(position).into())
		}
	}
}

/// Parses a comma separated list of expressions.
fn parse_list(iter: &mut NodeIterator) -> Result<Vec<Expression>> {
	let mut expressions = vec![parse_span(iter)?];
	while let Some(Token::Comma) = iter.peek_token()
		{iter.eat(); expressions.push(parse_span(iter)?)}
	Ok(expressions)
}

/// Parses one expression.
fn parse_span(iter: &mut NodeIterator) -> Result<Expression> {
	iter.nested(|iter| {
		let span = carve(iter)?;
		collapse(span, iter.depth)
	})
}

/// Takes the nodes making up the next expression. Operands and operators
/// must alternate, and postfix operations may follow any operand.
fn carve(iter: &mut NodeIterator) -> Result<Vec<Node>> {
	let mut span = Vec::new();
	let mut operand = true;

	loop {
		if operand {
			match iter.peek() {
				Some(Node::Token(Token::Minus | Token::KeywordNot | Token::Length, _)) =>
					span.extend(iter.next()),
				Some(Node::Token(Token::KeywordFunction, _)) => {
					let position = iter.position();
					iter.eat();
					let (parameters, body) = parse_function_body(iter)?;
					span.push(Node::Leaf(
						Expression::Function {name: None, parameters, body}, position));
					operand = false
				},
				Some(Node::Leaf(..) | Node::Table(..) | Node::Paren(..)) =>
					{span.extend(iter.next()); operand = false},
				_ => return Err(iter.unexpected())
			}
		} else {
			match iter.peek() {
				// operand.name
				Some(Node::Token(Token::Period, _)) => {
					span.extend(iter.next());
					match iter.peek() {
						Some(Node::Leaf(Expression::Identifier(_), _)) => span.extend(iter.next()),
						_ => return Err(iter.unexpected())
					}
				},

				// operand:name(arguments)
				Some(Node::Token(Token::Colon, _)) => {
					span.extend(iter.next());
					match iter.peek() {
						Some(Node::Leaf(Expression::Identifier(_), _)) => span.extend(iter.next()),
						_ => return Err(iter.unexpected())
					}
					match iter.peek() {
						Some(node) if node.is_arguments() => span.extend(iter.next()),
						_ => return Err(iter.unexpected())
					}
				},

				// operand[key]
				Some(Node::Index(..)) => span.extend(iter.next()),

				// operand(arguments)
				Some(node) if node.is_arguments() => span.extend(iter.next()),

				Some(Node::Token(token, _)) if is_binary(token) =>
					{span.extend(iter.next()); operand = true},

				_ => break Ok(span)
			}
		}
	}
}

fn is_binary(token: &Token) -> bool {
	BinaryOperator::from_token(token).is_some() ||
		matches!(token, Token::KeywordAnd | Token::KeywordOr)
}

/// Collapses an expression span into a single expression.
///
/// Every operator in the span nests the expression a level deeper, so groups
/// within it are reduced that much deeper than the span itself.
fn collapse(mut nodes: Vec<Node>, depth: usize) -> Result<Expression> {
	let end = nodes.last().map(Node::position).unwrap_or_default();
	let depth = depth + nodes.len() / 2;
	if depth > MAX_NESTING {
		let start = nodes.first().map_or(end, Node::position);
		return Err(Error::TooDeep(start).into())
	}

	// Postfix operations, left to right, restarting after every collapse.
	let mut index = 0;
	while index < nodes.len() {
		if let Node::Table(..) | Node::Paren(..) = nodes[index] {
			let node = nodes.remove(index);
			nodes.insert(index, operand(node, depth)?);
		}

		if let Node::Leaf(..) = nodes[index] {
			let length = postfix_length(&nodes[index..], end)?;
			if length > 0 {
				let removed = nodes.drain(index..index + length).collect::<Vec<_>>();
				nodes.insert(index, postfix(removed, depth)?);
				continue
			}
		}

		index += 1
	}

	// Unary operations, right to left so that they can stack.
	let mut index = nodes.len();
	while index > 0 {
		index -= 1;

		let operator = match &nodes[index] {
			Node::Token(token, _) => UnaryOperator::from_token(token),
			_ => None
		};
		let prefix = index == 0 || matches!(nodes[index - 1], Node::Token(..));

		if let (Some(operator), true) = (operator, prefix) {
			let mut removed = nodes.drain(index..(index + 2).min(nodes.len()))
				.collect::<Vec<_>>().into_iter();
			let position = removed.next().map(|node| node.position()).unwrap_or(end);
			let operand = match removed.next() {
				Some(Node::Leaf(operand, _)) => Box::new(operand),
				node => return Err(unexpected(node, end))
			};

			nodes.insert(index, Node::Leaf(Expression::Unary {operator, operand}, position));
		}
	}

	fold_or(nodes, end)
}

/// Turns a group in operand position into a leaf.
fn operand(node: Node, depth: usize) -> Result<Node> {
	match node {
		Node::Table(fields, position) => Ok(Node::Leaf(table(fields, depth)?, position)),
		Node::Paren(fields, position) => {
			let mut fields = fields.into_iter();
			match (fields.next(), fields.next()) {
				(Some(field), None) => Ok(Node::Leaf(reduce(field, depth)?, position)),
				(None, _) => Err(Error::Unexpected(Some(Token::CloseParen), position).into()),
				(Some(_), Some(_)) => Err(Error::Unexpected(Some(Token::Comma), position).into())
			}
		},
		node => Ok(node)
	}
}

/// How many nodes, counting the operand itself, make up the postfix
/// operation at the start of `nodes`. Zero if there isn't one.
fn postfix_length(nodes: &[Node], end: Position) -> Result<usize> {
	Ok(match (nodes.get(1), nodes.get(2), nodes.get(3)) {
		(Some(Node::Token(Token::Period, _)),
			Some(Node::Leaf(Expression::Identifier(_), _)), _) => 3,
		(Some(Node::Token(Token::Colon, _)),
			Some(Node::Leaf(Expression::Identifier(_), _)), Some(arguments))
				if arguments.is_arguments() => 4,
		(Some(Node::Token(Token::Period | Token::Colon, _)), node, _) =>
			return Err(unexpected(node.cloned(), end)),
		(Some(Node::Index(..)), ..) => 2,
		(Some(arguments), ..) if arguments.is_arguments() => 2,
		_ => 0
	})
}

/// Collapses a postfix operation, as measured by [postfix_length].
fn postfix(nodes: Vec<Node>, depth: usize) -> Result<Node> {
	let mut nodes = nodes.into_iter();
	let (target, position) = match nodes.next() {
		Some(Node::Leaf(target, position)) => (Box::new(target), position),
		_ => unreachable!("postfix operations always start with an operand")
	};

	let expression = match (nodes.next(), nodes.next(), nodes.next()) {
		// target.name
		(Some(Node::Token(Token::Period, _)),
				Some(Node::Leaf(Expression::Identifier(name), _)), None) =>
			Expression::Lookup {target, key: Box::new(Expression::Literal(Value::from(name)))},

		// target:name(arguments)
		(Some(Node::Token(Token::Colon, _)),
				Some(Node::Leaf(Expression::Identifier(method), _)), Some(arguments)) =>
			Expression::Call {
				function: target,
				method: Some(method),
				arguments: call_arguments(arguments, depth)?,
				position
			},

		// target[key]
		(Some(Node::Index(inner, index_position)), None, None) =>
			Expression::Lookup {target, key: Box::new(index(inner, index_position, depth)?)},

		// target(arguments)
		(Some(arguments), None, None) => Expression::Call {
			function: target,
			method: None,
			arguments: call_arguments(arguments, depth)?,
			position
		},

		_ => unreachable!("postfix operations are measured first")
	};

	Ok(Node::Leaf(expression, position))
}

fn call_arguments(node: Node, depth: usize) -> Result<Vec<Expression>> {
	match node {
		Node::Paren(fields, _) => fields.into_iter().map(|field| reduce(field, depth)).collect(),
		Node::Table(fields, _) => Ok(vec![table(fields, depth)?]),
		Node::Leaf(argument, _) => Ok(vec![argument]),
		node => Err(unexpected(Some(node), Position::default()))
	}
}

/// Reduces the contents of a pair of square brackets into its key.
fn index(inner: Vec<Node>, position: Position, depth: usize) -> Result<Expression> {
	if inner.is_empty() {return Err(Error::MalformedIndex(position).into())}

	let mut iter = NodeIterator::new(inner, depth);
	let key = parse_span(&mut iter)?;
	match iter.peek() {
		Some(_) => Err(Error::MalformedIndex(position).into()),
		None => Ok(key)
	}
}

/// Reduces a field of a group into the one expression it must be.
fn reduce(field: Vec<Node>, depth: usize) -> Result<Expression> {
	let mut iter = NodeIterator::new(field, depth);
	let expression = parse_span(&mut iter)?;
	match iter.peek() {
		Some(_) => Err(iter.unexpected()),
		None => Ok(expression)
	}
}

/// Reduces table constructor fields. Keyed fields become assignments.
fn table(fields: Vec<Vec<Node>>, depth: usize) -> Result<Expression> {
	let fields = fields.into_iter()
		.map(|field| {
			let keyed = matches!(field.as_slice(),
				[Node::Leaf(Expression::Identifier(_), _) | Node::Index(..),
					Node::Token(Token::Assign, _), ..]);
			if !keyed {return reduce(field, depth)}

			let mut field = field.into_iter();
			let target = match field.next() {
				Some(Node::Leaf(Expression::Identifier(name), _)) => Expression::Identifier(name),
				Some(Node::Index(inner, position)) =>
					Expression::Index(Box::new(index(inner, position, depth)?)),
				_ => unreachable!()
			};
			drop(field.next());

			Ok(Expression::Assign {
				targets: vec![target],
				values: vec![reduce(field.collect(), depth)?],
				local: false
			})
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(Expression::Table(fields))
}

fn fold_or(nodes: Vec<Node>, end: Position) -> Result<Expression> {
	fold_logical(nodes, end, Token::KeywordOr, LogicalOperator::Or, fold_and)
}

fn fold_and(nodes: Vec<Node>, end: Position) -> Result<Expression> {
	fold_logical(nodes, end, Token::KeywordAnd, LogicalOperator::And, fold_binary)
}

/// Splits nodes on a logical operator, folding each side with `next`.
fn fold_logical(nodes: Vec<Node>, end: Position, separator: Token,
		operator: LogicalOperator, next: fn(Vec<Node>, Position) -> Result<Expression>)
		-> Result<Expression> {
	let mut segments = Vec::new();
	let mut segment = Vec::new();
	let mut last = end;

	for node in nodes {
		match node {
			Node::Token(token, position) if token == separator => {
				segments.push((take(&mut segment), position));
				last = position
			},
			node => segment.push(node)
		}
	}
	segments.push((segment, last));

	let mut segments = segments.into_iter().map(|(segment, position)| {
		match segment.is_empty() {
			true => Err(Error::Unexpected(Some(separator.clone()), position).into()),
			false => next(segment, end)
		}
	});

	let mut expression = match segments.next() {
		Some(expression) => expression?,
		None => return Err(Error::Unexpected(None, end).into())
	};
	for right in segments {
		expression = Expression::Logical {
			left: Box::new(expression),
			operator,
			right: Box::new(right?)
		}
	}

	Ok(expression)
}

/// Folds alternating operands and binary operators, left to right.
fn fold_binary(nodes: Vec<Node>, end: Position) -> Result<Expression> {
	let mut nodes = nodes.into_iter();
	let mut expression = match nodes.next() {
		Some(Node::Leaf(expression, _)) => expression,
		node => return Err(unexpected(node, end))
	};

	loop {
		let (operator, position) = match nodes.next() {
			None => break Ok(expression),
			Some(Node::Token(token, position)) => match BinaryOperator::from_token(&token) {
				Some(operator) => (operator, position),
				None => break Err(Error::Unexpected(Some(token), position).into())
			},
			node => break Err(unexpected(node, end))
		};

		let right = match nodes.next() {
			Some(Node::Leaf(right, _)) => right,
			Some(node) => break Err(unexpected(Some(node), end)),
			None => break Err(Error::Unexpected(None, position).into())
		};

		expression = Expression::Binary {
			left: Box::new(expression),
			operator,
			right: Box::new(right)
		}
	}
}

/// A node of the expression tree. Statements are expressions too.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
	// Leaves

	/// A literal nil, boolean, number or string.
	Literal(Value),

	/// A reference to a variable, local or global.
	Identifier(String),

	/// A bracketed key, only found as the target of a keyed table constructor
	/// field.
	Index(Box<Expression>),

	/// A table constructor. Keyed fields are [Expression::Assign]s whose target
	/// is either an [Expression::Identifier] or an [Expression::Index], every
	/// other field is positional.
	Table(Vec<Expression>),

	// Operations

	/// Indexing, `target.key` or `target[key]`.
	Lookup {
		target: Box<Expression>,
		key: Box<Expression>
	},

	Binary {
		left: Box<Expression>,
		operator: BinaryOperator,
		right: Box<Expression>
	},

	Unary {
		operator: UnaryOperator,
		operand: Box<Expression>
	},

	/// A short circuiting `and` or `or`.
	Logical {
		left: Box<Expression>,
		operator: LogicalOperator,
		right: Box<Expression>
	},

	/// A call, or a method call when `method` is set.
	Call {
		function: Box<Expression>,
		method: Option<String>,
		arguments: Vec<Expression>,
		position: Position
	},

	/// A function literal.
	Function {
		/// The name the function is bound to within itself, for local functions.
		name: Option<String>,
		parameters: Vec<String>,
		/// Always an [Expression::Chunk].
		body: Rc<Expression>
	},

	// Statements

	/// An assignment to one or more targets.
	Assign {
		targets: Vec<Expression>,
		values: Vec<Expression>,
		local: bool
	},

	/// A list of statements, with its own scope.
	Chunk(Vec<Expression>),

	If {
		/// Each condition, and the chunk to run if it is met.
		branches: Vec<(Expression, Expression)>,
		otherwise: Option<Box<Expression>>
	},

	While {
		condition: Box<Expression>,
		body: Box<Expression>
	},

	NumericFor {
		variable: String,
		start: Box<Expression>,
		limit: Box<Expression>,
		step: Option<Box<Expression>>,
		body: Box<Expression>
	},

	GenericFor {
		variables: Vec<String>,
		iterators: Vec<Expression>,
		body: Box<Expression>
	},

	Break,
	Return(Vec<Expression>),
	NoOp,
	Comment(String)
}

/// Displays an expression, wrapped in parenthesis if needed.
struct Grouped<'e>(&'e Expression, bool);

impl Display for Grouped<'_> {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self.1 {
			true => write!(f, "({})", self.0),
			false => write!(f, "{}", self.0)
		}
	}
}

/// Whether an expression can be indexed or called without parenthesis.
fn is_prefix(expression: &Expression) -> bool {
	matches!(expression, Expression::Identifier(_) | Expression::Lookup {..} |
		Expression::Call {..})
}

fn is_name(name: &str) -> bool {
	matches!(tokenize(name).as_deref(), Ok([Lexeme {token: Token::Identifier(_), ..}]))
}

fn fmt_statements(f: &mut Formatter, statements: &[Expression]) -> FMTResult {
	statements.iter().try_for_each(|statement| match statement {
		Expression::Chunk(_) => writeln!(f, "do\n{}end", statement),
		statement => writeln!(f, "{}", statement)
	})
}

impl Display for Expression {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			// Leaves

			Self::Literal(Value::String(string)) => write!(f, "{:?}", string),
			Self::Literal(value) => write!(f, "{}", value),
			Self::Identifier(identifier) => write!(f, "{}", identifier),
			Self::Index(key) => write!(f, "[{}]", key),
			Self::Table(fields) => write!(f, "{{{}}}", fields.iter().join(", ")),

			// Operations

			Self::Lookup {target, key} => match &**key {
				Self::Literal(Value::String(name)) if is_name(name) =>
					write!(f, "{}.{}", Grouped(target, !is_prefix(target)), name),
				key => write!(f, "{}[{}]", Grouped(target, !is_prefix(target)), key)
			},

			Self::Binary {left, operator, right} => write!(f, "{} {} {}",
				Grouped(left, matches!(**left, Self::Logical {..})),
				operator,
				Grouped(right, matches!(**right, Self::Binary {..} | Self::Logical {..}))),

			Self::Unary {operator, operand} => write!(f, "{}{}", operator,
				Grouped(operand, matches!(**operand, Self::Binary {..} |
					Self::Logical {..} | Self::Unary {..}))),

			Self::Logical {left, operator, right} => write!(f, "{} {} {}",
				Grouped(left, matches!((operator, &**left), (LogicalOperator::And,
					Self::Logical {operator: LogicalOperator::Or, ..}))),
				operator,
				Grouped(right, matches!(**right, Self::Logical {..}))),

			Self::Call {function, method, arguments, ..} => {
				write!(f, "{}", Grouped(function, !is_prefix(function)))?;
				if let Some(method) = method {write!(f, ":{}", method)?}
				write!(f, "({})", arguments.iter().join(", "))
			},

			Self::Function {parameters, body, ..} =>
				write!(f, "function({})\n{}end", parameters.join(", "), body),

			// Statements

			Self::Assign {targets, values, local: true} => match (&targets[..], &values[..]) {
				([Self::Identifier(name)], [Self::Function {name: Some(_), parameters, body}]) =>
					write!(f, "local function {}({})\n{}end", name, parameters.join(", "), body),
				(targets, []) => write!(f, "local {}", targets.iter().join(", ")),
				(targets, values) => write!(f, "local {} = {}", targets.iter().join(", "),
					values.iter().join(", "))
			},
			Self::Assign {targets, values, local: false} =>
				write!(f, "{} = {}", targets.iter().join(", "), values.iter().join(", ")),

			Self::Chunk(statements) => fmt_statements(f, statements),

			Self::If {branches, otherwise} => {
				branches.iter().enumerate().try_for_each(|(index, (condition, body))| {
					let keyword = if index == 0 {"if"} else {"elseif"};
					write!(f, "{} {} then\n{}", keyword, condition, body)
				})?;
				if let Some(otherwise) = otherwise {write!(f, "else\n{}", otherwise)?}
				write!(f, "end")
			},

			Self::While {condition, body} => write!(f, "while {} do\n{}end", condition, body),

			Self::NumericFor {variable, start, limit, step: Some(step), body} =>
				write!(f, "for {} = {}, {}, {} do\n{}end", variable, start, limit, step, body),
			Self::NumericFor {variable, start, limit, step: None, body} =>
				write!(f, "for {} = {}, {} do\n{}end", variable, start, limit, body),

			Self::GenericFor {variables, iterators, body} =>
				write!(f, "for {} in {} do\n{}end", variables.join(", "),
					iterators.iter().join(", "), body),

			Self::Break => write!(f, "break"),
			Self::Return(values) if values.is_empty() => write!(f, "return"),
			Self::Return(values) => write!(f, "return {}", values.iter().join(", ")),
			Self::NoOp => Ok(()),
			Self::Comment(comment) if comment.contains('\n') =>
				write!(f, "--[==[{}]==]", comment),
			Self::Comment(comment) => write!(f, "--{}", comment)
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOperator {
	// Arithmetic
	Add,
	Subtract,
	Multiply,
	Divide,
	Modulo,
	Exponent,

	// Relational
	Equal,
	NotEqual,
	LessThan,
	LessThanOrEqual,
	GreaterThan,
	GreaterThanOrEqual,

	// Other
	Concat
}

impl BinaryOperator {
	pub fn from_token(token: &Token) -> Option<Self> {
		Some(match token {
			Token::Add => Self::Add,
			Token::Minus => Self::Subtract,
			Token::Multiply => Self::Multiply,
			Token::Divide => Self::Divide,
			Token::Modulo => Self::Modulo,
			Token::Exponent => Self::Exponent,
			Token::Equal => Self::Equal,
			Token::NotEqual => Self::NotEqual,
			Token::LessThan => Self::LessThan,
			Token::LessThanOrEqual => Self::LessThanOrEqual,
			Token::GreaterThan => Self::GreaterThan,
			Token::GreaterThanOrEqual => Self::GreaterThanOrEqual,
			Token::Concat => Self::Concat,
			_ => return None
		})
	}

	/// The name of the metamethod overriding this operator.
	pub fn metamethod(self) -> Option<&'static str> {
		Some(match self {
			Self::Add => "__add",
			Self::Subtract => "__sub",
			Self::Multiply => "__mul",
			Self::Divide => "__div",
			Self::Modulo => "__mod",
			Self::Exponent => "__pow",
			Self::Concat => "__concat",
			Self::Equal | Self::NotEqual => "__eq",
			Self::LessThan | Self::GreaterThan => "__lt",
			Self::LessThanOrEqual | Self::GreaterThanOrEqual => "__le"
		})
	}
}

impl Display for BinaryOperator {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			// Arithmetic
			Self::Add => write!(f, "+"),
			Self::Subtract => write!(f, "-"),
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
			Self::Concat => write!(f, "..")
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOperator {
	Negate,
	Not,
	Length
}

impl UnaryOperator {
	pub fn from_token(token: &Token) -> Option<Self> {
		match token {
			Token::Minus => Some(Self::Negate),
			Token::KeywordNot => Some(Self::Not),
			Token::Length => Some(Self::Length),
			_ => None
		}
	}
}

impl Display for UnaryOperator {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Negate => write!(f, "-"),
			Self::Not => write!(f, "not "),
			Self::Length => write!(f, "#")
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicalOperator {
	And,
	Or
}

impl Display for LogicalOperator {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::And => write!(f, "and"),
			Self::Or => write!(f, "or")
		}
	}
}
