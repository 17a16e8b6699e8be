use self::super::{
	Error,
	lexer::{Error as LexerError, Lexer, Position, Token, tokenize},
	parser::{
		BinaryOperator, Error as ParserError, Expression, LogicalOperator,
		UnaryOperator, parse, parse_expression
	}
};
use crate::vm::value::Value;
use itertools::assert_equal;

fn tokens(source: &str) -> Vec<Token> {
	tokenize(source).unwrap().into_iter().map(|lexeme| lexeme.token).collect()
}

fn identifier(name: &str) -> Box<Expression> {
	Box::new(Expression::Identifier(name.to_owned()))
}

fn number(number: i64) -> Box<Expression> {
	Box::new(Expression::Literal(Value::from(number)))
}

/// If whitespace is parsed once, the next character might change, but doing it
/// again shouldn't change it.
#[test]
fn parse_whitespace_multiple() {
	let mut lexer = Lexer::new("   hello_there".chars());

	let end = lexer.parse_whitespace();
	assert_eq!(lexer.peek(), end);
	assert_eq!(lexer.parse_whitespace(), end);
	assert_eq!(lexer.next(), end);
}

#[test]
fn positions_track_lines() {
	let lexemes = tokenize("local x\n  = 1").unwrap();

	assert_equal(lexemes.iter().map(|lexeme| lexeme.position), vec![
		Position {line: 1, column: 1},
		Position {line: 1, column: 7},
		Position {line: 2, column: 3},
		Position {line: 2, column: 5}
	]);
}

#[test]
fn operators() {
	assert_equal(tokens("- -- comment\n= == ~= <= >= < > .. . # [ ]"), vec![
		Token::Minus, Token::Comment(" comment".to_owned()), Token::Assign,
		Token::Equal, Token::NotEqual, Token::LessThanOrEqual,
		Token::GreaterThanOrEqual, Token::LessThan, Token::GreaterThan,
		Token::Concat, Token::Period, Token::Length, Token::OpenBracket,
		Token::CloseBracket
	]);
}

#[test]
fn numbers() {
	assert_equal(tokens("1 2.5 0xff 1e3 .5 3..4"), vec![
		Token::Number(1.0, true), Token::Number(2.5, false),
		Token::Number(255.0, true), Token::Number(1000.0, false),
		Token::Number(0.5, false), Token::Number(3.0, true), Token::Concat,
		Token::Number(4.0, true)
	]);
}

#[test]
fn malformed_numbers() {
	assert!(matches!(tokenize("3.4.5"), Err(LexerError::MalformedNumber(..))));
	assert!(matches!(tokenize("12abc"), Err(LexerError::MalformedNumber(..))));
}

#[test]
fn strings() {
	assert_equal(tokens(r#"'a\tb' "q\"" "\65\066" [[long
string]] [==[with ]] inside]==]"#), vec![
		Token::String("a\tb".to_owned()),
		Token::String("q\"".to_owned()),
		Token::String("AB".to_owned()),
		Token::String("long\nstring".to_owned()),
		Token::String("with ]] inside".to_owned())
	]);
}

#[test]
fn string_errors() {
	assert_eq!(tokenize("'open"),
		Err(LexerError::UnterminatedString(Position {line: 1, column: 1})));
	assert!(matches!(tokenize(r"'\q'"), Err(LexerError::IllegalEscapeCode('q', _))));
	assert!(matches!(tokenize("x ~ y"), Err(LexerError::UnexpectedCharacter('~', _))));
}

#[test]
fn long_comments() {
	assert_equal(tokens("--[[ one\ntwo ]] x"), vec![
		Token::Comment(" one\ntwo ".to_owned()),
		Token::Identifier("x".to_owned())
	]);
}

#[test]
fn keywords() {
	assert_equal(tokens("while x do break end goto"), vec![
		Token::KeywordWhile, Token::Identifier("x".to_owned()), Token::KeywordDo,
		Token::KeywordBreak, Token::KeywordEnd, Token::KeywordGoto
	]);
}

#[test]
fn flat_precedence() {
	assert_eq!(parse_expression("1 + 2 * 3"), Ok(Expression::Binary {
		left: Box::new(Expression::Binary {
			left: number(1),
			operator: BinaryOperator::Add,
			right: number(2)
		}),
		operator: BinaryOperator::Multiply,
		right: number(3)
	}));
}

#[test]
fn logical_operators_split_first() {
	assert_eq!(parse_expression("a == 1 or b and c"), Ok(Expression::Logical {
		left: Box::new(Expression::Binary {
			left: identifier("a"),
			operator: BinaryOperator::Equal,
			right: number(1)
		}),
		operator: LogicalOperator::Or,
		right: Box::new(Expression::Logical {
			left: identifier("b"),
			operator: LogicalOperator::And,
			right: identifier("c")
		})
	}));
}

#[test]
fn unary_binds_tightest() {
	assert_eq!(parse_expression("-a - -b"), Ok(Expression::Binary {
		left: Box::new(Expression::Unary {operator: UnaryOperator::Negate, operand: identifier("a")}),
		operator: BinaryOperator::Subtract,
		right: Box::new(Expression::Unary {operator: UnaryOperator::Negate, operand: identifier("b")})
	}));

	assert_eq!(parse_expression("not #t"), Ok(Expression::Unary {
		operator: UnaryOperator::Not,
		operand: Box::new(Expression::Unary {operator: UnaryOperator::Length, operand: identifier("t")})
	}));
}

#[test]
fn parenthesis_group() {
	assert_eq!(parse_expression("1 + (2 * 3)"), Ok(Expression::Binary {
		left: number(1),
		operator: BinaryOperator::Add,
		right: Box::new(Expression::Binary {
			left: number(2),
			operator: BinaryOperator::Multiply,
			right: number(3)
		})
	}));
}

#[test]
fn postfix_chains() {
	let parsed = parse_expression("a.b[1]:c(2)(\"s\")").unwrap();

	assert_eq!(parsed.to_string(), "a.b[1]:c(2)(\"s\")");
	match parsed {
		Expression::Call {function, method: None, arguments, ..} => {
			assert_eq!(arguments, vec![Expression::Literal(Value::from("s"))]);
			assert!(matches!(*function, Expression::Call {method: Some(ref method), ..}
				if method == "c"));
		},
		other => panic!("expected a call, got {:?}", other)
	}
}

#[test]
fn call_sugar() {
	assert_eq!(parse_expression("f \"x\""), parse_expression("f(\"x\")"));
	assert_eq!(parse_expression("f {1}"), parse_expression("f({1})"));
}

#[test]
fn table_constructor() {
	assert_eq!(parse_expression("{1, x = 2; [3] = 4,}"), Ok(Expression::Table(vec![
		Expression::Literal(Value::from(1)),
		Expression::Assign {
			targets: vec![Expression::Identifier("x".to_owned())],
			values: vec![Expression::Literal(Value::from(2))],
			local: false
		},
		Expression::Assign {
			targets: vec![Expression::Index(number(3))],
			values: vec![Expression::Literal(Value::from(4))],
			local: false
		}
	])));
}

#[test]
fn functions_inside_groups() {
	let parsed = parse("pcall(function() local a, b = 1, 2; return a end, 3)").unwrap();

	match parsed {
		Expression::Chunk(statements) => match &statements[..] {
			[Expression::Call {arguments, ..}] => assert_eq!(arguments.len(), 2),
			other => panic!("expected one call, got {:?}", other)
		},
		other => panic!("expected a chunk, got {:?}", other)
	}
}

#[test]
fn statements() {
	let source = "\
local x, y = 1
function t.a.b:m(p) return self end
if x then y = 2 elseif y then y = 3 else y = 4 end
while x do break end
for i = 1, 10, 2 do end
for k, v in pairs(t) do end
do local z end
";

	match parse(source) {
		Ok(Expression::Chunk(statements)) => {
			assert_eq!(statements.len(), 7);
			assert!(matches!(&statements[0], Expression::Assign {local: true, targets, values}
				if targets.len() == 2 && values.len() == 1));
			assert!(matches!(&statements[1], Expression::Assign {values, ..}
				if matches!(&values[0], Expression::Function {parameters, ..}
					if parameters == &["self", "p"])));
			assert!(matches!(&statements[2], Expression::If {branches, otherwise: Some(_)}
				if branches.len() == 2));
			assert!(matches!(&statements[3], Expression::While {..}));
			assert!(matches!(&statements[4], Expression::NumericFor {step: Some(_), ..}));
			assert!(matches!(&statements[5], Expression::GenericFor {variables, ..}
				if variables.len() == 2));
			assert!(matches!(&statements[6], Expression::Chunk(_)));
		},
		other => panic!("expected a chunk, got {:?}", other)
	}
}

#[test]
fn local_function_names_itself() {
	let parsed = parse("local function f(n) return f end").unwrap();

	assert!(matches!(parsed, Expression::Chunk(ref statements)
		if matches!(&statements[..], [Expression::Assign {local: true, values, ..}]
			if matches!(&values[0], Expression::Function {name: Some(name), ..} if name == "f"))));
}

#[test]
fn comments_are_kept_between_statements() {
	let parsed = parse("-- hello\nx = {1, -- inside\n2}").unwrap();

	assert!(matches!(parsed, Expression::Chunk(ref statements)
		if statements.len() == 2 && statements[0] == Expression::Comment(" hello".to_owned())));
}

#[test]
fn unbalanced_brackets() {
	assert!(matches!(parse("x = (1"),
		Err(Error::Parser(ParserError::Unbalanced(Token::OpenParen, _)))));
	assert!(matches!(parse("x = 1)"),
		Err(Error::Parser(ParserError::UnmatchedClose(Token::CloseParen, _)))));
	assert!(matches!(parse("x = {1]"),
		Err(Error::Parser(ParserError::UnmatchedClose(Token::CloseBracket, _)))));
}

#[test]
fn nesting_is_limited() {
	let nested = |open: &str, inner: &str, close: &str, count: usize|
		format!("{}{}{}", open.repeat(count), inner, close.repeat(count));

	assert!(parse(&format!("x = {}", nested("{", "1", "}", 100))).is_ok());
	assert!(parse(&format!("return {}", nested("(", "1", ")", 100))).is_ok());
	assert!(parse(&nested("do ", "x = 1", " end", 100)).is_ok());

	let too_deep = |source: String|
		matches!(parse(&source), Err(Error::Parser(ParserError::TooDeep(_))));
	assert!(too_deep(format!("x = {}", nested("{", "1", "}", 600))));
	assert!(too_deep(format!("return {}", nested("(", "1", ")", 200_000))));
	assert!(too_deep(format!("return {}1", "1 + ".repeat(1000))));
	assert!(too_deep(format!("return {}1", "-".repeat(1000))));
	assert!(too_deep(nested("do ", "x = 1", " end", 300)));
	assert!(too_deep(format!("x = {}", nested("f(", "1", ")", 300))));
}

#[test]
fn break_needs_a_loop() {
	let outside = |source: &str|
		matches!(parse(source), Err(Error::Parser(ParserError::BreakOutsideLoop(_))));
	assert!(outside("break"));
	assert!(outside("if x then break end"));
	assert!(outside("do break end"));
	assert!(outside("while x do local f = function() break end end"));
	assert!(outside("for i = 1, 2 do g = function() if i then break end end end"));

	assert!(parse("while x do break end").is_ok());
	assert!(parse("for i = 1, 2 do if i then break end end").is_ok());
	assert!(parse("for k, v in pairs(t) do do break end end").is_ok());
	assert!(parse("while x do f(function() for k in pairs(t) do break end end) end").is_ok());
}

#[test]
fn malformed_statements() {
	assert!(matches!(parse("1 + 2"), Err(Error::Parser(ParserError::NotAStatement(_)))));
	assert!(matches!(parse("f() = 1"),
		Err(Error::Parser(ParserError::InvalidAssignmentTarget(_)))));
	assert!(matches!(parse("x = t[]"), Err(Error::Parser(ParserError::MalformedIndex(_)))));
	assert!(matches!(parse("x = t[1, 2]"), Err(Error::Parser(ParserError::MalformedIndex(_)))));
	assert!(matches!(parse("repeat until x"),
		Err(Error::Parser(ParserError::Unexpected(Some(Token::KeywordRepeat), _)))));
	assert!(matches!(parse("x ="), Err(Error::Parser(ParserError::Unexpected(None, _)))));
	assert!(matches!(parse("x = 1 +"), Err(Error::Parser(ParserError::Unexpected(None, _)))));
	assert!(matches!(parse("end"),
		Err(Error::Parser(ParserError::Unexpected(Some(Token::KeywordEnd), _)))));
}

#[test]
fn lexer_errors_surface() {
	assert!(matches!(parse("x = 'open"), Err(Error::Lexer(LexerError::UnterminatedString(_)))));
}

#[test]
fn display_reparses() {
	let source = "\
local t = {1, 2, name = \"x\", [\"key\"] = 3}
function t.f(a, b)
return a + (b * 2), -(-a), not a or b and a
end
for i = 1, #t do
print(t[i] .. \"!\")
end
";
	let rendered = parse(source).unwrap().to_string();

	assert!(rendered.contains("a + (b * 2), -(-a), not a or (b and a)"));
	assert_eq!(parse(&rendered).unwrap().to_string(), rendered);
}
