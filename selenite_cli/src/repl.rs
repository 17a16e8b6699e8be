use self::super::handle_io;
use selenite::{
	ast::{Error as SyntaxError, parser::Error as ParserError},
	vm::{Error, State, value::Value}
};
use std::io::{BufRead, Write, stdin, stdout};

/// Whether a syntax error could be fixed by reading more lines.
fn incomplete(error: &Error) -> bool {
	matches!(error, Error::Syntax(SyntaxError::Parser(
		ParserError::Unexpected(None, _) | ParserError::Unbalanced(..))))
}

/// Reads a line, returning None at the end of input.
fn read_line(continuation: bool) -> Option<String> {
	let stdin = stdin();
	let stdout = stdout();
	let mut stdin = stdin.lock();
	let mut stdout = stdout.lock();

	let prompt: &[u8] = if continuation {b">> "} else {b"> "};
	handle_io(stdout.write_all(prompt));
	handle_io(stdout.flush());

	let mut line = String::with_capacity(80);
	match handle_io(stdin.read_line(&mut line)) {
		0 => None,
		_ => Some(line)
	}
}

/// Runs an interactive prompt. Input is tried as an expression first, whose
/// value is printed, then as a chunk.
pub fn repl(mut state: State) {
	loop {
		let mut code = String::new();

		let result = loop {
			match read_line(!code.is_empty()) {
				Some(line) => code.push_str(&line),
				None => return
			}
			if code.trim().is_empty() {code.clear(); continue}

			let result = match state.evaluate(&code) {
				Err(Error::Syntax(_)) => state.do_string(&code),
				other => other
			};

			match result {
				Err(ref error) if incomplete(error) => (),
				other => break other
			}
		};

		match (result, state.take_last_error()) {
			(Err(error), _) => eprintln!("{}", error),
			(Ok(_), Some(error)) => {
				eprintln!("runtime error: {}", error);
				if !error.trace.is_empty() {eprintln!("{}", error.traceback())}
			},
			(Ok(Value::Nil), None) => (),
			(Ok(value), None) => println!("{}", value)
		}
	}
}
