mod arguments;
mod repl;

use self::{
	arguments::{HELP, Arguments, ExecutionType, Settings},
	repl::repl
};
use selenite::{
	ast::{Error as SyntaxError, lexer::tokenize, parser::parse},
	vm::{CaptureMode, Error, Options, State}
};
use std::{io::Error as IOError, process::exit};
use tracing::debug;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

pub static VERSION: &str = "Selenite 0.1.0";

fn main() {
	let arguments = match Arguments::from_env() {
		Ok(arguments) => arguments,
		Err(error) => {
			eprintln!("argument error: {}\n\n{}", error, HELP);
			exit(2)
		}
	};

	match arguments {
		Arguments::ShowHelp => eprintln!("{}", HELP),
		Arguments::ShowVersion => eprintln!("{}", VERSION),
		Arguments::Run {source, execution, settings} => {
			init_logging(&settings);
			let code = source.map(|source| handle_io(String::try_from(source)));

			match (code, execution) {
				(Some(code), ExecutionType::Run) => drop(run_code(&code, &settings)),
				(Some(code), ExecutionType::RunInteractively) =>
					repl(run_code(&code, &settings)),
				(None, _) => repl(init_state(&settings)),
				(Some(code), ExecutionType::ShowSyntaxTree) => show_syntax_tree(&code),
				(Some(code), ExecutionType::ShowTokens) => show_tokens(&code)
			}
		}
	}
}

fn init_logging(settings: &Settings) {
	let filter = match settings.verbose {
		true => EnvFilter::from_default_env().add_directive(LevelFilter::DEBUG.into()),
		false => EnvFilter::from_default_env()
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

fn init_state(settings: &Settings) -> State {
	let defaults = Options::default();
	let options = Options {
		max_depth: settings.max_depth.unwrap_or(defaults.max_depth),
		capture: match settings.shared_upvalues {
			true => CaptureMode::Shared,
			false => CaptureMode::Snapshot
		},
		..defaults
	};

	debug!(?options, "creating state");
	State::with_options(options)
}

fn handle_io<T>(result: Result<T, IOError>) -> T {
	match result {
		Ok(value) => value,
		Err(error) => {
			eprintln!("io error: {}", error);
			exit(3);
		}
	}
}

fn syntax_error(error: SyntaxError) -> ! {
	eprintln!("syntax error: {}", error);
	exit(2);
}

/// Runs code in a fresh state, exiting on any error.
fn run_code(code: &str, settings: &Settings) -> State {
	let mut state = init_state(settings);

	match state.do_string(code) {
		Ok(_) => if let Some(error) = state.last_error() {
			eprintln!("runtime error: {}", error);
			if !error.trace.is_empty() {eprintln!("{}", error.traceback())}
			exit(1);
		},
		Err(Error::Syntax(error)) => syntax_error(error),
		Err(Error::Io(error)) => handle_io(Err(error)),
		Err(error) => {
			eprintln!("{}", error);
			exit(1);
		}
	}

	state
}

fn show_syntax_tree(code: &str) {
	match parse(code) {
		Ok(tree) => println!("{:#?}", tree),
		Err(error) => syntax_error(error)
	}
}

fn show_tokens(code: &str) {
	match tokenize(code) {
		Ok(lexemes) => lexemes.iter()
			.for_each(|lexeme| println!("{}\t{:?}", lexeme.position, lexeme.token)),
		Err(error) => syntax_error(SyntaxError::Lexer(error))
	}
}
