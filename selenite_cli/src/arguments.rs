pub use pico_args::Error;
use pico_args::Arguments as Parser;
use std::{fs::read_to_string, io::Error as IOError, path::PathBuf};

pub static HELP: &str = "\
Selenite, an embeddable scripting language runtime

SYNOPSIS:
	selenite [OPTIONS] [SOURCE]

DESCRIPTION:
	selenite runs scripts written in a small dialect of Lua. Scripts are parsed into an expression tree, which is then evaluated directly.

	SOURCE is either evaluated directly, if -e is passed, otherwise the file named SOURCE is loaded and evaluated. If -i is passed, after evaluation, an interactive prompt with SOURCE's state is started. If SOURCE is not provided, an interactive prompt always starts.

	Passing -v will log verbose information to standard error. Logging can also be configured with the RUST_LOG environment variable.

	The exit status is 1 after a runtime error, 2 after a syntax error or bad arguments, and 3 after an I/O error.

OPTIONS:
	-h, --help            Displays this and quits
	-V, --version         Displays version information
	-v, --verbose         Runs with verbose output
	-i, --interactive     Runs in interactive mode, after running SOURCE
	-e, --evaluate        Treats SOURCE as source code, rather than a file
	-s, --ast             Shows the expression tree rather than executing
	-t, --tokens          Shows tokens rather than executing
	--shared-upvalues     Lets functions change the locals around them
	--max-depth DEPTH     How deeply evaluation may nest, 512 by default";

#[derive(Debug)]
pub enum Arguments {
	ShowHelp,
	ShowVersion,
	Run {
		source: Option<Source>,
		execution: ExecutionType,
		settings: Settings
	}
}

#[derive(Debug)]
pub enum Source {
	File(PathBuf),
	Code(String)
}

#[derive(Debug)]
pub enum ExecutionType {
	Run,
	RunInteractively,
	ShowSyntaxTree,
	ShowTokens
}

/// Flags which change how the interpreter behaves, rather than what it does.
#[derive(Debug, Default)]
pub struct Settings {
	pub verbose: bool,
	pub shared_upvalues: bool,
	pub max_depth: Option<usize>
}

impl Arguments {
	pub fn from_env() -> Result<Self, Error> {
		let mut parser = Parser::from_env();

		if parser.contains(["-h", "--help"]) {return Ok(Self::ShowHelp)}
		if parser.contains(["-V", "--version"]) {return Ok(Self::ShowVersion)}

		let settings = Settings {
			verbose: parser.contains(["-v", "--verbose"]),
			shared_upvalues: parser.contains("--shared-upvalues"),
			max_depth: parser.opt_value_from_str("--max-depth")?
		};

		let interactive = parser.contains(["-i", "--interactive"]);
		let syntax_tree = parser.contains(["-s", "--ast"]);
		let tokens = parser.contains(["-t", "--tokens"]);

		let source = match parser.contains(["-e", "--evaluate"]) {
			true => Some(Source::Code(parser.free_from_str()?)),
			false => parser.opt_free_from_str()?.map(Source::File)
		};

		let execution = if interactive || source.is_none() {
			ExecutionType::RunInteractively
		} else if syntax_tree {
			ExecutionType::ShowSyntaxTree
		} else if tokens {
			ExecutionType::ShowTokens
		} else {
			ExecutionType::Run
		};

		Ok(Self::Run {source, execution, settings})
	}
}

impl TryFrom<Source> for String {
	type Error = IOError;

	fn try_from(value: Source) -> Result<Self, IOError> {
		Ok(match value {
			Source::Code(code) => code,
			Source::File(file) => read_to_string(&file)?
		})
	}
}
