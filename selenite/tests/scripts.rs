// Each script in the scripts directory is run with `print` captured, and its
// output is compared with the `.out` file of the same name. Scripts should
// not print anything which changes between runs, such as addresses.

use diff::{Result as Diff, lines};
use selenite::{lua_lib::tostring, vm::{State, value::Value}};
use std::{cell::RefCell, rc::Rc};

/// Runs a script, returning everything it printed.
fn selenite(code: &str) -> String {
	let output = Rc::new(RefCell::new(String::new()));
	let print_output = output.clone();

	let mut state = State::new();
	state.register_function("print", move |state, stack| {
		let message = stack.take_arguments().into_iter()
			.map(|argument| tostring(state, stack, argument))
			.collect::<Result<Vec<_>, _>>()?
			.join("\t");
		let mut output = print_output.borrow_mut();
		output.push_str(&message); output.push('\n');
		Ok(0)
	});

	assert_eq!(state.do_string(code).unwrap(), Value::Nil);
	if let Some(error) = state.last_error() {
		let mut output = output.borrow_mut();
		output.push_str(&format!("error: {}\n", error));
	}

	let result = output.borrow().clone();
	result
}

fn compare(name: &str, actual: &str, expected: &str) -> Result<(), ()> {
	if actual == expected {return Ok(())}

	eprintln!("The output of {:?} differs from what was expected.", name);
	lines(actual, expected).into_iter()
		.for_each(|result| match result {
			Diff::Left(left) => eprintln!("\x1B[31m-{}\x1B[0m", left),
			Diff::Right(right) => eprintln!("\x1B[32m+{}\x1B[0m", right),
			Diff::Both(both, _) => eprintln!(" {}", both)
		});
	Err(())
}

macro_rules! script_tests {
	($($name:ident),*) => {$(
		#[test]
		fn $name() -> Result<(), ()> {
			static CODE: &str = include_str!(concat!("scripts/", stringify!($name), ".lua"));
			static EXPECTED: &str = include_str!(concat!("scripts/", stringify!($name), ".out"));

			compare(stringify!($name), &selenite(CODE), EXPECTED)
		}
	)*}
}

script_tests!(closures, errors, inventory, loops, metatables, strings, tables);
