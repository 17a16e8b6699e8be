//! The native libraries scripts can use.
//!
//! Libraries are installed by name with
//! [State::open_library][crate::vm::State::open_library]. `base` binds its
//! functions directly to globals, every other library binds a table of
//! functions to a global of its own name.

use crate::{
	marshal::{FromValue, argument},
	vm::{
		Installer, State,
		error::{Error, ErrorKind, RuntimeError},
		evaluate::{Stack, call_function},
		table::{Table, TableRef},
		value::{Value, parse_number}
	}
};
use hashbrown::HashMap;
use itertools::Itertools;
use std::{f64::consts::PI, rc::Rc};

/// The most values `unpack` may return at once.
pub const MAX_UNPACK: usize = 1_000_000;

/// The longest string `string.rep` may build, in bytes.
pub const MAX_REP: usize = 1 << 27;

/// The names of every built in library.
pub const LIBRARIES: [&str; 4] = ["base", "math", "string", "table"];

type Native = fn(&mut State, &mut Stack) -> Result<usize, Error>;

/// The installers of every built in library, by name.
pub fn libraries() -> HashMap<String, Installer> {
	let installers: [(&str, fn(&mut State)); 4] =
		[("base", base), ("math", math), ("string", string), ("table", table)];

	installers.into_iter()
		.map(|(name, installer)| (name.to_owned(), Rc::new(installer) as Installer))
		.collect()
}

fn native(message: String) -> Error {
	RuntimeError::new(ErrorKind::Native, message).into()
}

/// Converts an argument of the running native function.
fn arg<T>(stack: &Stack, index: usize) -> Result<T, Error>
		where T: FromValue {
	argument(stack.arguments(), index).map_err(native)
}

/// Replaces the arguments of the running native function with its results.
fn results(stack: &mut Stack, results: impl IntoIterator<Item = Value>) -> usize {
	drop(stack.take_arguments());
	let start = stack.len();
	stack.extend(results);
	stack.len() - start
}

fn library(functions: &[(&str, Native)]) -> Table {
	let mut table = Table::new();
	functions.iter().for_each(|(name, function)|
		table.set(Value::from(*name), Value::native(*function)));
	table
}

/// Converts a value to a string, honouring `__tostring`.
pub fn tostring(state: &mut State, stack: &mut Stack, value: Value)
		-> Result<String, Error> {
	let handler = match value.metatable() {
		Some(metatable) => {
			let handler = metatable.borrow().get(&Value::from("__tostring"));
			handler
		},
		None => Value::Nil
	};

	match handler {
		Value::Nil => Ok(value.to_string()),
		handler => {
			let result = call_function(state, stack, handler, vec![value])?;
			Ok(result.into_iter().next().unwrap_or_default().to_string())
		}
	}
}

// base

pub fn base(state: &mut State) {
	let functions: [(&str, Native); 17] = [
		("print", print), ("type", r#type), ("tostring", lua_tostring),
		("tonumber", tonumber), ("pairs", pairs), ("ipairs", ipairs), ("next", next),
		("select", select), ("rawget", rawget), ("rawset", rawset),
		("rawequal", rawequal), ("setmetatable", setmetatable),
		("getmetatable", getmetatable), ("assert", assert), ("error", error),
		("pcall", pcall), ("unpack", unpack)
	];

	functions.into_iter().for_each(|(name, function)| state.register_function(name, function));
}

pub fn print(state: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let message = stack.take_arguments().into_iter()
		.map(|argument| tostring(state, stack, argument))
		.collect::<Result<Vec<_>, _>>()?
		.join("\t");
	println!("{}", message);
	Ok(0)
}

pub fn r#type(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	if stack.arguments().is_empty()
		{return Err(native("bad argument #1 to 'type' (value expected)".to_owned()))}
	let name = stack.argument(0).type_name();
	Ok(results(stack, [Value::from(name)]))
}

fn lua_tostring(state: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let value = stack.argument(0);
	let string = tostring(state, stack, value)?;
	Ok(results(stack, [Value::from(string)]))
}

pub fn tonumber(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let radix = arg::<Option<i64>>(stack, 1)?;
	let result = match (stack.argument(0), radix) {
		(number @ Value::Number(..), None) => number,
		(Value::String(string), None) => parse_number(&string).unwrap_or_default(),
		(Value::String(string), Some(radix @ 2..=36)) =>
			i64::from_str_radix(string.trim(), radix as u32)
				.map(|number| Value::Number(number as f64, true))
				.unwrap_or_default(),
		(_, Some(_)) => return Err(native("bad argument #2 to 'tonumber' (base out of range)".to_owned())),
		_ => Value::Nil
	};

	Ok(results(stack, [result]))
}

pub fn pairs(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	Ok(results(stack, [Value::native(next), Value::Table(table), Value::Nil]))
}

pub fn ipairs(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	Ok(results(stack, [Value::native(ipairs_next), Value::Table(table), Value::from(0)]))
}

fn ipairs_next(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let index = arg::<i64>(stack, 1)? + 1;
	let value = table.borrow().get(&Value::from(index));

	Ok(match value {
		Value::Nil => results(stack, [Value::Nil]),
		value => results(stack, [Value::from(index), value])
	})
}

pub fn next(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let entry = table.borrow().next(&stack.argument(1));

	Ok(match entry {
		Some((key, value)) => results(stack, [key, value]),
		None => results(stack, [Value::Nil])
	})
}

pub fn select(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let mut arguments = stack.take_arguments();
	if arguments.is_empty()
		{return Err(native("bad argument #1 to 'select' (number expected, got no value)".to_owned()))}
	let selector = arguments.remove(0);

	if selector.string() == Some("#") {
		return Ok(results(stack, [Value::from(arguments.len())]))
	}

	let count = arguments.len() as i64;
	let index = match selector.integer() {
		Some(index) if index < 0 && -index <= count => count + index,
		Some(index) if index > 0 => (index - 1).min(count),
		_ => return Err(native("bad argument #1 to 'select' (index out of range)".to_owned()))
	};

	Ok(results(stack, arguments.into_iter().skip(index as usize)))
}

pub fn rawget(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let value = table.borrow().get(&stack.argument(1));
	Ok(results(stack, [value]))
}

pub fn rawset(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	match stack.argument(1) {
		Value::Nil => return Err(native("index is nil".to_owned())),
		Value::Number(number, _) if number.is_nan() =>
			return Err(native("index is NaN".to_owned())),
		key => table.borrow_mut().set(key, stack.argument(2))
	}
	Ok(results(stack, [Value::Table(table)]))
}

pub fn rawequal(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let equal = stack.argument(0) == stack.argument(1);
	Ok(results(stack, [Value::Boolean(equal)]))
}

pub fn setmetatable(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let metatable = match stack.argument(1) {
		Value::Table(metatable) => Some(metatable),
		Value::Nil => None,
		other => return Err(native(format!(
			"bad argument #2 to 'setmetatable' (nil or table expected, got {})", other.type_name())))
	};

	table.borrow_mut().set_metatable(metatable);
	Ok(results(stack, [Value::Table(table)]))
}

pub fn getmetatable(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let metatable = stack.argument(0).metatable();
	Ok(results(stack, [Value::from(metatable)]))
}

pub fn assert(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	match stack.argument(0).truthy() {
		true => Ok(stack.arguments().len()),
		false => {
			let value = match stack.argument(1) {
				Value::Nil => Value::from("assertion failed!"),
				value => value
			};
			Err(raise(value))
		}
	}
}

pub fn error(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	Err(raise(stack.argument(0)))
}

/// A script error carrying any value.
fn raise(value: Value) -> Error {
	let mut error = RuntimeError::new(ErrorKind::Script, value.to_string());
	error.value = value;
	error.into()
}

pub fn pcall(state: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let mut arguments = stack.take_arguments().into_iter();
	let function = arguments.next().unwrap_or_default();

	match call_function(state, stack, function, arguments.collect()) {
		Ok(values) => Ok(results(stack, [Value::Boolean(true)].into_iter().chain(values))),
		Err(Error::Runtime(error)) => Ok(results(stack, [Value::Boolean(false), error.value])),
		Err(error) => Err(error)
	}
}

// math

pub fn math(state: &mut State) {
	let mut math = library(&[
		("abs", abs), ("ceil", ceil), ("floor", floor), ("sqrt", sqrt),
		("max", max), ("min", min), ("fmod", fmod), ("tointeger", tointeger)
	]);
	math.set(Value::from("huge"), Value::from(f64::INFINITY));
	math.set(Value::from("pi"), Value::from(PI));

	state.set_global("math", Value::from(math))
}

/// Reads a number argument, keeping its integer hint.
fn number(stack: &Stack, index: usize) -> Result<(f64, bool), Error> {
	match stack.argument(index) {
		Value::Number(number, integer) => Ok((number, integer)),
		other => Err(native(format!("bad argument #{} (number expected, got {})",
			index + 1, other.type_name())))
	}
}

pub fn abs(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let (number, integer) = number(stack, 0)?;
	Ok(results(stack, [Value::Number(number.abs(), integer)]))
}

pub fn ceil(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let (number, _) = number(stack, 0)?;
	Ok(results(stack, [Value::Number(number.ceil(), number.is_finite())]))
}

pub fn floor(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let (number, _) = number(stack, 0)?;
	Ok(results(stack, [Value::Number(number.floor(), number.is_finite())]))
}

pub fn sqrt(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let (number, _) = number(stack, 0)?;
	Ok(results(stack, [Value::Number(number.sqrt(), false)]))
}

/// The argument for which `better` holds against every other argument.
fn extreme(stack: &mut Stack, better: fn(f64, f64) -> bool) -> Result<usize, Error> {
	let mut best = number(stack, 0)?;
	for index in 1..stack.arguments().len() {
		let candidate = number(stack, index)?;
		if better(candidate.0, best.0) {best = candidate}
	}

	Ok(results(stack, [Value::Number(best.0, best.1)]))
}

pub fn max(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	extreme(stack, |candidate, best| candidate > best)
}

pub fn min(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	extreme(stack, |candidate, best| candidate < best)
}

pub fn fmod(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let (left, left_integer) = number(stack, 0)?;
	let (right, right_integer) = number(stack, 1)?;
	if left_integer && right_integer && right == 0.0
		{return Err(native("bad argument #2 to 'fmod' (zero)".to_owned()))}

	let result = left % right;
	Ok(results(stack, [Value::Number(result, left_integer && right_integer)]))
}

pub fn tointeger(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let result = stack.argument(0).integer()
		.map_or(Value::Nil, |integer| Value::Number(integer as f64, true));
	Ok(results(stack, [result]))
}

// string

pub fn string(state: &mut State) {
	let string = library(&[
		("len", len), ("sub", sub), ("upper", upper), ("lower", lower),
		("rep", rep), ("reverse", reverse)
	]);

	state.set_global("string", Value::from(string))
}

pub fn len(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	Ok(results(stack, [Value::from(string.len())]))
}

/// Resolves a possibly negative string position to a byte offset from one.
fn position(position: i64, len: i64) -> i64 {
	match position {
		position if position < 0 => (len + position + 1).max(0),
		position => position
	}
}

pub fn sub(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	let len = string.len() as i64;
	let start = position(arg::<Option<i64>>(stack, 1)?.unwrap_or(1), len).max(1);
	let end = position(arg::<Option<i64>>(stack, 2)?.unwrap_or(-1), len).min(len);

	let result = match start > end {
		true => String::new(),
		false => String::from_utf8_lossy(
			&string.as_bytes()[(start - 1) as usize..end as usize]).into_owned()
	};
	Ok(results(stack, [Value::from(result)]))
}

pub fn upper(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	Ok(results(stack, [Value::from(string.to_uppercase())]))
}

pub fn lower(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	Ok(results(stack, [Value::from(string.to_lowercase())]))
}

pub fn rep(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	let count = usize::try_from(arg::<i64>(stack, 1)?).unwrap_or(0);
	let separator = arg::<Option<Rc<str>>>(stack, 2)?;

	let length = separator.as_ref().map_or(0, |separator| separator.len())
		.checked_mul(count.saturating_sub(1))
		.zip(string.len().checked_mul(count))
		.and_then(|(separators, repeats)| separators.checked_add(repeats));
	match length {
		Some(length) if length <= MAX_REP => (),
		_ => return Err(native("resulting string too large".to_owned()))
	}

	let result = std::iter::repeat(&*string).take(count)
		.join(separator.as_deref().unwrap_or(""));
	Ok(results(stack, [Value::from(result)]))
}

pub fn reverse(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let string = arg::<Rc<str>>(stack, 0)?;
	Ok(results(stack, [Value::from(string.chars().rev().collect::<String>())]))
}

// table

pub fn table(state: &mut State) {
	let table = library(&[
		("insert", insert), ("remove", remove), ("concat", concat), ("unpack", unpack)
	]);

	state.set_global("table", Value::from(table))
}

pub fn insert(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;

	match stack.arguments().len() {
		2 => table.borrow_mut().push(stack.argument(1)),
		3 => {
			let len = table.borrow().len();
			let position = arg::<usize>(stack, 1)?;
			if position < 1 || position > len + 1
				{return Err(native("bad argument #2 to 'insert' (position out of bounds)".to_owned()))}
			table.borrow_mut().insert(position, stack.argument(2))
		},
		_ => return Err(native("wrong number of arguments to 'insert'".to_owned()))
	}

	Ok(results(stack, []))
}

pub fn remove(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let len = table.borrow().len();
	let position = arg::<Option<usize>>(stack, 1)?.unwrap_or(len);

	let removed = match position {
		0 if len == 0 => Value::Nil,
		position if position >= 1 && position <= len + 1 => table.borrow_mut().remove(position),
		_ => return Err(native("bad argument #2 to 'remove' (position out of bounds)".to_owned()))
	};
	Ok(results(stack, [removed]))
}

pub fn concat(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let separator = arg::<Option<Rc<str>>>(stack, 1)?;
	let start = arg::<Option<i64>>(stack, 2)?.unwrap_or(1);
	let end = match arg::<Option<i64>>(stack, 3)? {
		Some(end) => end,
		None => table.borrow().len() as i64
	};

	let table = table.borrow();
	let result = (start..=end)
		.map(|index| match table.get(&Value::from(index)) {
			value @ (Value::String(_) | Value::Number(..)) => Ok(value.to_string()),
			value => Err(native(format!("invalid value (at index {}) in table for 'concat' (a {} value)",
				index, value.type_name())))
		})
		.collect::<Result<Vec<_>, _>>()?
		.join(separator.as_deref().unwrap_or(""));
	drop(table);

	Ok(results(stack, [Value::from(result)]))
}

pub fn unpack(_: &mut State, stack: &mut Stack) -> Result<usize, Error> {
	let table = arg::<TableRef>(stack, 0)?;
	let start = arg::<Option<i64>>(stack, 1)?.unwrap_or(1);
	let end = match arg::<Option<i64>>(stack, 2)? {
		Some(end) => end,
		None => table.borrow().len() as i64
	};

	if start <= end {
		match end.checked_sub(start).and_then(|span| usize::try_from(span).ok()) {
			Some(span) if span < MAX_UNPACK => (),
			_ => return Err(native("too many results to unpack".to_owned()))
		}
	}

	let values = (start..=end)
		.map(|index| table.borrow().get(&Value::from(index)))
		.collect::<Vec<_>>();
	Ok(results(stack, values))
}
