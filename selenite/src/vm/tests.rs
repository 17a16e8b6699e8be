use self::super::{
	CaptureMode, Error, ErrorKind, Options, RuntimeError, State,
	evaluate::{Stack, evaluate},
	scope::Scope,
	value::{Closure, Value}
};
use crate::ast::parser::Expression;
use itertools::assert_equal;
use std::{cell::Cell, rc::Rc, thread::Builder};

fn run(source: &str) -> Value {
	State::new().do_string(source).unwrap()
}

/// Runs source which must raise a runtime error, and returns the error.
fn failure(state: &mut State, source: &str) -> RuntimeError {
	assert_eq!(state.do_string(source).unwrap(), Value::Nil);
	state.last_error().cloned().unwrap()
}

fn shallow(max_depth: usize) -> State {
	State::with_options(Options {max_depth, ..Options::default()})
}

#[test]
fn arithmetic_is_left_to_right() {
	assert_eq!(run("return 1 + 2 * 3"), Value::from(9));
	assert_eq!(run("return 2 * (1 + 2)"), Value::from(6));
	assert_eq!(run("return 10 - 2 - 3"), Value::from(5));
}

#[test]
fn integer_hints() {
	assert!(matches!(run("return 7 % 3"), Value::Number(number, true) if number == 1.0));
	assert!(matches!(run("return -7 % 3"), Value::Number(number, true) if number == 2.0));
	assert!(matches!(run("return 2 ^ 2"), Value::Number(number, false) if number == 4.0));
	assert!(matches!(run("return 6 / 2"), Value::Number(number, false) if number == 3.0));
	assert_eq!(run("return 7 / 2"), Value::from(3.5));
	assert_eq!(run("return 1 + 0.5"), Value::from(1.5));
}

#[test]
fn strings_and_lengths() {
	assert_eq!(run("return \"a\" .. 1 .. \"b\""), Value::from("a1b"));
	assert_eq!(run("return #\"hello\""), Value::from(5));
	assert_eq!(run("return #{1, 2, 3}"), Value::from(3));
	assert_eq!(run("return (\"abc\"):upper()"), Value::from("ABC"));
	assert_eq!(run("local s = \"Hi\" return s:lower()"), Value::from("hi"));
}

#[test]
fn comparisons() {
	let mut state = State::new();

	assert_eq!(state.evaluate("1 < 2").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("2 <= 2").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("3 > 4").unwrap(), Value::Boolean(false));
	assert_eq!(state.evaluate("1 == 1.0").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("\"1\" ~= 1").unwrap(), Value::Boolean(true));

	let error = failure(&mut state, "return 1 < \"2\"");
	assert_eq!(error.kind, ErrorKind::Comparison);
	assert_eq!(error.message, "comparison type mismatch (number < string)");
}

#[test]
fn logical_operators_short_circuit() {
	assert_eq!(run("return nil or \"x\""), Value::from("x"));
	assert_eq!(run("return false and error(\"boom\")"), Value::Boolean(false));
	assert_eq!(run("return 1 and 2"), Value::from(2));
	assert_eq!(run("return not nil"), Value::Boolean(true));
}

#[test]
fn blocks_restore_scope() {
	assert_eq!(run("local x = 1 do local x = 2 end return x"), Value::from(1));
	assert_eq!(run("local x = 1 do x = 2 end return x"), Value::from(2));
	assert_eq!(run("local x = 1 if true then x = 5 end return x"), Value::from(5));
	assert_eq!(run("do local y = 1 end return y"), Value::Nil);
}

#[test]
fn top_level_locals_persist() {
	let mut state = State::new();
	state.do_string("local x = 5").unwrap();

	assert_eq!(state.do_string("return x").unwrap(), Value::from(5));
	assert_eq!(state.get_global("x"), Value::Nil);
	assert!(state.scope().names().any(|name| name == "x"));
}

#[test]
fn multiple_values() {
	let functions = "local function two() return 1, 2 end ";

	assert_eq!(run(&format!("{}local a, b, c = two() return c", functions)), Value::Nil);
	assert_eq!(run(&format!("{}local a, b = two() return b", functions)), Value::from(2));
	assert_eq!(run(&format!("{}local x, y = two(), 10 return y", functions)), Value::from(10));
	assert_eq!(run(&format!("{}return #{{two()}}", functions)), Value::from(2));
	assert_eq!(run(&format!("{}local t = {{two(), 5}} return t[2]", functions)), Value::from(5));
	assert_eq!(run(&format!("{}return two()", functions)), Value::from(2));
}

const COUNTER: &str = "\
local count = 0
local function bump()
	count = count + 1
	return count
end
bump()
local last = bump()
";

#[test]
fn snapshot_capture() {
	let mut state = State::new();
	state.do_string(COUNTER).unwrap();

	assert_eq!(state.do_string("return last").unwrap(), Value::from(1));
	assert_eq!(state.do_string("return count").unwrap(), Value::from(0));
}

#[test]
fn shared_capture() {
	let mut state = State::with_options(Options {
		capture: CaptureMode::Shared,
		..Options::default()
	});
	state.do_string(COUNTER).unwrap();

	assert_eq!(state.do_string("return last").unwrap(), Value::from(2));
	assert_eq!(state.do_string("return count").unwrap(), Value::from(2));
}

#[test]
fn recursion() {
	let source = "\
local function fib(n)
	if n < 2 then return n end
	return fib(n - 1) + fib(n - 2)
end
return fib(15)
";

	assert_eq!(run(source), Value::from(610));
}

#[test]
fn recursion_guard() {
	let mut state = shallow(64);

	let error = failure(&mut state, "local function f() return f() end return f()");
	assert_eq!(error.kind, ErrorKind::StackOverflow);
	assert!(!error.trace.is_empty());

	// The state is usable afterwards.
	assert!(state.call_stack().is_empty());
	assert_eq!(state.do_string("return 1").unwrap(), Value::from(1));
}

#[test]
fn metamethods() {
	let source = "\
local mt = {
	__add = function(a, b) return a.v + b.v end,
	__eq = function(a, b) return a.v == b.v end,
	__lt = function(a, b) return a.v < b.v end,
	__len = function(t) return 42 end,
	__call = function(t, x) return x * 2 end,
	__index = function(t, k) return k .. \"!\" end
}
a = setmetatable({v = 1}, mt)
b = setmetatable({v = 2}, mt)
c = setmetatable({v = 1}, mt)
";
	let mut state = State::new();
	state.do_string(source).unwrap();

	assert_eq!(state.evaluate("a + b").unwrap(), Value::from(3));
	assert_eq!(state.evaluate("a == c").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("a == b").unwrap(), Value::Boolean(false));
	assert_eq!(state.evaluate("a < b").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("b > a").unwrap(), Value::Boolean(true));
	assert_eq!(state.evaluate("#a").unwrap(), Value::from(42));
	assert_eq!(state.evaluate("a(21)").unwrap(), Value::from(42));
	assert_eq!(state.evaluate("a.missing").unwrap(), Value::from("missing!"));
	assert_eq!(state.evaluate("a.v").unwrap(), Value::from(1));
}

#[test]
fn index_chains() {
	let source = "\
local base = {greet = \"hi\"}
local middle = setmetatable({}, {__index = base})
local object = setmetatable({}, {__index = middle})
return object.greet
";

	assert_eq!(run(source), Value::from("hi"));
}

#[test]
fn newindex() {
	let source = "\
local log = {}
local proxy = setmetatable({}, {__newindex = function(t, k, v) rawset(log, k, v) end})
proxy.x = 1
return rawget(proxy, \"x\") == nil and log.x == 1
";

	assert_eq!(run(source), Value::Boolean(true));
}

#[test]
fn loops() {
	assert_eq!(run("local s = 0 for i = 1, 10 do s = s + i end return s"), Value::from(55));
	assert_eq!(run("local s = \"\" for i = 10, 1, -2 do s = s .. i end return s"),
		Value::from("108642"));
	assert_eq!(run("local i = 0 while true do i = i + 1 if i == 5 then break end end return i"),
		Value::from(5));
	assert_eq!(run("for i = 1, 3 do if i == 2 then return i * 10 end end"), Value::from(20));

	let source = "\
local t = {a = 1, b = 2, c = 3}
local keys = \"\"
for k, v in pairs(t) do keys = keys .. k .. v end
return keys
";
	assert_eq!(run(source), Value::from("a1b2c3"));

	let source = "\
local t = {1, 2, nil, 4}
local total = 0
for _, v in ipairs(t) do total = total + v end
return total
";
	assert_eq!(run(source), Value::from(3));
}

#[test]
fn loop_errors() {
	let mut state = State::new();

	let error = failure(&mut state, "for i = 1, 10, 0 do end");
	assert_eq!(error.message, "'for' step is zero");

	let error = failure(&mut state, "for i = 1, \"x\" do end");
	assert_eq!(error.kind, ErrorKind::Arithmetic);
}

#[test]
fn runtime_errors() {
	let mut state = State::new();

	let error = failure(&mut state, "local t = nil return t.x");
	assert_eq!(error.kind, ErrorKind::IndexNonTable);
	assert_eq!(error.message, "index on nil value");

	let error = failure(&mut state, "return nil + 1");
	assert_eq!(error.kind, ErrorKind::Arithmetic);
	assert_eq!(error.message, "arithmetic on non-number (nil + number)");
	assert_equal(error.stack.iter().rev().take(2), &[Value::from(1), Value::Nil]);

	let error = failure(&mut state, "local x = 1 x()");
	assert_eq!(error.kind, ErrorKind::CallNonFunction);

	let error = failure(&mut state, "local t = {} t[nil] = 1");
	assert_eq!(error.kind, ErrorKind::NilIndex);

	let error = failure(&mut state, "return #true");
	assert_eq!(error.kind, ErrorKind::Length);

	let error = failure(&mut state, "return {} .. \"x\"");
	assert_eq!(error.kind, ErrorKind::Concatenation);
}

#[test]
fn errors_carry_the_call_stack() {
	let mut state = State::new();
	let error = failure(&mut state, "\
local function inner() return nil .. \"x\" end
local function outer() return inner() end
outer()
");

	assert_equal(error.trace.iter().map(|frame| frame.title.as_str()), ["outer", "inner"]);
	assert_eq!(error.trace[0].position.map(|position| position.line), Some(3));
	assert!(error.traceback().starts_with("\tin inner at 2:"));
}

#[test]
fn script_errors() {
	let mut state = State::new();

	let error = failure(&mut state, "error({code = 7})");
	assert_eq!(error.kind, ErrorKind::Script);
	assert!(error.value.table().is_some());

	assert_eq!(state.do_string("local ok, e = pcall(error, {code = 7}) return e.code").unwrap(),
		Value::from(7));
	assert_eq!(state.do_string("local ok, e = pcall(function() return nil + 1 end) return e").unwrap(),
		Value::from("arithmetic on non-number (nil + number)"));
	assert_eq!(state.do_string("return pcall(function() return 1 end)").unwrap(), Value::from(1));
	assert_eq!(state.do_string("local ok = pcall(error) return ok").unwrap(), Value::Boolean(false));
}

#[test]
fn syntax_errors_are_returned() {
	let mut state = State::new();

	assert!(matches!(state.do_string("x = = 1"), Err(Error::Syntax(_))));
	assert!(state.last_error().is_none());
}

#[test]
fn host_calls() {
	let mut state = State::new();
	state.do_string("function pair(a, b) return b, a end function fail() error(\"no\") end").unwrap();

	let pair = state.get_global("pair");
	assert_eq!(state.call(pair, vec![Value::from(1), Value::from(2)]).unwrap(),
		vec![Value::from(2), Value::from(1)]);

	let fail = state.get_global("fail");
	match state.call(fail, Vec::new()) {
		Err(Error::Runtime(error)) => assert_eq!(error.value, Value::from("no")),
		other => panic!("expected a runtime error, got {:?}", other)
	}
}

#[test]
fn libraries_by_name() {
	let mut state = State::with_options(Options {
		libraries: vec!["base".to_owned(), "nope".to_owned()],
		..Options::default()
	});

	assert!(state.get_global("math").is_nil());
	assert!(!state.get_global("print").is_nil());
	assert!(!state.open_library("nope"));

	state.add_library("answer", |state| state.set_global("answer", Value::from(42)));
	assert!(state.open_library("answer"));
	assert!(state.open_library("math"));
	assert_eq!(state.evaluate("answer + math.floor(0.5)").unwrap(), Value::from(42));
}

#[test]
fn globals_table() {
	let mut state = State::new();
	state.do_string("x = 1 _G.y = 2").unwrap();

	assert_eq!(state.get_global("x"), Value::from(1));
	assert_eq!(state.evaluate("y").unwrap(), Value::from(2));
	assert_eq!(state.evaluate("_G.x").unwrap(), Value::from(1));
}

#[test]
fn core_properties() {
	let mut state = State::new();

	state.do_string("x = {1, 2, 3}").unwrap();
	assert_eq!(state.evaluate("_G[\"x\"] == x").unwrap(), Value::Boolean(true));
	let x = state.get_global("x");
	let table = x.table().unwrap().borrow();
	assert_eq!(table.len(), 3);
	assert!(table.is_array());
	drop(table);

	assert_eq!(state.do_string("\
local other = \"kept\"
local sum = 0
for i = 1, 3 do sum = sum + i end
return other .. sum .. tostring(i)
").unwrap(), Value::from("kept6nil"));

	let error = failure(&mut state, "return 1 + \"a\"");
	assert_eq!(error.kind, ErrorKind::Arithmetic);
	assert_eq!(error.message, "arithmetic on non-number (number + string)");

	assert_eq!(state.evaluate("1 .. 2").unwrap(), Value::from("12"));
	assert_eq!(state.evaluate("\"a\" .. 1").unwrap(), Value::from("a1"));

	let called = Rc::new(Cell::new(false));
	let flag = called.clone();
	state.register_function("sideEffect", move |_, _| {flag.set(true); Ok(0)});
	assert_eq!(state.evaluate("nil and sideEffect()").unwrap(), Value::Nil);
	assert!(!called.get());

	assert_eq!(state.do_string("\
local seen = {n = 0}
local function iter(s, v)
	seen.n = seen.n + 1
	if seen.n == 1 then return 1, \"a\" end
	if seen.n == 2 then return 2, \"b\" end
	return nil
end
local body = 0
for i, v in iter, nil, 0 do body = body + 1 end
return body * 10 + seen.n
").unwrap(), Value::from(23));
}

const COUNTDOWN: &str = "\
local function count(n)
	if n == 0 then return 0 end
	return count(n - 1) + 1
end
";

#[test]
fn recursion_guard_with_default_options() {
	let mut state = State::new();
	state.do_string(COUNTDOWN).unwrap();

	assert_eq!(state.do_string("return count(30)").unwrap(), Value::from(30));

	let error = failure(&mut state, "return count(100000)");
	assert_eq!(error.kind, ErrorKind::StackOverflow);
	assert_eq!(state.do_string("return count(30)").unwrap(), Value::from(30));
}

#[test]
fn recursion_guard_on_a_small_thread() {
	let result = Builder::new()
		.stack_size(256 * 1024)
		.spawn(|| {
			let mut state = State::new();
			state.do_string(COUNTDOWN).unwrap();
			state.do_string("return count(100000)").unwrap();
			state.last_error().map(|error| error.kind)
		})
		.unwrap()
		.join()
		.unwrap();

	assert_eq!(result, Some(ErrorKind::StackOverflow));
}

#[test]
fn deep_source_is_a_syntax_error() {
	let mut state = State::new();
	let source = format!("return {}1{}", "(".repeat(200_000), ")".repeat(200_000));

	assert!(matches!(state.do_string(&source), Err(Error::Syntax(_))));
	assert!(state.last_error().is_none());
}

#[test]
fn library_limits() {
	let mut state = State::new();

	let error = failure(&mut state, "return select(\"#\", unpack({}, 1, 1e12))");
	assert_eq!(error.kind, ErrorKind::Native);
	assert_eq!(error.message, "too many results to unpack");
	assert_eq!(state.do_string("return select(\"#\", unpack({}, 1, 3))").unwrap(),
		Value::from(3));
	assert_eq!(state.do_string("return select(\"#\", table.unpack({}, 5, 1))").unwrap(),
		Value::from(0));

	let error = failure(&mut state, "return string.rep(\"ab\", 1e12)");
	assert_eq!(error.message, "resulting string too large");
	let error = failure(&mut state, "return string.rep(\"\", 1e12, \"--\")");
	assert_eq!(error.message, "resulting string too large");
	assert_eq!(state.do_string("return string.rep(\"ab\", 3, \",\")").unwrap(),
		Value::from("ab,ab,ab"));
	assert_eq!(state.do_string("return string.rep(\"ab\", -1)").unwrap(), Value::from(""));

	let error = failure(&mut state, "rawset({}, 0 / 0, 1)");
	assert_eq!(error.message, "index is NaN");
}

#[test]
fn internal_errors_are_not_caught() {
	let bracketed = Expression::Index(Box::new(Expression::Literal(Value::from(1))));

	let mut state = State::new();
	let mut stack = Stack::new();
	assert!(matches!(evaluate(&bracketed, &mut stack, &mut state), Err(Error::Internal(_))));

	let broken = Value::Closure(Rc::new(Closure::Script {
		name: None,
		parameters: Vec::new(),
		body: Rc::new(bracketed),
		captured: Scope::new()
	}));
	state.set_global("broken", broken);

	assert!(matches!(state.do_string("broken()"), Err(Error::Internal(_))));
	assert!(matches!(state.do_string("pcall(broken)"), Err(Error::Internal(_))));
	assert!(state.last_error().is_none());
	assert!(state.call_stack().is_empty());
	assert_eq!(state.do_string("return 1").unwrap(), Value::from(1));
}
