use selenite::{
	marshal::{TypeBuilder, argument},
	vm::{ErrorKind, State, value::{UserObject, Value}}
};
use std::{cell::Cell, rc::Rc};

#[test]
fn counter() {
	let mut state = State::new();

	let number = Rc::new(Cell::new(0));
	let counted = number.clone();
	state.register_function("counter", move |_, stack| {
		drop(stack.take_arguments());
		let old = counted.get();
		counted.set(old + 1);
		stack.push(Value::from(old));
		Ok(1)
	});

	let result = state.do_string("counter() counter() return counter()").unwrap();
	assert_eq!(result, Value::from(2));
	assert_eq!(number.get(), 3);
}

#[test]
fn native_errors_are_runtime_errors() {
	let mut state = State::new();
	state.register_function("half", |_, stack| {
		let number = argument::<i64>(stack.arguments(), 0)
			.map_err(|message| selenite::vm::RuntimeError::new(ErrorKind::Native, message))?;
		stack.push(Value::from(number / 2));
		Ok(1)
	});

	assert_eq!(state.do_string("return half(10)").unwrap(), Value::from(5));
	assert_eq!(state.do_string("return half(\"ten\")").unwrap(), Value::Nil);

	let error = state.last_error().unwrap();
	assert_eq!(error.kind, ErrorKind::Native);
	assert_eq!(error.message, "bad argument #1 (integer expected, got string)");
	assert_eq!(error.trace.last().map(|frame| frame.title.as_str()), Some("half"));
}

struct Account {
	owner: String,
	balance: i64
}

#[test]
fn host_objects() {
	let mut state = State::new();
	let descriptor = TypeBuilder::<Account>::new("Account")
		.static_method("open", 1, |arguments| {
			let owner = argument::<String>(arguments, 0)?;
			Ok(Value::from(UserObject::new(Account {owner, balance: 0})))
		})
		.method("deposit", 1, |account: &mut Account, arguments| {
			account.balance += argument::<i64>(arguments, 0)?;
			Ok(Value::from(account.balance))
		})
		.property("owner", |account: &Account| Value::from(account.owner.as_str()))
		.build();
	state.register_type(descriptor);

	let source = "\
local account = Account.open(\"ada\")
account:deposit(10)
account:deposit(5)
return account.owner .. \" has \" .. account:deposit(0)
";
	assert_eq!(state.do_string(source).unwrap(), Value::from("ada has 15"));

	assert_eq!(state.do_string("Account.open(\"x\").owner = \"y\"").unwrap(), Value::Nil);
	assert_eq!(state.last_error().unwrap().kind, ErrorKind::IndexNonTable);
	assert!(state.get_usertype::<Account>().is_ok());
	assert!(state.get_usertype::<String>().is_err());
}
