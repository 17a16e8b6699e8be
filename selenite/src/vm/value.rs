use self::super::{
	Error, State,
	evaluate::Stack,
	scope::Scope,
	table::{Table, TableRef}
};
use crate::{ast::parser::Expression, marshal::TypeDescriptor};
use std::{
	any::{Any, TypeId, type_name},
	cell::{Ref, RefCell, RefMut},
	fmt::{Debug, Display, Formatter, Result as FMTResult},
	hash::{Hash, Hasher},
	rc::Rc
};

macro_rules! value_conversions {
	(impl for $convert:ident @ $for:ty $code:block $($rest:tt)*) => {
		impl From<$for> for Value {
			fn from($convert: $for) -> Value {
				$code
			}
		}

		value_conversions! {$($rest)*}
	};
	() => {}
}

/// Builds a [Table] from a Lua-like table constructor.
///
/// Keys are written either as bare identifiers (`name = value`), bracketed
/// expressions (`[key] = value`), or left out entirely, in which case the
/// value is appended to the array part. Nil values are skipped.
///
/// ```rust
/// # use selenite::{lua_table, vm::value::Value};
/// let table = lua_table! {1, 2, name = "three", [4] = true};
/// assert_eq!(table.get(&Value::from(2)), Value::from(2));
/// assert_eq!(table.get(&Value::from("name")), Value::from("three"));
/// assert_eq!(table.len(), 2);
/// ```
#[macro_export]
macro_rules! lua_table {
	($($arm:tt)*) => {{
		#[allow(unused_assignments, unused_mut, unused_variables, unused_imports)]
		{
			use $crate::{lua_table_inner, vm::{table::Table, value::Value}};

			let mut table = Table::default();
			let mut counter = 1i64;

			lua_table_inner!(table counter {$($arm)*});

			table
		}
	}}
}

#[doc(hidden)]
#[macro_export]
macro_rules! lua_table_inner {
	($table:ident $counter:ident {[$key:expr] = $value:expr $(, $($rest:tt)*)?}) => {
		$table.set(Value::from($key), Value::from($value));
		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {$key:ident = $value:expr $(, $($rest:tt)*)?}) => {
		$table.set(Value::from(stringify!($key)), Value::from($value));
		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {$value:expr $(, $($rest:tt)*)?}) => {
		$table.set(Value::from($counter), Value::from($value));
		$counter += 1;
		lua_table_inner!($table $counter {$($($rest)*)?});
	};
	($table:ident $counter:ident {}) => {};
}

/// A native function callable from scripts.
///
/// Arguments are found on the stack above its base, see
/// [Stack::arguments]. The function pushes its results and returns how many
/// it pushed.
pub type NativeFunction = Rc<dyn Fn(&mut State, &mut Stack) -> Result<usize, Error>>;

/// Represents a runtime value.
#[derive(Clone)]
pub enum Value {
	Nil,
	Boolean(bool),
	/// A number, and whether it should be treated as an integer.
	Number(f64, bool),
	String(Rc<str>),
	Table(TableRef),
	Closure(Rc<Closure>),
	UserObject(UserObject)
}

impl Value {
	pub fn new_string(string: impl AsRef<str>) -> Self {
		Self::String(string.as_ref().into())
	}

	/// Creates a [Value::Closure] from a native function.
	pub fn native<F>(function: F) -> Self
			where F: Fn(&mut State, &mut Stack) -> Result<usize, Error> + 'static {
		Self::Closure(Rc::new(Closure::Native(Rc::new(function))))
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Nil => "nil",
			Self::Boolean(_) => "boolean",
			Self::Number(..) => "number",
			Self::String(_) => "string",
			Self::Table(_) => "table",
			Self::Closure(_) => "function",
			Self::UserObject(_) => "userdata"
		}
	}

	/// Whether this value is truthy. Only nil and false are falsy.
	pub fn truthy(&self) -> bool {
		!matches!(self, Self::Nil | Self::Boolean(false))
	}

	pub fn is_nil(&self) -> bool {
		matches!(self, Self::Nil)
	}

	pub fn number(&self) -> Option<f64> {
		match self {
			Self::Number(number, _) => Some(*number),
			_ => None
		}
	}

	/// Returns this number as an integer, if it is a whole number.
	pub fn integer(&self) -> Option<i64> {
		match self {
			Self::Number(number, _) if number.fract() == 0.0
				&& number.abs() < 9.2e18 => Some(*number as i64),
			_ => None
		}
	}

	pub fn string(&self) -> Option<&str> {
		match self {
			Self::String(string) => Some(string),
			_ => None
		}
	}

	pub fn boolean(&self) -> Option<bool> {
		match self {
			Self::Boolean(boolean) => Some(*boolean),
			_ => None
		}
	}

	pub fn table(&self) -> Option<&TableRef> {
		match self {
			Self::Table(table) => Some(table),
			_ => None
		}
	}

	pub fn closure(&self) -> Option<&Rc<Closure>> {
		match self {
			Self::Closure(closure) => Some(closure),
			_ => None
		}
	}

	pub fn user_object(&self) -> Option<&UserObject> {
		match self {
			Self::UserObject(object) => Some(object),
			_ => None
		}
	}

	/// The metatable of this value, only tables have one.
	pub fn metatable(&self) -> Option<TableRef> {
		self.table().and_then(|table| table.borrow().metatable())
	}
}

/// Parses text as a number the way the lexer would, ignoring surrounding
/// whitespace.
pub fn parse_number(text: &str) -> Option<Value> {
	let text = text.trim();
	let (negative, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text)
	};
	let sign = if negative {-1.0} else {1.0};

	if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
		return i64::from_str_radix(hex, 16).ok()
			.map(|number| Value::Number(sign * number as f64, true))
	}

	if digits.is_empty() || !digits.chars()
			.all(|character| matches!(character, '0'..='9' | '.' | 'e' | 'E' | '+' | '-'))
		{return None}

	match digits.parse::<i64>() {
		Ok(integer) => Some(Value::Number(sign * integer as f64, true)),
		Err(_) => digits.parse::<f64>().ok()
			.map(|number| Value::Number(sign * number, false))
	}
}

/// Formats a number. Integers print without a fraction, whole floats print
/// with a trailing `.0`.
pub fn format_number(number: f64, integer: bool) -> String {
	if number.is_nan() {
		"nan".to_owned()
	} else if number.is_infinite() {
		if number > 0.0 {"inf".to_owned()} else {"-inf".to_owned()}
	} else if integer && number.fract() == 0.0 && number.abs() < 1e16 {
		format!("{}", number as i64)
	} else {
		format!("{:?}", number)
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Nil => write!(f, "nil"),
			Self::Boolean(boolean) => write!(f, "{}", boolean),
			Self::Number(number, integer) =>
				write!(f, "{}", format_number(*number, *integer)),
			Self::String(string) => write!(f, "{}", string),
			Self::Table(table) => write!(f, "table: {:p}", Rc::as_ptr(table)),
			Self::Closure(closure) => write!(f, "function: {:p}", Rc::as_ptr(closure)),
			Self::UserObject(object) => write!(f, "{}", object)
		}
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::String(string) => Debug::fmt(string, f),
			value => Display::fmt(value, f)
		}
	}
}

impl Eq for Value {}

impl PartialEq for Value {
	fn eq(&self, other: &Value) -> bool {
		match (self, other) {
			(Self::Nil, Self::Nil) => true,
			(Self::Boolean(a), Self::Boolean(b)) => a == b,
			(Self::Number(a, _), Self::Number(b, _)) => a == b,
			(Self::String(a), Self::String(b)) => a == b,
			(Self::Table(a), Self::Table(b)) => Rc::ptr_eq(a, b),
			(Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
			(Self::UserObject(a), Self::UserObject(b)) => a.same(b),
			_ => false
		}
	}
}

impl Hash for Value {
	fn hash<H>(&self, state: &mut H)
			where H: Hasher {
		match self {
			Self::Nil => 0u8.hash(state),
			Self::Boolean(boolean) => boolean.hash(state),
			// Zero is normalized so that -0 and 0 hash the same, like they compare.
			Self::Number(number, _) => {
				let number = if *number == 0.0 {0f64} else {*number};
				number.to_bits().hash(state)
			},
			Self::String(string) => string.hash(state),
			Self::Table(table) => Rc::as_ptr(table).hash(state),
			Self::Closure(closure) => (Rc::as_ptr(closure) as *const u8).hash(state),
			Self::UserObject(object) => object.address().hash(state)
		}
	}
}

value_conversions! {
	impl for value @ f64 {Value::Number(value, false)}
	impl for value @ i64 {Value::Number(value as f64, true)}
	impl for value @ i32 {Value::Number(value as f64, true)}
	impl for value @ usize {Value::Number(value as f64, true)}
	impl for value @ bool {Value::Boolean(value)}
	impl for value @ &str {Value::String(value.into())}
	impl for value @ String {Value::String(value.into())}
	impl for value @ Rc<str> {Value::String(value)}
	impl for value @ Table {Value::Table(value.shared())}
	impl for value @ TableRef {Value::Table(value)}
	impl for value @ Closure {Value::Closure(Rc::new(value))}
	impl for value @ UserObject {Value::UserObject(value)}
	impl for _value @ () {Value::Nil}
}

impl<T> From<Option<T>> for Value
		where T: Into<Value> {
	fn from(option: Option<T>) -> Self {
		match option {
			Some(value) => value.into(),
			None => Value::Nil
		}
	}
}

impl Default for Value {
	fn default() -> Self {
		Self::Nil
	}
}

/// A callable value.
pub enum Closure {
	Native(NativeFunction),
	Script {
		/// The name this function can call itself by, set for
		/// `local function name` only.
		name: Option<String>,
		parameters: Vec<String>,
		body: Rc<Expression>,
		/// The scope active when this function was created.
		captured: Scope
	}
}

impl Debug for Closure {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::Native(_) => write!(f, "native function: {:p}", self),
			Self::Script {name, parameters, ..} =>
				write!(f, "function {}({})", name.as_deref().unwrap_or(""),
					parameters.join(", "))
		}
	}
}

/// An opaque host value exposed to scripts.
///
/// The host value is stored as an `Rc<RefCell<T>>`, so clones of a user
/// object refer to the same host value.
#[derive(Clone)]
pub struct UserObject {
	handle: Rc<dyn Any>,
	type_id: TypeId,
	type_name: &'static str,
	descriptor: Option<Rc<TypeDescriptor>>
}

impl UserObject {
	pub fn new<T>(value: T) -> Self
			where T: 'static {
		Self {
			handle: Rc::new(RefCell::new(value)),
			type_id: TypeId::of::<T>(),
			type_name: type_name::<T>(),
			descriptor: None
		}
	}

	/// Wraps an existing shared host value.
	pub fn from_shared<T>(value: Rc<RefCell<T>>) -> Self
			where T: 'static {
		Self {
			handle: value,
			type_id: TypeId::of::<T>(),
			type_name: type_name::<T>(),
			descriptor: None
		}
	}

	/// Attaches a descriptor, which must describe the wrapped type.
	pub fn with_descriptor(mut self, descriptor: Rc<TypeDescriptor>) -> Self {
		if descriptor.type_id() == self.type_id {self.descriptor = Some(descriptor)}
		self
	}

	pub fn type_id(&self) -> TypeId {
		self.type_id
	}

	/// The registered name of the wrapped type, or its Rust name when no
	/// descriptor is attached.
	pub fn type_name(&self) -> &str {
		match &self.descriptor {
			Some(descriptor) => descriptor.name(),
			None => self.type_name
		}
	}

	pub fn descriptor(&self) -> Option<&Rc<TypeDescriptor>> {
		self.descriptor.as_ref()
	}

	pub fn is<T>(&self) -> bool
			where T: 'static {
		self.type_id == TypeId::of::<T>()
	}

	pub fn handle<T>(&self) -> Option<Rc<RefCell<T>>>
			where T: 'static {
		Rc::downcast::<RefCell<T>>(self.handle.clone()).ok()
	}

	pub fn borrow<T>(&self) -> Option<Ref<T>>
			where T: 'static {
		self.handle.downcast_ref::<RefCell<T>>()?.try_borrow().ok()
	}

	pub fn borrow_mut<T>(&self) -> Option<RefMut<T>>
			where T: 'static {
		self.handle.downcast_ref::<RefCell<T>>()?.try_borrow_mut().ok()
	}

	/// Whether both objects wrap the very same host value.
	pub fn same(&self, other: &UserObject) -> bool {
		self.address() == other.address()
	}

	fn address(&self) -> *const u8 {
		Rc::as_ptr(&self.handle) as *const u8
	}
}

impl Display for UserObject {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "userdata: {}: {:p}", self.type_name(), self.address())
	}
}

impl Debug for UserObject {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		Display::fmt(self, f)
	}
}
