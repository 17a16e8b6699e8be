//! Conversions between host values and script values, and descriptors which
//! expose host types to scripts.
//!
//! Host primitives convert into [Value]s through `From`, and back through
//! [FromValue]. Any other host value is wrapped in a [UserObject]. A host
//! type's methods and properties are exposed by building a [TypeDescriptor]
//! with a [TypeBuilder], and registering it with
//! [State::register_type][crate::vm::State::register_type].
//!
//! Examples
//! --------
//! ```rust
//! use selenite::{marshal::{TypeBuilder, argument}, vm::{State, value::{UserObject, Value}}};
//!
//! struct Counter {count: i64}
//!
//! let descriptor = TypeBuilder::<Counter>::new("Counter")
//! 	.static_method("new", 1, |arguments| {
//! 		Ok(UserObject::new(Counter {count: argument(arguments, 0)?}))
//! 	})
//! 	.method("bump", 0, |counter, _| {counter.count += 1; Ok(counter.count)})
//! 	.property("count", |counter| counter.count)
//! 	.build();
//!
//! let mut state = State::new();
//! state.register_type(descriptor);
//! let value = state.do_string("local c = Counter.new(41) c:bump() return c.count").unwrap();
//! assert_eq!(value, Value::from(42));
//! ```

use crate::vm::{
	State,
	error::{Error, ErrorKind, RuntimeError},
	evaluate::Stack,
	table::{Table, TableRef},
	value::{UserObject, Value}
};
use hashbrown::HashMap;
use std::{
	any::{TypeId, type_name},
	fmt::{Debug, Formatter, Result as FMTResult},
	marker::PhantomData,
	rc::Rc
};

/// Converts a script value into a host value.
pub trait FromValue: Sized {
	/// Converts the value, or returns None if it is of the wrong kind.
	fn from_value(value: &Value) -> Option<Self>;

	/// What kind of value was expected, for error messages.
	fn expected() -> &'static str;
}

macro_rules! from_value {
	($($for:ty => $expected:literal, |$value:ident| $code:expr;)*) => {$(
		impl FromValue for $for {
			fn from_value($value: &Value) -> Option<Self> {
				$code
			}

			fn expected() -> &'static str {
				$expected
			}
		}
	)*}
}

from_value! {
	Value => "value", |value| Some(value.clone());
	f64 => "number", |value| value.number();
	i64 => "integer", |value| value.integer();
	i32 => "integer", |value| value.integer().and_then(|integer| i32::try_from(integer).ok());
	usize => "integer", |value| value.integer().and_then(|integer| usize::try_from(integer).ok());
	bool => "boolean", |value| value.boolean();
	String => "string", |value| value.string().map(str::to_owned);
	Rc<str> => "string", |value| match value {
		Value::String(string) => Some(string.clone()),
		_ => None
	};
	TableRef => "table", |value| value.table().cloned();
	UserObject => "userdata", |value| value.user_object().cloned();
	() => "nil", |value| value.is_nil().then(|| ());
}

impl<T> FromValue for Option<T>
		where T: FromValue {
	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Nil => Some(None),
			value => T::from_value(value).map(Some)
		}
	}

	fn expected() -> &'static str {
		T::expected()
	}
}

/// Converts argument number `index`, counting from zero, of a native call.
/// Missing arguments are nil.
pub fn argument<T>(arguments: &[Value], index: usize) -> Result<T, String>
		where T: FromValue {
	let value = arguments.get(index).cloned().unwrap_or_default();
	T::from_value(&value).ok_or_else(|| format!("bad argument #{} ({} expected, got {})",
		index + 1, T::expected(), value.type_name()))
}

type Invoker = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;
type Getter = Rc<dyn Fn(&UserObject) -> Result<Value, String>>;
type Setter = Rc<dyn Fn(&UserObject, &Value) -> Result<(), String>>;

/// A host function callable from scripts, with a declared arity.
pub struct Method {
	name: Rc<str>,
	arity: usize,
	/// The declaring type, for instance methods.
	instance: Option<TypeId>,
	invoker: Invoker
}

impl Method {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn arity(&self) -> usize {
		self.arity
	}

	pub fn is_static(&self) -> bool {
		self.instance.is_none()
	}

	/// Invokes this method with the arguments on the stack.
	///
	/// Exactly as many arguments as the method takes are used, missing ones are
	/// nil and extra ones are dropped. Instance methods take the instance as an
	/// extra first argument, which must wrap the declaring type. One value is
	/// always pushed.
	pub fn invoke(&self, _: &mut State, stack: &mut Stack) -> Result<usize, Error> {
		let mut arguments = stack.take_arguments();
		arguments.resize(self.arity + usize::from(!self.is_static()), Value::Nil);

		if let Some(type_id) = self.instance {
			match arguments.first().and_then(Value::user_object) {
				Some(object) if object.type_id() == type_id => (),
				_ => return Err(RuntimeError::new(ErrorKind::InvalidNativeInstance,
					format!("invalid native instance for method '{}'", self.name)).into())
			}
		}

		let result = (self.invoker)(&arguments)
			.map_err(|message| RuntimeError::new(ErrorKind::Native, message))?;
		stack.push(result);
		Ok(1)
	}
}

struct Property {
	getter: Getter,
	setter: Option<Setter>
}

/// Describes how scripts see a host type, its name, methods and properties.
pub struct TypeDescriptor {
	name: Rc<str>,
	type_id: TypeId,
	methods: HashMap<Rc<str>, Value>,
	properties: HashMap<Rc<str>, Property>
}

impl TypeDescriptor {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn type_id(&self) -> TypeId {
		self.type_id
	}

	/// A method, as a callable value.
	pub fn method(&self, name: &str) -> Option<Value> {
		self.methods.get(name).cloned()
	}

	/// A table of every method, which is what scripts see under the type's
	/// name.
	pub fn methods(&self) -> Table {
		let mut table = Table::new();
		let mut names = self.methods.keys().collect::<Vec<_>>();
		names.sort();
		names.into_iter().for_each(|name|
			table.set(Value::String(name.clone()), self.methods[name].clone()));
		table
	}

	/// Wraps a host value, attaching this descriptor.
	pub fn wrap<T>(self: &Rc<Self>, value: T) -> UserObject
			where T: 'static {
		UserObject::new(value).with_descriptor(self.clone())
	}

	/// Indexes an instance, reading a property or finding a method.
	pub fn get(&self, object: &UserObject, name: &str) -> Result<Value, RuntimeError> {
		match (self.properties.get(name), self.methods.get(name)) {
			(Some(property), _) => (property.getter)(object)
				.map_err(|message| RuntimeError::new(ErrorKind::Native, message)),
			(None, Some(method)) => Ok(method.clone()),
			(None, None) => Ok(Value::Nil)
		}
	}

	/// Writes to a property of an instance.
	pub fn set(&self, object: &UserObject, name: &str, value: Value)
			-> Result<(), RuntimeError> {
		match self.properties.get(name) {
			Some(Property {setter: Some(setter), ..}) => setter(object, &value)
				.map_err(|message| RuntimeError::new(ErrorKind::Native, message)),
			Some(_) => Err(RuntimeError::new(ErrorKind::IndexNonTable,
				format!("property '{}' of {} is read only", name, self.name))),
			None => Err(RuntimeError::new(ErrorKind::IndexNonTable,
				format!("{} has no property '{}'", self.name, name)))
		}
	}
}

impl Debug for TypeDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		let mut methods = self.methods.keys().collect::<Vec<_>>();
		methods.sort();
		let mut properties = self.properties.keys().collect::<Vec<_>>();
		properties.sort();

		f.debug_struct("TypeDescriptor")
			.field("name", &self.name)
			.field("methods", &methods)
			.field("properties", &properties)
			.finish()
	}
}

/// Builds a [TypeDescriptor] for the host type T.
pub struct TypeBuilder<T> {
	name: Rc<str>,
	methods: Vec<Method>,
	properties: HashMap<Rc<str>, Property>,
	marker: PhantomData<fn() -> T>
}

impl<T> TypeBuilder<T>
		where T: 'static {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.into(),
			methods: Vec::new(),
			properties: HashMap::new(),
			marker: PhantomData
		}
	}

	/// Adds an instance method taking `arity` arguments, not counting the
	/// instance.
	pub fn method<F, R>(mut self, name: &str, arity: usize, method: F) -> Self
			where F: Fn(&mut T, &[Value]) -> Result<R, String> + 'static, R: Into<Value> {
		let type_name = self.name.clone();
		let invoker = move |arguments: &[Value]| {
			let object = arguments.first().and_then(Value::user_object)
				.ok_or_else(|| format!("missing {} instance", type_name))?;
			let mut instance = object.borrow_mut::<T>()
				.ok_or_else(|| format!("{} instance is already in use", type_name))?;
			method(&mut instance, arguments.get(1..).unwrap_or_default()).map(Into::into)
		};

		self.methods.push(Method {
			name: name.into(),
			arity,
			instance: Some(TypeId::of::<T>()),
			invoker: Rc::new(invoker)
		});
		self
	}

	/// Adds a method which takes no instance, such as a constructor.
	pub fn static_method<F, R>(mut self, name: &str, arity: usize, method: F) -> Self
			where F: Fn(&[Value]) -> Result<R, String> + 'static, R: Into<Value> {
		self.methods.push(Method {
			name: name.into(),
			arity,
			instance: None,
			invoker: Rc::new(move |arguments| method(arguments).map(Into::into))
		});
		self
	}

	/// Adds a read only property.
	pub fn property<F, R>(mut self, name: &str, getter: F) -> Self
			where F: Fn(&T) -> R + 'static, R: Into<Value> {
		self.properties.insert(name.into(), Property {getter: getter_for(self.name.clone(), getter), setter: None});
		self
	}

	/// Adds a property scripts can assign to.
	pub fn writable_property<G, S, R, V>(mut self, name: &str, getter: G, setter: S) -> Self
			where G: Fn(&T) -> R + 'static, R: Into<Value>,
				S: Fn(&mut T, V) + 'static, V: FromValue {
		let type_name = self.name.clone();
		let property_name: Rc<str> = name.into();
		let setter = move |object: &UserObject, value: &Value| {
			let value = V::from_value(value).ok_or_else(|| format!("{} expected for {}.{}, got {}",
				V::expected(), type_name, property_name, value.type_name()))?;
			let mut instance = object.borrow_mut::<T>()
				.ok_or_else(|| format!("{} instance is already in use", type_name))?;
			setter(&mut instance, value);
			Ok(())
		};

		self.properties.insert(name.into(), Property {
			getter: getter_for(self.name.clone(), getter),
			setter: Some(Rc::new(setter))
		});
		self
	}

	pub fn build(self) -> Rc<TypeDescriptor> {
		let methods = self.methods.into_iter()
			.map(|method| {
				let name = method.name.clone();
				let method = Rc::new(method);
				(name, Value::native(move |state, stack| method.invoke(state, stack)))
			})
			.collect();

		Rc::new(TypeDescriptor {
			name: self.name,
			type_id: TypeId::of::<T>(),
			methods,
			properties: self.properties
		})
	}
}

fn getter_for<T, F, R>(type_name: Rc<str>, getter: F) -> Getter
		where T: 'static, F: Fn(&T) -> R + 'static, R: Into<Value> {
	Rc::new(move |object: &UserObject| {
		let instance = object.borrow::<T>()
			.ok_or_else(|| format!("{} instance is already in use", type_name))?;
		Ok(getter(&instance).into())
	})
}

impl<T> Debug for TypeBuilder<T> {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		write!(f, "TypeBuilder<{}>({})", type_name::<T>(), self.name)
	}
}
