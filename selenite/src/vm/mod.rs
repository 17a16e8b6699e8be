pub mod error;
pub mod evaluate;
pub mod scope;
pub mod table;
pub mod value;
#[cfg(test)]
pub mod tests;

pub use self::error::{Error, ErrorKind, RuntimeError};
use self::{
	evaluate::{Flow, Stack, block, call_function, evaluate},
	scope::Scope,
	table::TableRef,
	value::Value
};
use crate::{
	ast::{lexer::Position, parser::{Expression, parse, parse_expression}},
	lua_lib,
	marshal::TypeDescriptor
};
use hashbrown::HashMap;
use std::{
	any::TypeId,
	fmt::{Display, Formatter, Result as FMTResult},
	fs::read_to_string,
	path::Path,
	rc::Rc
};
use tracing::{debug, warn};

/// Installs a library into a state.
pub type Installer = Rc<dyn Fn(&mut State)>;

/// How closures capture the locals around them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CaptureMode {
	/// Closures get a copy of the scope they were created in. Changes made to
	/// enclosing locals after creation aren't seen, and changes made by the
	/// closure are lost when it returns.
	#[default]
	Snapshot,

	/// Closures share the scope they were created in, and write their changes
	/// to enclosing locals back into it after every call.
	Shared
}

/// Configuration for a [State].
#[derive(Clone, Debug)]
pub struct Options {
	/// How deeply expressions may nest during evaluation before a stack
	/// overflow is raised.
	pub max_depth: usize,
	pub capture: CaptureMode,
	/// The libraries opened when the state is created.
	pub libraries: Vec<String>
}

impl Default for Options {
	fn default() -> Self {
		Self {
			max_depth: 512,
			capture: CaptureMode::Snapshot,
			libraries: lua_lib::LIBRARIES.iter().map(|name| name.to_string()).collect()
		}
	}
}

/// An entry of the call stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallFrame {
	/// What was called, as written in source.
	pub title: String,
	pub position: Option<Position>
}

impl Display for CallFrame {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match &self.position {
			Some(position) => write!(f, "{} at {}", self.title, position),
			None => write!(f, "{}", self.title)
		}
	}
}

/// A script context: the global table, the current scope, the libraries and
/// host types available, and the last error raised.
///
/// Examples
/// --------
/// ```rust
/// use selenite::vm::{State, value::Value};
///
/// let mut state = State::new();
/// state.do_string("function double(n) return n * 2 end").unwrap();
///
/// let double = state.get_global("double");
/// assert_eq!(state.call(double, vec![Value::from(21)]).unwrap(), vec![Value::from(42)]);
/// ```
pub struct State {
	pub(crate) globals: TableRef,
	pub(crate) scope: Scope,
	pub(crate) libraries: HashMap<String, Installer>,
	pub(crate) types: HashMap<TypeId, Rc<TypeDescriptor>>,
	pub(crate) call_stack: Vec<CallFrame>,
	pub(crate) last_error: Option<RuntimeError>,
	pub(crate) options: Options,
	pub(crate) depth: usize
}

impl State {
	/// Creates a state with the default options.
	pub fn new() -> Self {
		Self::with_options(Options::default())
	}

	pub fn with_options(options: Options) -> Self {
		let globals = TableRef::default();
		globals.borrow_mut().set(Value::from("_G"), Value::Table(globals.clone()));

		let mut state = Self {
			globals,
			scope: Scope::new(),
			libraries: lua_lib::libraries(),
			types: HashMap::new(),
			call_stack: Vec::new(),
			last_error: None,
			options,
			depth: 0
		};

		let libraries = state.options.libraries.clone();
		libraries.iter().for_each(|name| drop(state.open_library(name)));
		state
	}

	pub fn options(&self) -> &Options {
		&self.options
	}

	/// Runs a chunk of source code, returning the last value it returned.
	///
	/// Runtime errors are caught, made available through
	/// [State::last_error], and nil is returned. Syntax errors and other
	/// errors are returned.
	pub fn do_string(&mut self, source: &str) -> Result<Value, Error> {
		let statements = match parse(source)? {
			Expression::Chunk(statements) => statements,
			statement => vec![statement]
		};

		// Top level statements run in the state's own scope, so that locals
		// survive between calls.
		let mut stack = Stack::new();
		let result = block(&statements, &mut stack, self).map(|flow| match flow {
			Flow::Return(count) if count > 0 => {
				let values = stack.split_off(stack.len().saturating_sub(count));
				values.into_iter().last().unwrap_or_default()
			},
			_ => Value::Nil
		});

		self.catch(result)
	}

	/// Runs a source file, as [State::do_string] does.
	pub fn do_file(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
		let source = read_to_string(path.as_ref())?;
		debug!(path = %path.as_ref().display(), "running file");
		self.do_string(&source)
	}

	/// Evaluates a single expression, returning its first value. Errors are
	/// handled as [State::do_string] does.
	pub fn evaluate(&mut self, source: &str) -> Result<Value, Error> {
		let expression = parse_expression(source)?;
		let mut stack = Stack::new();
		let result = evaluate(&expression, &mut stack, self)
			.map(|_| stack.split_off(0).into_iter().next().unwrap_or_default());

		self.catch(result)
	}

	/// Catches runtime errors, recording them.
	fn catch(&mut self, result: Result<Value, Error>) -> Result<Value, Error> {
		match result {
			Ok(value) => Ok(value),
			Err(Error::Runtime(error)) => {
				debug!(error = %error, kind = %error.kind, "caught runtime error");
				self.last_error = Some(error);
				self.reset();
				Ok(Value::Nil)
			},
			Err(error) => {self.reset(); Err(error)}
		}
	}

	/// Resets the evaluation state after an error.
	fn reset(&mut self) {
		self.call_stack.clear();
		self.depth = 0;
	}

	/// Calls a function with the arguments given. Runtime errors are
	/// returned, not caught.
	pub fn call(&mut self, function: Value, arguments: Vec<Value>)
			-> Result<Vec<Value>, Error> {
		let mut stack = Stack::new();
		call_function(self, &mut stack, function, arguments)
	}

	/// Opens a library by name. Unknown libraries are skipped with a warning,
	/// and false is returned.
	pub fn open_library(&mut self, name: &str) -> bool {
		match self.libraries.get(name).cloned() {
			Some(installer) => {
				debug!(library = name, "opening library");
				installer(self);
				true
			},
			None => {
				warn!(library = name, "skipping unknown library");
				false
			}
		}
	}

	/// Makes a library available to [State::open_library].
	pub fn add_library<F>(&mut self, name: &str, installer: F)
			where F: Fn(&mut State) + 'static {
		self.libraries.insert(name.to_owned(), Rc::new(installer));
	}

	/// Binds a native function to a global.
	pub fn register_function<F>(&mut self, name: &str, function: F)
			where F: Fn(&mut State, &mut Stack) -> Result<usize, Error> + 'static {
		self.set_global(name, Value::native(function))
	}

	/// Registers a host type, binding a table of its methods to a global of
	/// the type's name.
	pub fn register_type(&mut self, descriptor: Rc<TypeDescriptor>) {
		debug!(name = descriptor.name(), "registering host type");
		self.set_global(descriptor.name(), Value::from(descriptor.methods()));
		self.types.insert(descriptor.type_id(), descriptor);
	}

	/// The descriptor registered for T.
	pub fn get_usertype<T>(&self) -> Result<Rc<TypeDescriptor>, Error>
			where T: 'static {
		self.types.get(&TypeId::of::<T>()).cloned().ok_or_else(|| RuntimeError::new(
			ErrorKind::UnregisteredType,
			format!("unregistered host type {}", std::any::type_name::<T>())).into())
	}

	/// The last runtime error caught by [State::do_string], [State::do_file] or
	/// [State::evaluate].
	pub fn last_error(&self) -> Option<&RuntimeError> {
		self.last_error.as_ref()
	}

	/// Takes the last runtime error, so that later calls can tell whether they
	/// raised one.
	pub fn take_last_error(&mut self) -> Option<RuntimeError> {
		self.last_error.take()
	}

	pub fn globals(&self) -> &TableRef {
		&self.globals
	}

	pub fn get_global(&self, name: &str) -> Value {
		self.globals.borrow().get(&Value::from(name))
	}

	pub fn set_global(&mut self, name: &str, value: Value) {
		self.globals.borrow_mut().set(Value::from(name), value)
	}

	/// The functions being called right now, innermost last.
	pub fn call_stack(&self) -> &[CallFrame] {
		&self.call_stack
	}

	/// The locals of the top level scope.
	pub fn scope(&self) -> &Scope {
		&self.scope
	}

	/// Reads a variable, a visible local or else a global.
	pub(crate) fn lookup(&self, name: &str) -> Value {
		match self.scope.get(name) {
			Some(value) => value,
			None => self.get_global(name)
		}
	}

	/// Writes a variable, a visible local or else a global.
	pub(crate) fn assign(&mut self, name: &str, value: Value) {
		match self.scope.contains(name) {
			true => drop(self.scope.assign(name, value)),
			false => self.set_global(name, value)
		}
	}
}

impl Default for State {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for State {
	fn drop(&mut self) {
		// The global table refers to itself.
		if let Ok(mut globals) = self.globals.try_borrow_mut()
			{globals.set(Value::from("_G"), Value::Nil)}
	}
}
