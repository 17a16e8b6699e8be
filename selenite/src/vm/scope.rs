use self::super::{table::{Table, TableRef}, value::Value};
use hashbrown::HashSet;
use std::rc::Rc;

/// A lexical scope, the set of local variables visible at some point.
///
/// Scopes are not chained. Entering a new scope copies the current one, and
/// leaving it writes the locals that were visible before entering back to the
/// outer scope, so assignments to an enclosing local survive, while locals
/// declared inside the scope (and shadowing ones) are discarded.
///
/// Cloning a scope shares its bindings, use [Scope::enter] for a copy.
#[derive(Clone, Debug, Default)]
pub struct Scope {
	bindings: TableRef,
	names: HashSet<Rc<str>>,
	declared: HashSet<Rc<str>>
}

impl Scope {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates the scope for a nested block. Every local visible here is visible
	/// there, but writes don't reach this scope until [Scope::exit].
	pub fn enter(&self) -> Self {
		Self {
			bindings: self.bindings.borrow().shallow_clone().shared(),
			names: self.names.clone(),
			declared: HashSet::new()
		}
	}

	/// Leaves this scope, writing back locals of `outer` which were assigned
	/// here but not redeclared.
	pub fn exit(self, outer: &Scope) {
		if Rc::ptr_eq(&self.bindings, &outer.bindings) {return}

		let bindings = self.bindings.borrow();
		let mut outer_bindings = outer.bindings.borrow_mut();
		outer.names.iter()
			.filter(|name| !self.declared.contains(*name))
			.for_each(|name| {
				let key = Value::String(name.clone());
				let value = bindings.get(&key);
				outer_bindings.set(key, value);
			});
	}

	/// Declares a local, shadowing any local of the same name.
	pub fn declare(&mut self, name: &str, value: Value) {
		let name: Rc<str> = name.into();
		self.names.insert(name.clone());
		self.declared.insert(name.clone());
		self.bindings.borrow_mut().set(Value::String(name), value);
	}

	/// Whether a local of this name is visible.
	pub fn contains(&self, name: &str) -> bool {
		self.names.contains(name)
	}

	/// Gets the value of a local, or None if no such local is visible.
	pub fn get(&self, name: &str) -> Option<Value> {
		if !self.contains(name) {return None}
		Some(self.bindings.borrow().get(&Value::from(name)))
	}

	/// Assigns to a visible local. Returns false, assigning nothing, if there is
	/// no such local.
	pub fn assign(&self, name: &str, value: Value) -> bool {
		if !self.contains(name) {return false}
		self.bindings.borrow_mut().set(Value::from(name), value);
		true
	}

	/// The names of every visible local.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.names.iter().map(|name| &**name)
	}

	/// A copy of the current bindings, for inspection.
	pub fn bindings(&self) -> Table {
		self.bindings.borrow().shallow_clone()
	}
}

#[cfg(test)]
mod tests {
	use self::super::Scope;
	use crate::vm::value::Value;

	#[test]
	fn assignments_to_outer_locals_survive() {
		let mut outer = Scope::new();
		outer.declare("x", Value::from(1));

		let inner = outer.enter();
		assert!(inner.assign("x", Value::from(2)));
		assert_eq!(outer.get("x"), Some(Value::from(1)));
		inner.exit(&outer);

		assert_eq!(outer.get("x"), Some(Value::from(2)));
	}

	#[test]
	fn inner_locals_are_discarded() {
		let mut outer = Scope::new();
		outer.declare("x", Value::from(1));

		let mut inner = outer.enter();
		inner.declare("x", Value::from("shadow"));
		inner.declare("y", Value::from(3));
		inner.exit(&outer);

		assert_eq!(outer.get("x"), Some(Value::from(1)));
		assert_eq!(outer.get("y"), None);
	}

	#[test]
	fn nil_locals_are_visible() {
		let mut scope = Scope::new();
		scope.declare("x", Value::Nil);

		assert_eq!(scope.get("x"), Some(Value::Nil));
		assert!(!scope.assign("y", Value::from(1)));
	}
}
