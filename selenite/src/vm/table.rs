use self::super::value::Value;
use hashbrown::HashMap;
use std::{
	cell::RefCell,
	fmt::{Debug, Formatter, Result as FMTResult},
	rc::Rc
};

/// The key a table's metatable is stored under.
pub const METATABLE_KEY: &str = "__metatable";

/// A shared handle to a table. This is how tables live inside values.
pub type TableRef = Rc<RefCell<Table>>;

/// A key/value map which remembers the order keys were first inserted in.
///
/// Tables are both the array and the dictionary type of the language. Keys
/// are compared by value, so `1` and `1.0` are the same key. Nil is never a
/// key, and storing nil under a key removes it.
///
/// The metatable, if any, is stored on the table itself under
/// [METATABLE_KEY]. That key never shows up when enumerating the table.
#[derive(Clone, Default, PartialEq)]
pub struct Table {
	data: HashMap<Value, Value>,
	order: Vec<Value>
}

impl Table {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an array from the values given, keyed from one.
	pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
		let mut table = Self::new();
		values.into_iter().for_each(|value| table.push(value));
		table
	}

	/// Gets the value under a key, nil if there is none.
	pub fn get(&self, key: &Value) -> Value {
		self.data.get(key).cloned().unwrap_or_default()
	}

	/// Sets a key to a value. Nil keys are ignored, and nil values remove the
	/// key.
	pub fn set(&mut self, key: Value, value: Value) {
		match (key, value) {
			(Value::Nil, _) => (),
			(key, Value::Nil) => if self.data.remove(&key).is_some() {
				self.order.retain(|other| *other != key)
			},
			(key, value) => if self.data.insert(key.clone(), value).is_none() {
				self.order.push(key)
			}
		}
	}

	pub fn contains(&self, key: &Value) -> bool {
		self.data.contains_key(key)
	}

	/// The length of the array part, the number of contiguous integer keys from
	/// one.
	pub fn len(&self) -> usize {
		(1..).take_while(|index| self.data.contains_key(&Value::from(*index as i64)))
			.count()
	}

	/// Whether there are no entries, the metatable aside.
	pub fn is_empty(&self) -> bool {
		self.iter().next().is_none()
	}

	/// Whether this table is nothing but an array. The first key must be one,
	/// and the last key the end of a contiguous run from it.
	pub fn is_array(&self) -> bool {
		let mut keys = self.keys();
		let first = match keys.next().and_then(Value::integer) {
			Some(first) => first,
			None => return false
		};
		let last = match keys.last().map_or(Some(first), Value::integer) {
			Some(last) => last,
			None => return false
		};

		first == 1 && last - first + 1 == self.len() as i64
	}

	/// Visits every entry in insertion order. Visiting stops as soon as the
	/// visitor returns something other than nil, and that value is returned.
	pub fn pairs<F>(&self, mut visitor: F) -> Value
			where F: FnMut(&Value, &Value) -> Value {
		for (key, value) in self.iter() {
			match visitor(key, value) {
				Value::Nil => (),
				sentinel => return sentinel
			}
		}

		Value::Nil
	}

	/// Iterates over every entry in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
		self.order.iter()
			.filter(|key| !is_metatable_key(key))
			.filter_map(move |key| self.data.get(key).map(|value| (key, value)))
	}

	fn keys(&self) -> impl Iterator<Item = &Value> {
		self.order.iter().filter(|key| !is_metatable_key(key))
	}

	/// The entry following `key` in insertion order. A nil key gives the first
	/// entry. None is returned at the end, or if the key isn't in the table.
	pub fn next(&self, key: &Value) -> Option<(Value, Value)> {
		let position = match key {
			Value::Nil => 0,
			key => self.order.iter().position(|other| other == key)? + 1
		};

		self.order[position..].iter()
			.find(|key| !is_metatable_key(key))
			.map(|key| (key.clone(), self.get(key)))
	}

	/// A new table with the same entries, in the same order. Values which are
	/// handles, such as tables, are shared.
	pub fn shallow_clone(&self) -> Self {
		self.clone()
	}

	pub fn metatable(&self) -> Option<TableRef> {
		match self.data.get(&Value::from(METATABLE_KEY)) {
			Some(Value::Table(table)) => Some(table.clone()),
			_ => None
		}
	}

	pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
		self.set(Value::from(METATABLE_KEY), Value::from(metatable))
	}

	/// Looks a metamethod up in this table's metatable.
	pub fn metamethod(&self, name: &str) -> Value {
		match self.metatable() {
			Some(metatable) => metatable.borrow().get(&Value::from(name)),
			None => Value::Nil
		}
	}

	/// Appends a value to the end of the array part.
	pub fn push(&mut self, value: Value) {
		let end = self.len() + 1;
		self.set(Value::from(end), value)
	}

	/// Inserts a value into the array part at `position`, shifting everything
	/// after it up by one.
	pub fn insert(&mut self, position: usize, value: Value) {
		let len = self.len();
		(position..=len).rev().for_each(|index| {
			let moved = self.get(&Value::from(index));
			self.set(Value::from(index + 1), moved);
		});
		self.set(Value::from(position), value)
	}

	/// Removes a value from the array part at `position`, shifting everything
	/// after it down by one.
	pub fn remove(&mut self, position: usize) -> Value {
		let len = self.len();
		let removed = self.get(&Value::from(position));
		(position..len).for_each(|index| {
			let moved = self.get(&Value::from(index + 1));
			self.set(Value::from(index), moved);
		});
		if position <= len {self.set(Value::from(len), Value::Nil)}
		removed
	}

	/// Wraps this table in a shared handle.
	pub fn shared(self) -> TableRef {
		Rc::new(RefCell::new(self))
	}
}

fn is_metatable_key(key: &Value) -> bool {
	key.string() == Some(METATABLE_KEY)
}

impl Debug for Table {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		f.debug_map().entries(self.iter()).finish()
	}
}

#[cfg(test)]
mod tests {
	use self::super::{METATABLE_KEY, Table};
	use crate::{lua_table, vm::value::Value};
	use itertools::assert_equal;

	#[test]
	fn array_constructor() {
		let table = lua_table! {1, 2, 3};

		assert_eq!(table.len(), 3);
		assert!(table.is_array());
	}

	#[test]
	fn get_and_set() {
		let mut table = Table::new();
		table.set(Value::from("a"), Value::from(1));
		table.set(Value::Nil, Value::from(2));

		assert_eq!(table.get(&Value::from("a")), Value::from(1));
		assert_eq!(table.get(&Value::from("b")), Value::Nil);
		assert!(table.contains(&Value::from("a")));

		table.set(Value::from("a"), Value::Nil);
		assert!(!table.contains(&Value::from("a")));
		assert!(table.is_empty());
	}

	#[test]
	fn integer_and_float_keys_agree() {
		let mut table = Table::new();
		table.set(Value::from(1.0), Value::from("float"));

		assert_eq!(table.get(&Value::from(1)), Value::from("float"));
		assert_eq!(table.len(), 1);

		table.set(Value::from(-0.0), Value::from("zero"));
		assert_eq!(table.get(&Value::from(0)), Value::from("zero"));
	}

	#[test]
	fn length_stops_at_gap() {
		let table = lua_table! {[1] = 1, [2] = 2, [4] = 4};

		assert_eq!(table.len(), 2);
		assert!(!table.is_array());
	}

	#[test]
	fn is_array_rejects_mixed() {
		assert!(!lua_table! {1, 2, name = "x"}.is_array());
		assert!(!lua_table! {[2] = 1, [3] = 2}.is_array());
		assert!(!Table::new().is_array());
		assert!(lua_table! {"only"}.is_array());
	}

	#[test]
	fn insertion_order() {
		let table = lua_table! {c = 1, a = 2, b = 3};

		assert_equal(table.iter().map(|(key, _)| key.clone()),
			vec![Value::from("c"), Value::from("a"), Value::from("b")]);
	}

	#[test]
	fn next_walks_in_order() {
		let table = lua_table! {x = 1, y = 2};

		let (key, value) = table.next(&Value::Nil).unwrap();
		assert_eq!((key.clone(), value), (Value::from("x"), Value::from(1)));
		let (key, value) = table.next(&key).unwrap();
		assert_eq!((key.clone(), value), (Value::from("y"), Value::from(2)));
		assert!(table.next(&key).is_none());
	}

	#[test]
	fn pairs_stops_on_sentinel() {
		let table = lua_table! {1, 2, 3, 4};
		let mut visited = 0;

		let found = table.pairs(|_, value| {
			visited += 1;
			if *value == Value::from(2) {Value::from("found")} else {Value::Nil}
		});

		assert_eq!(found, Value::from("found"));
		assert_eq!(visited, 2);
	}

	#[test]
	fn shallow_clone_is_independent() {
		let original = lua_table! {a = 1, b = 2};
		let mut clone = original.shallow_clone();
		clone.set(Value::from("a"), Value::Nil);
		clone.set(Value::from("c"), Value::from(3));

		assert_equal(original.iter().map(|(key, _)| key.clone()),
			vec![Value::from("a"), Value::from("b")]);
		assert_eq!(original.get(&Value::from("a")), Value::from(1));
		assert!(!original.contains(&Value::from("c")));
	}

	#[test]
	fn metatable_is_hidden() {
		let mut table = lua_table! {1, 2};
		table.set_metatable(Some(lua_table! {__index = "x"}.shared()));

		assert!(table.metatable().is_some());
		assert!(table.contains(&Value::from(METATABLE_KEY)));
		assert_eq!(table.iter().count(), 2);
		assert!(table.is_array());
		assert_eq!(table.metamethod("__index"), Value::from("x"));

		assert!(table.next(&Value::from(2)).is_none());
	}

	#[test]
	fn insert_and_remove_shift() {
		let mut table = lua_table! {"a", "c"};
		table.insert(2, Value::from("b"));
		assert_eq!(table.len(), 3);
		assert_eq!(table.get(&Value::from(2)), Value::from("b"));
		assert_eq!(table.get(&Value::from(3)), Value::from("c"));

		assert_eq!(table.remove(1), Value::from("a"));
		assert_eq!(table.len(), 2);
		assert_eq!(table.get(&Value::from(1)), Value::from("b"));
		assert_eq!(table.get(&Value::from(3)), Value::Nil);
	}
}
