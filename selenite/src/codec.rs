//! A binary encoding for tables of plain data.
//!
//! An encoded table is a header, a pool of constants, and a list of
//! instructions which rebuild the table when run against a value stack.
//!
//! ```text
//! "STBL" version:u8
//! count:u32 (tag:u8 payload)*
//! count:u32 (opcode:u8 operand)*
//! ```
//!
//! Constants are deduplicated. Their tags are `0` false, `1` true, `2` an
//! integer, `3` a float, both followed by the little endian bits of an `f64`,
//! and `4` a string, followed by its length as a `u32` and then its UTF-8
//! bytes. All integers are little endian.
//!
//! The instructions are `PUSH index` (`0x01`), which pushes a constant, `SET`
//! (`0x02`), which pops a value then a key and sets them in the table being
//! built, `NEWTABLE` (`0x03`), which starts building a nested table, and
//! `ENDTABLE` (`0x04`), which finishes the nested table and pushes it. The
//! root table is never opened or closed explicitly.
//!
//! Only booleans, numbers, strings and tables can be encoded. Metatables are
//! not encoded.
//!
//! Examples
//! --------
//! ```rust
//! use selenite::{codec::{decode, encode}, lua_table, vm::value::Value};
//!
//! let table = lua_table! {1, 2, name = "three"};
//! let decoded = decode(&encode(&table).unwrap()).unwrap();
//! assert_eq!(decoded.get(&Value::from("name")), Value::from("three"));
//! ```

use crate::{recursion::ensure_sufficient_stack, vm::{table::{Table, TableRef}, value::Value}};
use hashbrown::{HashMap, HashSet};
use std::{cell::RefCell, rc::Rc};
use thiserror::Error;
use tracing::trace;

pub const MAGIC: &[u8; 4] = b"STBL";
pub const VERSION: u8 = 1;

const FALSE: u8 = 0;
const TRUE: u8 = 1;
const INTEGER: u8 = 2;
const FLOAT: u8 = 3;
const STRING: u8 = 4;

const PUSH: u8 = 0x01;
const SET: u8 = 0x02;
const NEW_TABLE: u8 = 0x03;
const END_TABLE: u8 = 0x04;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CodecError {
	#[error("can't encode a {0} value")]
	Unsupported(&'static str),
	#[error("can't encode a table which contains itself")]
	Cycle,
	#[error("too many constants or instructions")]
	TooLarge,
	#[error("not an encoded table")]
	BadMagic,
	#[error("unsupported version {0}")]
	BadVersion(u8),
	#[error("unexpected end of input")]
	Truncated,
	#[error("unknown constant tag {0:#04x}")]
	BadTag(u8),
	#[error("unknown opcode {0:#04x}")]
	BadOpcode(u8),
	#[error("constant {0} doesn't exist")]
	BadConstant(u32),
	#[error("string constant isn't valid UTF-8")]
	Utf8,
	#[error("stack underflow")]
	StackUnderflow,
	#[error("tables aren't balanced")]
	Unbalanced,
	#[error("table key is NaN")]
	NanKey,
	#[error("{0} bytes after the end of the code")]
	TrailingBytes(usize)
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum Constant {
	Boolean(bool),
	/// The bits of a number, and its integer hint.
	Number(u64, bool),
	String(Rc<str>)
}

impl Constant {
	fn value(&self) -> Value {
		match self {
			Self::Boolean(boolean) => Value::Boolean(*boolean),
			Self::Number(bits, integer) => Value::Number(f64::from_bits(*bits), *integer),
			Self::String(string) => Value::String(string.clone())
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Instruction {
	Push(u32),
	Set,
	NewTable,
	EndTable
}

#[derive(Default)]
struct Encoder {
	pool: HashMap<Constant, u32>,
	constants: Vec<Constant>,
	code: Vec<Instruction>,
	/// Tables currently being encoded.
	open: HashSet<*const RefCell<Table>>
}

impl Encoder {
	fn constant(&mut self, constant: Constant) -> Result<(), CodecError> {
		let index = match self.pool.get(&constant) {
			Some(index) => *index,
			None => {
				let index = u32::try_from(self.constants.len())
					.map_err(|_| CodecError::TooLarge)?;
				self.constants.push(constant.clone());
				self.pool.insert(constant, index);
				index
			}
		};

		self.code.push(Instruction::Push(index));
		Ok(())
	}

	fn entries(&mut self, table: &Table) -> Result<(), CodecError> {
		for (key, value) in table.iter() {
			self.value(key)?;
			self.value(value)?;
			self.code.push(Instruction::Set);
		}

		Ok(())
	}

	fn value(&mut self, value: &Value) -> Result<(), CodecError> {
		match value {
			Value::Boolean(boolean) => self.constant(Constant::Boolean(*boolean)),
			Value::Number(number, integer) =>
				self.constant(Constant::Number(number.to_bits(), *integer)),
			Value::String(string) => self.constant(Constant::String(string.clone())),
			Value::Table(table) => self.nested(table),
			other => Err(CodecError::Unsupported(other.type_name()))
		}
	}

	fn nested(&mut self, table: &TableRef) -> Result<(), CodecError> {
		let address = Rc::as_ptr(table);
		if !self.open.insert(address) {return Err(CodecError::Cycle)}

		self.code.push(Instruction::NewTable);
		ensure_sufficient_stack(|| self.entries(&table.borrow()))?;
		self.code.push(Instruction::EndTable);

		self.open.remove(&address);
		Ok(())
	}

	fn finish(self) -> Result<Vec<u8>, CodecError> {
		let mut bytes = MAGIC.to_vec();
		bytes.push(VERSION);

		write_count(&mut bytes, self.constants.len())?;
		self.constants.iter().for_each(|constant| match constant {
			Constant::Boolean(false) => bytes.push(FALSE),
			Constant::Boolean(true) => bytes.push(TRUE),
			Constant::Number(bits, integer) => {
				bytes.push(if *integer {INTEGER} else {FLOAT});
				bytes.extend(bits.to_le_bytes());
			},
			Constant::String(string) => {
				bytes.push(STRING);
				bytes.extend((string.len() as u32).to_le_bytes());
				bytes.extend(string.as_bytes());
			}
		});

		write_count(&mut bytes, self.code.len())?;
		self.code.iter().for_each(|instruction| match instruction {
			Instruction::Push(index) => {
				bytes.push(PUSH);
				bytes.extend(index.to_le_bytes());
			},
			Instruction::Set => bytes.push(SET),
			Instruction::NewTable => bytes.push(NEW_TABLE),
			Instruction::EndTable => bytes.push(END_TABLE)
		});

		Ok(bytes)
	}
}

fn write_count(bytes: &mut Vec<u8>, count: usize) -> Result<(), CodecError> {
	let count = u32::try_from(count).map_err(|_| CodecError::TooLarge)?;
	bytes.extend(count.to_le_bytes());
	Ok(())
}

/// Encodes a table, and every table inside it.
pub fn encode(table: &Table) -> Result<Vec<u8>, CodecError> {
	let mut encoder = Encoder::default();
	encoder.entries(table)?;
	trace!(constants = encoder.constants.len(), instructions = encoder.code.len(),
		"encoded table");
	encoder.finish()
}

struct Reader<'b> {
	bytes: &'b [u8],
	position: usize
}

impl<'b> Reader<'b> {
	fn take(&mut self, count: usize) -> Result<&'b [u8], CodecError> {
		let end = self.position.checked_add(count).ok_or(CodecError::Truncated)?;
		let taken = self.bytes.get(self.position..end).ok_or(CodecError::Truncated)?;
		self.position = end;
		Ok(taken)
	}

	fn byte(&mut self) -> Result<u8, CodecError> {
		Ok(self.take(1)?[0])
	}

	fn u32(&mut self) -> Result<u32, CodecError> {
		let mut buffer = [0; 4];
		buffer.copy_from_slice(self.take(4)?);
		Ok(u32::from_le_bytes(buffer))
	}

	fn u64(&mut self) -> Result<u64, CodecError> {
		let mut buffer = [0; 8];
		buffer.copy_from_slice(self.take(8)?);
		Ok(u64::from_le_bytes(buffer))
	}

	fn remaining(&self) -> usize {
		self.bytes.len() - self.position
	}

	fn constant(&mut self) -> Result<Constant, CodecError> {
		Ok(match self.byte()? {
			FALSE => Constant::Boolean(false),
			TRUE => Constant::Boolean(true),
			INTEGER => Constant::Number(self.u64()?, true),
			FLOAT => Constant::Number(self.u64()?, false),
			STRING => {
				let len = self.u32()? as usize;
				let string = std::str::from_utf8(self.take(len)?)
					.map_err(|_| CodecError::Utf8)?;
				Constant::String(string.into())
			},
			tag => return Err(CodecError::BadTag(tag))
		})
	}

	fn instruction(&mut self) -> Result<Instruction, CodecError> {
		Ok(match self.byte()? {
			PUSH => Instruction::Push(self.u32()?),
			SET => Instruction::Set,
			NEW_TABLE => Instruction::NewTable,
			END_TABLE => Instruction::EndTable,
			opcode => return Err(CodecError::BadOpcode(opcode))
		})
	}
}

/// Decodes a table encoded by [encode].
pub fn decode(bytes: &[u8]) -> Result<Table, CodecError> {
	let mut reader = Reader {bytes, position: 0};
	if reader.take(MAGIC.len()).map_err(|_| CodecError::BadMagic)? != MAGIC
		{return Err(CodecError::BadMagic)}
	match reader.byte()? {
		VERSION => (),
		version => return Err(CodecError::BadVersion(version))
	}

	let constants = (0..reader.u32()?)
		.map(|_| reader.constant().map(|constant| constant.value()))
		.collect::<Result<Vec<_>, _>>()?;

	let mut values = Vec::new();
	let mut tables = vec![Table::new()];
	for _ in 0..reader.u32()? {
		match reader.instruction()? {
			Instruction::Push(index) => values.push(constants.get(index as usize)
				.cloned().ok_or(CodecError::BadConstant(index))?),
			Instruction::Set => {
				let value = values.pop().ok_or(CodecError::StackUnderflow)?;
				let key = values.pop().ok_or(CodecError::StackUnderflow)?;
				if matches!(key, Value::Number(number, _) if number.is_nan())
					{return Err(CodecError::NanKey)}
				match tables.last_mut() {
					Some(table) => table.set(key, value),
					None => return Err(CodecError::Unbalanced)
				}
			},
			Instruction::NewTable => tables.push(Table::new()),
			Instruction::EndTable => match tables.len() {
				0 | 1 => return Err(CodecError::Unbalanced),
				_ => if let Some(table) = tables.pop()
					{values.push(Value::Table(table.shared()))}
			}
		}
	}

	match reader.remaining() {
		0 => (),
		remaining => return Err(CodecError::TrailingBytes(remaining))
	}
	if !values.is_empty() {return Err(CodecError::Unbalanced)}

	match (tables.pop(), tables.is_empty()) {
		(Some(root), true) => Ok(root),
		_ => Err(CodecError::Unbalanced)
	}
}

#[cfg(test)]
mod tests {
	use self::super::{CodecError, MAGIC, decode, encode};
	use crate::{lua_table, vm::{table::Table, value::Value}};
	use itertools::assert_equal;

	fn join(parts: &[&[u8]]) -> Vec<u8> {
		parts.concat()
	}

	fn keys(table: &Table) -> Vec<Value> {
		table.iter().map(|(key, _)| key.clone()).collect()
	}

	#[test]
	fn nested_tables_survive() {
		let table = lua_table! {
			1, 2.5, "three",
			flag = false,
			inner = lua_table! {z = 1, a = true, [10] = "ten"}
		};

		let decoded = decode(&encode(&table).unwrap()).unwrap();
		assert_equal(keys(&decoded), keys(&table));
		assert_eq!(decoded.get(&Value::from(2)), Value::from(2.5));
		assert_eq!(decoded.get(&Value::from("flag")), Value::Boolean(false));

		let inner = decoded.get(&Value::from("inner"));
		let inner = inner.table().unwrap().borrow();
		assert_equal(keys(&inner), vec![Value::from("z"), Value::from("a"), Value::from(10)]);
		assert_eq!(inner.get(&Value::from(10)), Value::from("ten"));
	}

	#[test]
	fn integer_hints_survive() {
		let table = lua_table! {1, 1.0};
		let decoded = decode(&encode(&table).unwrap()).unwrap();

		assert!(matches!(decoded.get(&Value::from(1)), Value::Number(_, true)));
		assert!(matches!(decoded.get(&Value::from(2)), Value::Number(_, false)));
	}

	#[test]
	fn constants_are_shared() {
		let once = encode(&lua_table! {a = "value"}).unwrap();
		let twice = encode(&lua_table! {a = "value", b = "value"}).unwrap();

		// One more key constant, and one more PUSH, PUSH, SET.
		assert_eq!(twice.len() - once.len(), (1 + 4 + 1) + (5 + 5 + 1));
	}

	#[test]
	fn empty_table() {
		let bytes = encode(&Table::new()).unwrap();

		assert_eq!(bytes, join(&[MAGIC, &[1, 0, 0, 0, 0, 0, 0, 0, 0]]));
		assert!(decode(&bytes).unwrap().is_empty());
	}

	#[test]
	fn unsupported_values() {
		let table = lua_table! {f = Value::native(|_, _| Ok(0))};
		assert_eq!(encode(&table), Err(CodecError::Unsupported("function")));
	}

	#[test]
	fn cycles() {
		let inner = Table::new().shared();
		inner.borrow_mut().set(Value::from("self"), Value::Table(inner.clone()));
		let table = lua_table! {inner = inner.clone()};

		assert_eq!(encode(&table), Err(CodecError::Cycle));
		inner.borrow_mut().set(Value::from("self"), Value::Nil);

		// The same table twice is not a cycle.
		let shared = lua_table! {1, 2}.shared();
		let table = lua_table! {a = shared.clone(), b = shared};
		assert!(encode(&table).is_ok());
	}

	#[test]
	fn malformed_input() {
		let valid = encode(&lua_table! {a = lua_table! {1}}).unwrap();

		assert_eq!(decode(b"NOPE"), Err(CodecError::BadMagic));
		assert_eq!(decode(b"ST"), Err(CodecError::BadMagic));
		assert_eq!(decode(&join(&[MAGIC, &[9]])), Err(CodecError::BadVersion(9)));
		assert_eq!(decode(&valid[..valid.len() - 1]), Err(CodecError::Truncated));
		assert_eq!(decode(&join(&[&valid, &[0]])), Err(CodecError::TrailingBytes(1)));

		let header = join(&[MAGIC, &[1]]);
		let malformed = |body: &[u8]| decode(&join(&[&header, body]));
		assert_eq!(malformed(&[1, 0, 0, 0, 7]), Err(CodecError::BadTag(7)));
		assert_eq!(malformed(&[1, 0, 0, 0, 4, 1, 0, 0, 0, 0xff]), Err(CodecError::Utf8));
		assert_eq!(malformed(&[0, 0, 0, 0, 1, 0, 0, 0, 9]), Err(CodecError::BadOpcode(9)));
		assert_eq!(malformed(&[0, 0, 0, 0, 1, 0, 0, 0, 2]), Err(CodecError::StackUnderflow));
		assert_eq!(malformed(&[0, 0, 0, 0, 1, 0, 0, 0, 4]), Err(CodecError::Unbalanced));
		assert_eq!(malformed(&[0, 0, 0, 0, 1, 0, 0, 0, 3]), Err(CodecError::Unbalanced));
		assert_eq!(malformed(&[0, 0, 0, 0, 1, 0, 0, 0, 1, 5, 0, 0, 0]),
			Err(CodecError::BadConstant(5)));
	}

	#[test]
	fn nan_keys() {
		let nan = f64::NAN.to_bits().to_le_bytes();
		let bytes = join(&[
			MAGIC, &[1],
			&[2, 0, 0, 0], &[3], &nan, &[1],
			&[3, 0, 0, 0], &[1, 0, 0, 0, 0], &[1, 1, 0, 0, 0], &[2]
		]);
		assert_eq!(decode(&bytes), Err(CodecError::NanKey));

		// NaN is still fine as a value.
		let bytes = join(&[
			MAGIC, &[1],
			&[2, 0, 0, 0], &[1], &[3], &nan,
			&[3, 0, 0, 0], &[1, 0, 0, 0, 0], &[1, 1, 0, 0, 0], &[2]
		]);
		let decoded = decode(&bytes).unwrap();
		assert!(matches!(decoded.get(&Value::Boolean(true)), Value::Number(number, false)
			if number.is_nan()));
	}

	#[test]
	fn deeply_nested_tables() {
		let mut table = Table::new();
		for _ in 0..100_000 {
			let mut outer = Table::new();
			outer.set(Value::from(1), Value::Table(table.shared()));
			table = outer;
		}

		let bytes = encode(&table).unwrap();
		assert!(bytes.len() > 100_000 * 2);
		// Dropping a chain this deep recurses once per table.
		std::mem::forget(table);
	}
}
