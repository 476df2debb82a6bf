//! Binary serialization of values
//!
//! Fixed-width types write their native width in network byte order, with
//! null encoded as the type's sentinel. Variable-length types write an `i32`
//! length prefix (`-1` for null) followed by the raw bytes.

use super::{TypeId, Value, Varlen, limits};
use crate::error::{Error, Result};
use bytes::{Buf, BytesMut};

/// Destination for serialized bytes
pub trait ByteSink {
    /// Append bytes, failing if the sink is bounded and full
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

impl ByteSink for BytesMut {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

impl ByteSink for Vec<u8> {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Typed writer over a [`ByteSink`]
pub struct SerializeOutput<S: ByteSink> {
    sink: S,
}

impl<S: ByteSink> SerializeOutput<S> {
    /// Wrap a sink
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Write one signed byte
    pub fn write_byte(&mut self, v: i8) -> Result<()> {
        self.sink.put_bytes(&v.to_be_bytes())
    }

    /// Write a 16-bit integer
    pub fn write_short(&mut self, v: i16) -> Result<()> {
        self.sink.put_bytes(&v.to_be_bytes())
    }

    /// Write a 32-bit integer
    pub fn write_int(&mut self, v: i32) -> Result<()> {
        self.sink.put_bytes(&v.to_be_bytes())
    }

    /// Write a 64-bit integer
    pub fn write_long(&mut self, v: i64) -> Result<()> {
        self.sink.put_bytes(&v.to_be_bytes())
    }

    /// Write an unsigned 64-bit integer
    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.sink.put_bytes(&v.to_be_bytes())
    }

    /// Write a double by bit pattern
    pub fn write_double(&mut self, v: f64) -> Result<()> {
        self.sink.put_bytes(&v.to_bits().to_be_bytes())
    }

    /// Write raw bytes with no prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.put_bytes(bytes)
    }

    /// Write a length-prefixed byte string
    pub fn write_varlen(&mut self, bytes: &[u8]) -> Result<()> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| Error::serialization(format!("{} bytes exceed varlen limit", bytes.len())))?;
        self.write_int(len)?;
        self.write_bytes(bytes)
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Unwrap the sink
    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Typed reader over a byte slice
pub struct SerializeInput<'a> {
    buf: &'a [u8],
}

impl<'a> SerializeInput<'a> {
    /// Read from the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::serialization(format!(
                "need {n} bytes, {} remaining",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read one signed byte
    pub fn read_byte(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    /// Read a 16-bit integer
    pub fn read_short(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    /// Read a 32-bit integer
    pub fn read_int(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a 64-bit integer
    pub fn read_long(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read an unsigned 64-bit integer
    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    /// Read a double by bit pattern
    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

impl Value {
    /// Number of bytes [`Value::serialize_to`] writes
    pub fn serialized_size(&self) -> usize {
        match self.type_id().fixed_size() {
            Some(size) => size,
            None => 4 + self.as_bytes().map_or(0, <[u8]>::len),
        }
    }

    /// Write the value
    pub fn serialize_to<S: ByteSink>(&self, out: &mut SerializeOutput<S>) -> Result<()> {
        match self {
            Value::Null(t) => match t {
                TypeId::Boolean => out.write_byte(limits::BOOLEAN_NULL),
                TypeId::TinyInt => out.write_byte(limits::TINYINT_NULL),
                TypeId::SmallInt => out.write_short(limits::SMALLINT_NULL),
                TypeId::Integer => out.write_int(limits::INTEGER_NULL),
                TypeId::BigInt => out.write_long(limits::BIGINT_NULL),
                TypeId::Decimal => out.write_double(limits::DECIMAL_NULL),
                TypeId::Timestamp => out.write_u64(limits::TIMESTAMP_NULL),
                TypeId::Varchar | TypeId::Varbinary => out.write_int(limits::VARLEN_NULL_LENGTH),
            },
            Value::Boolean(b) => out.write_byte(*b as i8),
            Value::TinyInt(v) => out.write_byte(*v),
            Value::SmallInt(v) => out.write_short(*v),
            Value::Integer(v) => out.write_int(*v),
            Value::BigInt(v) => out.write_long(*v),
            Value::Decimal(v) => out.write_double(*v),
            Value::Timestamp(v) => out.write_u64(*v),
            Value::Varchar(v) | Value::Varbinary(v) => out.write_varlen(v.as_bytes()),
        }
    }

    /// Read a value of a known type
    pub fn deserialize_from(type_id: TypeId, input: &mut SerializeInput<'_>) -> Result<Value> {
        let value = match type_id {
            TypeId::Boolean => match input.read_byte()? {
                limits::BOOLEAN_NULL => Value::Null(TypeId::Boolean),
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(Error::serialization(format!("invalid boolean byte {other}")));
                }
            },
            TypeId::TinyInt => Value::tinyint(input.read_byte()?),
            TypeId::SmallInt => Value::smallint(input.read_short()?),
            TypeId::Integer => Value::integer(input.read_int()?),
            TypeId::BigInt => Value::bigint(input.read_long()?),
            TypeId::Decimal => Value::decimal(input.read_double()?),
            TypeId::Timestamp => Value::timestamp(input.read_u64()?),
            TypeId::Varchar | TypeId::Varbinary => {
                let len = input.read_int()?;
                if len == limits::VARLEN_NULL_LENGTH {
                    Value::Null(type_id)
                } else {
                    let len = usize::try_from(len)
                        .map_err(|_| Error::serialization(format!("negative length {len}")))?;
                    let payload = Varlen::owned(input.read_bytes(len)?.to_vec());
                    if type_id == TypeId::Varchar {
                        Value::Varchar(payload)
                    } else {
                        Value::Varbinary(payload)
                    }
                }
            }
        };
        Ok(value)
    }
}

/// Write a self-describing tuple: a 16-bit count, then a type tag and the
/// serialized value for each column
pub fn serialize_tuple<S: ByteSink>(values: &[Value], out: &mut SerializeOutput<S>) -> Result<()> {
    let count = i16::try_from(values.len())
        .map_err(|_| Error::serialization(format!("{} columns exceed tuple limit", values.len())))?;
    out.write_short(count)?;
    for value in values {
        out.write_byte(value.type_id().tag() as i8)?;
        value.serialize_to(out)?;
    }
    Ok(())
}

/// Inverse of [`serialize_tuple`]
pub fn deserialize_tuple(input: &mut SerializeInput<'_>) -> Result<Vec<Value>> {
    let count = input.read_short()?;
    let count = usize::try_from(count)
        .map_err(|_| Error::serialization(format!("negative column count {count}")))?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = input.read_byte()? as u8;
        let type_id = TypeId::from_tag(tag)
            .ok_or_else(|| Error::serialization(format!("unknown type tag {tag}")))?;
        values.push(Value::deserialize_from(type_id, input)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &Value) -> Value {
        let mut out = SerializeOutput::new(BytesMut::new());
        value.serialize_to(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), value.serialized_size());
        let mut input = SerializeInput::new(&bytes);
        let decoded = Value::deserialize_from(value.type_id(), &mut input).unwrap();
        assert_eq!(input.remaining(), 0);
        decoded
    }

    #[test]
    fn test_nulls_round_trip() {
        for t in TypeId::ALL {
            let null = Value::null(t);
            assert_eq!(round_trip(&null), null);
        }
    }

    #[test]
    fn test_varlen_edge_lengths() {
        let empty = Value::varchar("");
        assert_eq!(round_trip(&empty), empty);
        let large = Value::varbinary(vec![0xab; 1 << 20]);
        assert_eq!(round_trip(&large), large);
    }

    #[test]
    fn test_network_byte_order() {
        let mut out = SerializeOutput::new(Vec::new());
        Value::integer(1).serialize_to(&mut out).unwrap();
        assert_eq!(out.into_inner(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_truncated_input_fails() {
        let mut input = SerializeInput::new(&[0, 0]);
        assert!(matches!(
            Value::deserialize_from(TypeId::Integer, &mut input),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_tuple_round_trip() {
        let tuple = vec![
            Value::integer(7),
            Value::null(TypeId::Varchar),
            Value::varchar("seven"),
            Value::decimal(7.5),
        ];
        let mut out = SerializeOutput::new(BytesMut::new());
        serialize_tuple(&tuple, &mut out).unwrap();
        let bytes = out.into_inner();
        let decoded = deserialize_tuple(&mut SerializeInput::new(&bytes)).unwrap();
        assert_eq!(decoded, tuple);
    }
}
