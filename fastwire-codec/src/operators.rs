/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! FAST field operators.
//!
//! Operators define how a field value is reconstructed from at most one
//! presence bit, at most one wire value and the field's dictionary slot.
//! The routines here are generic over the scalar kind, so every combination
//! of width, signedness, nullability and operator is specialised at compile
//! time.
//!
//! | Operator  | Presence bit | Absent (bit 0)   | Slot update            |
//! |-----------|--------------|------------------|------------------------|
//! | None      | no           | n/a              | slot := value          |
//! | Constant  | yes          | slot             | never                  |
//! | Copy      | yes          | slot             | slot := value          |
//! | Increment | yes          | slot + 1         | slot := value          |
//! | Default   | yes          | slot             | never                  |
//! | Delta     | no           | n/a              | slot := slot + delta   |
//!
//! Nullable fields store the wire representation in their slot (0 is null),
//! except under Delta where the slot keeps the logical value.

use fastwire_core::{FastError, Operator, Result, Token};
use fastwire_primitive::{ByteSink, ByteSource, PrimitiveReader, PrimitiveWriter};
use num_traits::{CheckedAdd, PrimInt, WrappingAdd};
use std::fmt;

const DELTA_RANGE: FastError = FastError::MalformedField {
    reason: "delta leaves the field range",
};

/// An integer kind the operator engine can decode and encode.
pub trait Scalar: PrimInt + WrappingAdd + fmt::Debug + fmt::Display {
    /// Dictionary array element type the kind is stored in.
    type Slot: Copy + Default;

    /// Reinterprets a dictionary slot as this kind.
    fn from_slot(slot: Self::Slot) -> Self;

    /// Reinterprets this value as a dictionary slot.
    fn into_slot(self) -> Self::Slot;

    /// Reads one wire value of this kind.
    ///
    /// # Errors
    /// Propagates primitive read errors.
    fn read<S: ByteSource>(reader: &mut PrimitiveReader<S>) -> Result<Self>;

    /// Writes one wire value of this kind.
    ///
    /// # Errors
    /// Propagates primitive write errors.
    fn write<K: ByteSink>(self, writer: &mut PrimitiveWriter<K>) -> Result<()>;

    /// Difference `self - previous` as carried on the wire.
    fn delta_from(self, previous: Self) -> i64;

    /// Applies a wire delta, or `None` if the result leaves the kind's range.
    fn apply_delta(self, delta: i64) -> Option<Self>;

    /// Nullable wire representation of a logical value.
    ///
    /// Returns `None` for the top of the range, which has no representation.
    fn to_nullable(self) -> Option<Self> {
        if self < Self::zero() {
            Some(self)
        } else {
            CheckedAdd::checked_add(&self, &Self::one())
        }
    }

    /// Logical value of a nullable wire representation, `None` for null.
    fn from_nullable(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else if self < Self::zero() {
            Some(self)
        } else {
            Some(self - Self::one())
        }
    }
}

macro_rules! impl_scalar_32 {
    ($ty:ty, $read:ident, $write:ident) => {
        impl Scalar for $ty {
            type Slot = i32;

            #[inline]
            fn from_slot(slot: i32) -> Self {
                slot as $ty
            }

            #[inline]
            fn into_slot(self) -> i32 {
                self as i32
            }

            #[inline]
            fn read<S: ByteSource>(reader: &mut PrimitiveReader<S>) -> Result<Self> {
                reader.$read()
            }

            #[inline]
            fn write<K: ByteSink>(self, writer: &mut PrimitiveWriter<K>) -> Result<()> {
                writer.$write(self)
            }

            #[inline]
            fn delta_from(self, previous: Self) -> i64 {
                i64::from(self) - i64::from(previous)
            }

            #[inline]
            fn apply_delta(self, delta: i64) -> Option<Self> {
                i64::from(self)
                    .checked_add(delta)
                    .and_then(|next| <$ty>::try_from(next).ok())
            }
        }
    };
}

impl_scalar_32!(u32, read_u32, write_u32);
impl_scalar_32!(i32, read_i32, write_i32);

impl Scalar for u64 {
    type Slot = i64;

    #[inline]
    fn from_slot(slot: i64) -> Self {
        slot as u64
    }

    #[inline]
    fn into_slot(self) -> i64 {
        self as i64
    }

    #[inline]
    fn read<S: ByteSource>(reader: &mut PrimitiveReader<S>) -> Result<Self> {
        reader.read_u64()
    }

    #[inline]
    fn write<K: ByteSink>(self, writer: &mut PrimitiveWriter<K>) -> Result<()> {
        writer.write_u64(self)
    }

    // 64-bit deltas wrap, so every pair of values has an encoding
    #[inline]
    fn delta_from(self, previous: Self) -> i64 {
        self.wrapping_sub(previous) as i64
    }

    #[inline]
    fn apply_delta(self, delta: i64) -> Option<Self> {
        Some(self.wrapping_add(delta as u64))
    }
}

impl Scalar for i64 {
    type Slot = i64;

    #[inline]
    fn from_slot(slot: i64) -> Self {
        slot
    }

    #[inline]
    fn into_slot(self) -> i64 {
        self
    }

    #[inline]
    fn read<S: ByteSource>(reader: &mut PrimitiveReader<S>) -> Result<Self> {
        reader.read_i64()
    }

    #[inline]
    fn write<K: ByteSink>(self, writer: &mut PrimitiveWriter<K>) -> Result<()> {
        writer.write_i64(self)
    }

    #[inline]
    fn delta_from(self, previous: Self) -> i64 {
        self.wrapping_sub(previous)
    }

    #[inline]
    fn apply_delta(self, delta: i64) -> Option<Self> {
        Some(self.wrapping_add(delta))
    }
}

/// Decodes a mandatory field.
///
/// # Arguments
/// * `reader` - Stream positioned at the field
/// * `operator` - Operator of the field
/// * `slot` - The field's dictionary slot
///
/// # Errors
/// Returns `FastError::MalformedField` if a delta leaves the kind's range and
/// propagates primitive read errors.
pub fn decode<T: Scalar, S: ByteSource>(
    reader: &mut PrimitiveReader<S>,
    operator: Operator,
    slot: &mut T,
) -> Result<T> {
    match operator {
        Operator::None => {
            *slot = T::read(reader)?;
            Ok(*slot)
        }
        Operator::Constant | Operator::Default => {
            if reader.pop_bit()? {
                T::read(reader)
            } else {
                Ok(*slot)
            }
        }
        Operator::Copy => {
            if reader.pop_bit()? {
                *slot = T::read(reader)?;
            }
            Ok(*slot)
        }
        Operator::Increment => {
            *slot = if reader.pop_bit()? {
                T::read(reader)?
            } else {
                slot.wrapping_add(&T::one())
            };
            Ok(*slot)
        }
        Operator::Delta => {
            let delta = reader.read_i64()?;
            *slot = slot.apply_delta(delta).ok_or(DELTA_RANGE)?;
            Ok(*slot)
        }
    }
}

/// Decodes a nullable field.
///
/// # Errors
/// Returns `FastError::ValueOutOfRange` if an increment runs past the top of
/// the nullable range, `FastError::MalformedField` if a delta leaves the
/// kind's range, and propagates primitive read errors.
pub fn decode_optional<T: Scalar, S: ByteSource>(
    reader: &mut PrimitiveReader<S>,
    token: Token,
    operator: Operator,
    slot: &mut T,
) -> Result<Option<T>> {
    match operator {
        Operator::None => {
            *slot = T::read(reader)?;
            Ok(slot.from_nullable())
        }
        Operator::Constant => {
            if reader.pop_bit()? {
                Ok(slot.from_nullable())
            } else {
                Ok(None)
            }
        }
        Operator::Copy => {
            if reader.pop_bit()? {
                *slot = T::read(reader)?;
            }
            Ok(slot.from_nullable())
        }
        Operator::Increment => {
            if reader.pop_bit()? {
                *slot = T::read(reader)?;
                return Ok(slot.from_nullable());
            }
            let Some(previous) = slot.from_nullable() else {
                return Ok(None);
            };
            let next = previous.wrapping_add(&T::one());
            *slot = next
                .to_nullable()
                .ok_or(FastError::ValueOutOfRange { token })?;
            Ok(Some(next))
        }
        Operator::Default => {
            if reader.pop_bit()? {
                Ok(T::read(reader)?.from_nullable())
            } else {
                Ok(slot.from_nullable())
            }
        }
        Operator::Delta => {
            let wire = reader.read_i64()?;
            if wire == 0 {
                *slot = T::zero();
                return Ok(None);
            }
            let delta = if wire > 0 { wire - 1 } else { wire };
            *slot = slot.apply_delta(delta).ok_or(DELTA_RANGE)?;
            Ok(Some(*slot))
        }
    }
}

/// Encodes a mandatory field, updating the slot exactly as [`decode`] would.
///
/// # Errors
/// Returns `FastError::ConstantMismatch` if a constant field is given a
/// different value, and propagates primitive write errors.
pub fn encode<T: Scalar, K: ByteSink>(
    writer: &mut PrimitiveWriter<K>,
    token: Token,
    operator: Operator,
    value: T,
    slot: &mut T,
) -> Result<()> {
    match operator {
        Operator::None => {
            *slot = value;
            value.write(writer)
        }
        Operator::Constant => {
            if value != *slot {
                return Err(FastError::ConstantMismatch { token });
            }
            writer.push_bit(false)
        }
        Operator::Default => write_unless(writer, value, value == *slot),
        Operator::Copy => {
            let predicted = value == *slot;
            *slot = value;
            write_unless(writer, value, predicted)
        }
        Operator::Increment => {
            let predicted = value == slot.wrapping_add(&T::one());
            *slot = value;
            write_unless(writer, value, predicted)
        }
        Operator::Delta => {
            let delta = value.delta_from(*slot);
            *slot = value;
            writer.write_i64(delta)
        }
    }
}

/// Encodes a nullable field, updating the slot exactly as
/// [`decode_optional`] would.
///
/// # Errors
/// Returns `FastError::ValueOutOfRange` if the value has no nullable
/// representation, `FastError::ConstantMismatch` if a constant field is given
/// a different value, and propagates primitive write errors.
pub fn encode_optional<T: Scalar, K: ByteSink>(
    writer: &mut PrimitiveWriter<K>,
    token: Token,
    operator: Operator,
    value: Option<T>,
    slot: &mut T,
) -> Result<()> {
    match operator {
        Operator::None => {
            let wire = nullable(token, value)?;
            *slot = wire;
            wire.write(writer)
        }
        Operator::Constant => match value {
            None => writer.push_bit(false),
            Some(_) if nullable(token, value)? == *slot => writer.push_bit(true),
            Some(_) => Err(FastError::ConstantMismatch { token }),
        },
        Operator::Default => {
            let wire = nullable(token, value)?;
            write_unless(writer, wire, wire == *slot)
        }
        Operator::Copy => {
            let wire = nullable(token, value)?;
            let predicted = wire == *slot;
            *slot = wire;
            write_unless(writer, wire, predicted)
        }
        Operator::Increment => {
            let wire = nullable(token, value)?;
            let predicted = match (slot.from_nullable(), value) {
                (Some(previous), Some(value)) => value == previous.wrapping_add(&T::one()),
                (None, None) => true,
                _ => false,
            };
            *slot = wire;
            write_unless(writer, wire, predicted)
        }
        Operator::Delta => {
            let Some(value) = value else {
                *slot = T::zero();
                return writer.write_i64(0);
            };
            let delta = value.delta_from(*slot);
            let wire = if delta >= 0 {
                delta
                    .checked_add(1)
                    .ok_or(FastError::ValueOutOfRange { token })?
            } else {
                delta
            };
            *slot = value;
            writer.write_i64(wire)
        }
    }
}

#[inline]
fn nullable<T: Scalar>(token: Token, value: Option<T>) -> Result<T> {
    match value {
        Some(value) => value
            .to_nullable()
            .ok_or(FastError::ValueOutOfRange { token }),
        None => Ok(T::zero()),
    }
}

#[inline]
fn write_unless<T: Scalar, K: ByteSink>(
    writer: &mut PrimitiveWriter<K>,
    wire: T,
    predicted: bool,
) -> Result<()> {
    writer.push_bit(!predicted)?;
    if predicted { Ok(()) } else { wire.write(writer) }
}
