/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Field dictionary.
//!
//! The dictionary holds the last-value state operators consult. It is a set
//! of flat arrays sized once at construction: 32-bit integers, 64-bit
//! integers, decimal exponents and decimal mantissas. Each array length is a
//! power of two, so a token's slot is its instance masked by `len - 1`.
//!
//! Every array has a copy holding the initial values, restored by
//! [`Dictionary::reset`].

use crate::operators::Scalar;
use fastwire_core::{DecimalValue, FastError, MAX_INSTANCE, Operator, Result, Token, TypeKind};
use tracing::debug;

/// Dictionary array a token's slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotBank {
    /// 32-bit integers, signed and unsigned.
    Int,
    /// 64-bit integers, signed and unsigned.
    Long,
    /// Decimal exponents and mantissas.
    Decimal,
}

impl SlotBank {
    /// Returns the bank a token of `kind` uses, or `None` for text kinds.
    #[must_use]
    pub const fn for_kind(kind: TypeKind) -> Option<Self> {
        if kind.is_text() {
            return None;
        }
        Some(match kind {
            TypeKind::Decimal | TypeKind::DecimalOptional => Self::Decimal,
            TypeKind::LongUnsigned
            | TypeKind::LongUnsignedOptional
            | TypeKind::LongSigned
            | TypeKind::LongSignedOptional => Self::Long,
            _ => Self::Int,
        })
    }
}

/// Per-stream last-value state for every integer and decimal field.
#[derive(Debug, Clone)]
pub struct Dictionary {
    ints: Box<[i32]>,
    longs: Box<[i64]>,
    exponents: Box<[i32]>,
    mantissas: Box<[i64]>,
    ints_init: Box<[i32]>,
    longs_init: Box<[i64]>,
    exponents_init: Box<[i32]>,
    mantissas_init: Box<[i64]>,
}

impl Dictionary {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> DictionaryBuilder {
        DictionaryBuilder::new()
    }

    /// Restores every slot to its initial value.
    pub fn reset(&mut self) {
        self.ints.copy_from_slice(&self.ints_init);
        self.longs.copy_from_slice(&self.longs_init);
        self.exponents.copy_from_slice(&self.exponents_init);
        self.mantissas.copy_from_slice(&self.mantissas_init);
        debug!(
            ints = self.ints.len(),
            longs = self.longs.len(),
            decimals = self.exponents.len(),
            "dictionary reset"
        );
    }

    /// Returns the number of slots in a bank.
    #[must_use]
    pub fn capacity(&self, bank: SlotBank) -> usize {
        match bank {
            SlotBank::Int => self.ints.len(),
            SlotBank::Long => self.longs.len(),
            SlotBank::Decimal => self.exponents.len(),
        }
    }

    /// Checks that every token resolves to a slot inside its bank, and that
    /// text tokens use no operator.
    ///
    /// # Errors
    /// Returns `FastError::DictionaryBounds` for the first token outside its
    /// bank and `FastError::TokenMismatch` for a text token with an operator.
    pub fn validate(&self, tokens: &[Token]) -> Result<()> {
        tokens.iter().try_for_each(|&token| self.check(token))
    }

    fn check(&self, token: Token) -> Result<()> {
        let Some(bank) = SlotBank::for_kind(token.kind()) else {
            if token.operator() != Operator::None {
                return Err(FastError::TokenMismatch {
                    token,
                    expected: token.kind(),
                });
            }
            return Ok(());
        };
        let capacity = self.capacity(bank);
        if token.instance() as usize >= capacity {
            return Err(FastError::DictionaryBounds {
                token,
                instance: token.instance(),
                capacity,
            });
        }
        Ok(())
    }

    #[inline]
    const fn index(instance: u32, len: usize) -> usize {
        instance as usize & (len - 1)
    }

    pub(crate) fn int_slot(&mut self, token: Token) -> &mut i32 {
        let index = Self::index(token.instance(), self.ints.len());
        &mut self.ints[index]
    }

    pub(crate) fn long_slot(&mut self, token: Token) -> &mut i64 {
        let index = Self::index(token.instance(), self.longs.len());
        &mut self.longs[index]
    }

    pub(crate) fn exponent_slot(&mut self, token: Token) -> &mut i32 {
        let index = Self::index(token.instance(), self.exponents.len());
        &mut self.exponents[index]
    }

    pub(crate) fn mantissa_slot(&mut self, token: Token) -> &mut i64 {
        let index = Self::index(token.instance(), self.mantissas.len());
        &mut self.mantissas[index]
    }

    /// Returns the raw 32-bit slot of an integer token.
    #[must_use]
    pub fn int(&self, token: Token) -> i32 {
        self.ints[Self::index(token.instance(), self.ints.len())]
    }

    /// Returns the raw 64-bit slot of a long token.
    #[must_use]
    pub fn long(&self, token: Token) -> i64 {
        self.longs[Self::index(token.instance(), self.longs.len())]
    }

    /// Returns the raw exponent and mantissa slots of a decimal token.
    #[must_use]
    pub fn decimal(&self, token: Token) -> DecimalValue {
        let index = Self::index(token.instance(), self.exponents.len());
        DecimalValue::new(self.exponents[index], self.mantissas[index])
    }
}

#[derive(Debug, Clone, Copy)]
enum Initial {
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Decimal(DecimalValue),
}

impl Initial {
    const fn kind(&self) -> TypeKind {
        match self {
            Self::U32(_) => TypeKind::IntegerUnsigned,
            Self::I32(_) => TypeKind::IntegerSigned,
            Self::U64(_) => TypeKind::LongUnsigned,
            Self::I64(_) => TypeKind::LongSigned,
            Self::Decimal(_) => TypeKind::Decimal,
        }
    }
}

/// Builder for [`Dictionary`].
///
/// Slot counts are rounded up to a power of two. Initial values registered
/// for nullable tokens are stored in their nullable form, so an unregistered
/// nullable slot starts out null.
#[derive(Debug, Clone, Default)]
pub struct DictionaryBuilder {
    int_slots: usize,
    long_slots: usize,
    decimal_slots: usize,
    initial: Vec<(Token, Initial)>,
}

impl DictionaryBuilder {
    /// Creates a builder with one slot per bank.
    #[must_use]
    pub fn new() -> Self {
        Self {
            int_slots: 1,
            long_slots: 1,
            decimal_slots: 1,
            initial: Vec::new(),
        }
    }

    /// Creates a builder sized to cover every instance used by `tokens`.
    #[must_use]
    pub fn for_tokens(tokens: &[Token]) -> Self {
        tokens.iter().fold(Self::new(), |mut builder, token| {
            let needed = token.instance() as usize + 1;
            match SlotBank::for_kind(token.kind()) {
                Some(SlotBank::Int) => builder.int_slots = builder.int_slots.max(needed),
                Some(SlotBank::Long) => builder.long_slots = builder.long_slots.max(needed),
                Some(SlotBank::Decimal) => {
                    builder.decimal_slots = builder.decimal_slots.max(needed);
                }
                None => {}
            }
            builder
        })
    }

    /// Sets the number of 32-bit slots.
    #[must_use]
    pub const fn with_int_slots(mut self, count: usize) -> Self {
        self.int_slots = count;
        self
    }

    /// Sets the number of 64-bit slots.
    #[must_use]
    pub const fn with_long_slots(mut self, count: usize) -> Self {
        self.long_slots = count;
        self
    }

    /// Sets the number of decimal slots.
    #[must_use]
    pub const fn with_decimal_slots(mut self, count: usize) -> Self {
        self.decimal_slots = count;
        self
    }

    /// Registers the initial value of an unsigned 32-bit field.
    #[must_use]
    pub fn with_u32(mut self, token: Token, value: u32) -> Self {
        self.initial.push((token, Initial::U32(value)));
        self
    }

    /// Registers the initial value of a signed 32-bit field.
    #[must_use]
    pub fn with_i32(mut self, token: Token, value: i32) -> Self {
        self.initial.push((token, Initial::I32(value)));
        self
    }

    /// Registers the initial value of an unsigned 64-bit field.
    #[must_use]
    pub fn with_u64(mut self, token: Token, value: u64) -> Self {
        self.initial.push((token, Initial::U64(value)));
        self
    }

    /// Registers the initial value of a signed 64-bit field.
    #[must_use]
    pub fn with_i64(mut self, token: Token, value: i64) -> Self {
        self.initial.push((token, Initial::I64(value)));
        self
    }

    /// Registers the initial exponent and mantissa of a decimal field.
    #[must_use]
    pub fn with_decimal(mut self, token: Token, value: DecimalValue) -> Self {
        self.initial.push((token, Initial::Decimal(value)));
        self
    }

    /// Builds the dictionary.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if a bank exceeds the instance
    /// range, `FastError::TokenMismatch` if an initial value does not match
    /// its token's type, `FastError::DictionaryBounds` if a token lies outside
    /// its bank, and `FastError::ValueOutOfRange` if a nullable initial value
    /// has no nullable form.
    pub fn build(self) -> Result<Dictionary> {
        let ints = bank_len(self.int_slots)?;
        let longs = bank_len(self.long_slots)?;
        let decimals = bank_len(self.decimal_slots)?;

        let mut dictionary = Dictionary {
            ints: vec![0; ints].into_boxed_slice(),
            longs: vec![0; longs].into_boxed_slice(),
            exponents: vec![0; decimals].into_boxed_slice(),
            mantissas: vec![0; decimals].into_boxed_slice(),
            ints_init: Box::default(),
            longs_init: Box::default(),
            exponents_init: Box::default(),
            mantissas_init: Box::default(),
        };

        for (token, initial) in self.initial {
            if token.kind().mandatory() != initial.kind() {
                return Err(FastError::TokenMismatch {
                    token,
                    expected: initial.kind(),
                });
            }
            dictionary.check(token)?;
            let nullable = token.is_optional() && token.operator() != Operator::Delta;
            match initial {
                Initial::U32(value) => {
                    *dictionary.int_slot(token) = stored(token, value, nullable)?.into_slot();
                }
                Initial::I32(value) => {
                    *dictionary.int_slot(token) = stored(token, value, nullable)?;
                }
                Initial::U64(value) => {
                    *dictionary.long_slot(token) = stored(token, value, nullable)?.into_slot();
                }
                Initial::I64(value) => {
                    *dictionary.long_slot(token) = stored(token, value, nullable)?;
                }
                Initial::Decimal(value) => {
                    *dictionary.exponent_slot(token) = stored(token, value.exponent, nullable)?;
                    *dictionary.mantissa_slot(token) = value.mantissa;
                }
            }
        }

        dictionary.ints_init = dictionary.ints.clone();
        dictionary.longs_init = dictionary.longs.clone();
        dictionary.exponents_init = dictionary.exponents.clone();
        dictionary.mantissas_init = dictionary.mantissas.clone();
        debug!(ints, longs, decimals, "dictionary built");
        Ok(dictionary)
    }
}

fn bank_len(count: usize) -> Result<usize> {
    let len = count.max(1).next_power_of_two();
    if len > MAX_INSTANCE as usize {
        return Err(FastError::InvalidConfig(format!(
            "dictionary bank of {count} slots exceeds {MAX_INSTANCE} instances"
        )));
    }
    Ok(len)
}

fn stored<T: Scalar>(token: Token, value: T, nullable: bool) -> Result<T> {
    if nullable {
        value
            .to_nullable()
            .ok_or(FastError::ValueOutOfRange { token })
    } else {
        Ok(value)
    }
}
