/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # fastwire Core
//!
//! Core types, configuration and error definitions for the fastwire FAST codec.
//!
//! This crate provides the building blocks shared by the primitive stream and
//! the field operator engine:
//! - **Error types**: a single `thiserror` enum, [`FastError`]
//! - **Tokens**: [`Token`], [`TypeKind`] and [`Operator`]
//! - **Configuration**: [`CodecConfig`] and [`BackoffConfig`]
//! - **Decimals**: [`DecimalValue`] for pairing exponent and mantissa reads

pub mod config;
pub mod decimal;
pub mod error;
pub mod token;

pub use config::{BackoffConfig, CodecConfig, MAX_VARINT_BYTES};
pub use decimal::DecimalValue;
pub use error::{FastError, Result};
pub use token::{MAX_INSTANCE, Operator, Token, TypeKind};
