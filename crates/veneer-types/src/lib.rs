//! Shared data model for the veneer FFI engine.
//!
//! This crate holds everything the classification and dispatch layers agree
//! on: the ahead-of-time type descriptor tree ([`TypeDesc`]), immutable call
//! signatures ([`CallSignature`]), tagged runtime values ([`Value`]), and the
//! error taxonomy ([`FfiError`]).
//!
//! All layout math assumes an LP64 little-endian target, which covers every
//! calling convention the engine models.

mod desc;
mod error;
mod signature;
mod value;

pub use desc::{CompositeDesc, Field, TypeDesc};
pub use error::{ErrorKind, FfiError};
pub use signature::CallSignature;
pub use value::Value;
