//! Calling-convention modeling for the veneer FFI engine.
//!
//! Everything in this crate is pure: given a [`CallSignature`] and an
//! [`Arch`], it decides where every argument lives (integer register, float
//! register, stack word, packed stack byte, or behind a hidden pointer) and
//! how the return value comes back. No native code is touched here, so all
//! four architecture variants are fully testable on any host.
//!
//! The dispatch layer (`veneer-engine`) consumes the resulting [`Plan`]
//! verbatim in both directions: outbound argument-block construction and
//! inbound callback frame parsing.

mod arch;
mod classify;
mod cursor;
mod layout;

pub use arch::{Arch, CALL_WORDS, CALL_WORDS_SMALL, FLOAT_WORDS, INDIRECT_RETURN_MAX};
pub use classify::{
    classify, classify_return, Classification, PlaceKind, Placement, Piece, Plan, RetPlan,
};
pub use cursor::{FrameCursor, Slot};
pub use layout::{classify_composite, CompositeClass, EightbyteClass};

pub use veneer_types::{CallSignature, CompositeDesc, FfiError, TypeDesc, Value};
