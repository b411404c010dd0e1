//! Error taxonomy for signature construction, classification, and dispatch.

use thiserror::Error;

/// Broad category of an [`FfiError`], used by callers that only care whether
/// a failure was their input, a capacity limit, or an engine bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The signature or value cannot be represented by the target ABI.
    /// Rejected before any native code runs.
    Construction,
    /// A fixed resource ran out: trampoline slots or the callback table.
    Capacity,
    /// Internal logic error in the classifier or marshaler. Never caused by
    /// caller input.
    Invariant,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FfiError {
    #[error("unsupported type in signature: {reason}")]
    Unsupported { reason: String },

    #[error("invalid composite layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("return type of {size} bytes exceeds the {max}-byte indirect return buffer")]
    ReturnTooLarge { size: usize, max: usize },

    #[error("value does not match its declared type: {reason}")]
    ValueMismatch { reason: String },

    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("call needs {needed} stack words but the trampolines provide {capacity}")]
    StackExhausted { needed: usize, capacity: usize },

    #[error("callback table is full ({capacity} slots)")]
    CallbackTableFull { capacity: usize },

    #[error("internal invariant violated: {reason}")]
    Invariant { reason: String },
}

impl FfiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FfiError::Unsupported { .. }
            | FfiError::InvalidLayout { .. }
            | FfiError::ReturnTooLarge { .. }
            | FfiError::ValueMismatch { .. }
            | FfiError::ArgumentCount { .. } => ErrorKind::Construction,
            FfiError::StackExhausted { .. } | FfiError::CallbackTableFull { .. } => {
                ErrorKind::Capacity
            }
            FfiError::Invariant { .. } => ErrorKind::Invariant,
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        FfiError::Unsupported {
            reason: reason.into(),
        }
    }

    pub(crate) fn layout(reason: impl Into<String>) -> Self {
        FfiError::InvalidLayout {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_taxonomy() {
        assert_eq!(
            FfiError::unsupported("x").kind(),
            ErrorKind::Construction
        );
        assert_eq!(
            FfiError::CallbackTableFull { capacity: 4 }.kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            FfiError::Invariant {
                reason: "x".into()
            }
            .kind(),
            ErrorKind::Invariant
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = FfiError::StackExhausted {
            needed: 12,
            capacity: 10,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10"));
    }
}
