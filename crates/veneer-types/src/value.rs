//! Tagged runtime values crossing the FFI boundary.

use crate::desc::TypeDesc;
use crate::error::FfiError;

/// One argument or return value, paired at the call site with a [`TypeDesc`]
/// from the signature. Composite values carry their raw little-endian byte
/// image laid out exactly per the descriptor (padding included).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    UInt(u64),
    Float(f64),
    F32(f32),
    Bool(bool),
    Ptr(usize),
    Composite(Vec<u8>),
}

impl Value {
    /// Encodes a primitive value as one register word.
    ///
    /// Signed integers are sign-extended to the full word, unsigned are
    /// zero-extended, and floats contribute their raw bit pattern (an `f32`
    /// occupies the low 32 bits).
    pub fn as_word(&self, desc: &TypeDesc) -> Result<u64, FfiError> {
        match (self, desc) {
            (Value::Int(v), TypeDesc::Int { signed: true, .. }) => Ok(*v as u64),
            (Value::UInt(v), TypeDesc::Int { signed: false, .. }) => Ok(*v),
            (Value::Float(v), TypeDesc::Float { width: 8 }) => Ok(v.to_bits()),
            (Value::F32(v), TypeDesc::Float { width: 4 }) => Ok(v.to_bits() as u64),
            (Value::Bool(v), TypeDesc::Bool) => Ok(*v as u64),
            (Value::Ptr(v), TypeDesc::Pointer) => Ok(*v as u64),
            (v, d) => Err(FfiError::ValueMismatch {
                reason: format!("{v:?} is not a {d:?}"),
            }),
        }
    }

    /// Byte image of the value per its descriptor, little-endian.
    pub fn bytes(&self, desc: &TypeDesc) -> Result<Vec<u8>, FfiError> {
        if let (Value::Composite(bytes), TypeDesc::Composite(c)) = (self, desc) {
            if bytes.len() != c.size() {
                return Err(FfiError::ValueMismatch {
                    reason: format!(
                        "composite image is {} bytes, descriptor says {}",
                        bytes.len(),
                        c.size()
                    ),
                });
            }
            return Ok(bytes.clone());
        }
        let word = self.as_word(desc)?;
        Ok(word.to_le_bytes()[..desc.size()].to_vec())
    }

    /// Decodes a primitive from one register word.
    pub fn from_word(word: u64, desc: &TypeDesc) -> Result<Value, FfiError> {
        match desc {
            TypeDesc::Int { width, signed: true } => {
                let shift = 64 - (*width as u32) * 8;
                Ok(Value::Int(((word << shift) as i64) >> shift))
            }
            TypeDesc::Int { width, signed: false } => {
                let mask = if *width == 8 { u64::MAX } else { (1u64 << (*width as u32 * 8)) - 1 };
                Ok(Value::UInt(word & mask))
            }
            TypeDesc::Float { width: 8 } => Ok(Value::Float(f64::from_bits(word))),
            TypeDesc::Float { width: 4 } => Ok(Value::F32(f32::from_bits(word as u32))),
            TypeDesc::Bool => Ok(Value::Bool(word as u8 != 0)),
            TypeDesc::Pointer => Ok(Value::Ptr(word as usize)),
            d => Err(FfiError::ValueMismatch {
                reason: format!("cannot decode {d:?} from a register word"),
            }),
        }
    }

    /// Decodes a primitive from its little-endian byte image.
    pub fn from_bytes(bytes: &[u8], desc: &TypeDesc) -> Result<Value, FfiError> {
        if desc.is_composite() {
            return Ok(Value::Composite(bytes.to_vec()));
        }
        let size = desc.size();
        if bytes.len() < size {
            return Err(FfiError::ValueMismatch {
                reason: format!("need {size} bytes, got {}", bytes.len()),
            });
        }
        let mut word = [0u8; 8];
        word[..size].copy_from_slice(&bytes[..size]);
        Value::from_word(u64::from_le_bytes(word), desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_words_sign_extend() {
        let w = Value::Int(-2).as_word(&TypeDesc::I32).unwrap();
        assert_eq!(w, (-2i64) as u64);
        assert_eq!(Value::from_word(w, &TypeDesc::I32).unwrap(), Value::Int(-2));
    }

    #[test]
    fn narrow_unsigned_truncates_on_decode() {
        let v = Value::from_word(0xAABB_CCDD, &TypeDesc::U16).unwrap();
        assert_eq!(v, Value::UInt(0xCCDD));
    }

    #[test]
    fn f32_uses_low_bits() {
        let w = Value::F32(1.5).as_word(&TypeDesc::F32).unwrap();
        assert_eq!(w, 1.5f32.to_bits() as u64);
        assert_eq!(
            Value::from_word(w | 0xFFFF_FFFF_0000_0000, &TypeDesc::F32).unwrap(),
            Value::F32(1.5)
        );
    }

    #[test]
    fn primitive_bytes_round_trip() {
        let bytes = Value::Int(-1).bytes(&TypeDesc::I16).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFF]);
        assert_eq!(
            Value::from_bytes(&bytes, &TypeDesc::I16).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn mismatched_value_rejected() {
        assert!(Value::Float(1.0).as_word(&TypeDesc::I64).is_err());
    }

    #[test]
    fn composite_image_length_checked() {
        use crate::desc::CompositeDesc;
        let c = CompositeDesc::natural(vec![TypeDesc::I32, TypeDesc::I32]).unwrap();
        let desc = TypeDesc::Composite(c);
        assert!(Value::Composite(vec![0; 8]).bytes(&desc).is_ok());
        assert!(Value::Composite(vec![0; 7]).bytes(&desc).is_err());
    }
}
