//! Immutable call signatures.

use crate::desc::TypeDesc;
use crate::error::FfiError;

/// The declared shape of one native function: parameter descriptors plus an
/// optional return descriptor. Built once per binding and never mutated;
/// classification caches key off the whole signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    params: Vec<TypeDesc>,
    ret: Option<TypeDesc>,
}

impl CallSignature {
    pub fn new(params: Vec<TypeDesc>, ret: Option<TypeDesc>) -> Result<Self, FfiError> {
        for p in &params {
            p.validate()?;
        }
        if let Some(r) = &ret {
            r.validate()?;
        }
        Ok(CallSignature { params, ret })
    }

    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    pub fn ret(&self) -> Option<&TypeDesc> {
        self.ret.as_ref()
    }

    /// Expands a trailing variadic list into a widened fixed signature.
    ///
    /// Extra arguments get C default argument promotion: `float` widens to
    /// `double`, integers narrower than 32 bits widen to 32 bits.
    pub fn with_trailing(&self, extra: &[TypeDesc]) -> Result<CallSignature, FfiError> {
        let mut params = self.params.clone();
        for desc in extra {
            desc.validate()?;
            params.push(promote(desc));
        }
        CallSignature::new(params, self.ret.clone())
    }
}

fn promote(desc: &TypeDesc) -> TypeDesc {
    match desc {
        TypeDesc::Float { width: 4 } => TypeDesc::F64,
        TypeDesc::Int { width, signed } if *width < 4 => TypeDesc::Int {
            width: 4,
            signed: *signed,
        },
        TypeDesc::Bool => TypeDesc::Int { width: 4, signed: true },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_param_rejected() {
        let bad = TypeDesc::Int { width: 5, signed: true };
        assert!(CallSignature::new(vec![bad], None).is_err());
    }

    #[test]
    fn trailing_expansion_promotes() {
        let sig = CallSignature::new(vec![TypeDesc::PTR], Some(TypeDesc::I32)).unwrap();
        let wide = sig
            .with_trailing(&[TypeDesc::F32, TypeDesc::I8, TypeDesc::BOOL, TypeDesc::U64])
            .unwrap();
        assert_eq!(
            wide.params(),
            &[
                TypeDesc::PTR,
                TypeDesc::F64,
                TypeDesc::I32,
                TypeDesc::I32,
                TypeDesc::U64,
            ]
        );
        assert_eq!(wide.ret(), Some(&TypeDesc::I32));
    }
}
