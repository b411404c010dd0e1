//! Ahead-of-time type descriptors.
//!
//! Every bound native function carries an explicit [`TypeDesc`] tree built
//! once at binding time. The classifier never inspects live values to learn
//! their shape; it only reads these descriptors.

use crate::error::FfiError;

/// Describes one C-ABI value type.
///
/// Integer widths are 1, 2, 4, or 8 bytes; float widths 4 or 8. `Pointer`
/// is an untyped machine pointer (8 bytes on every supported target).
/// Fixed-size arrays of primitives are expressed as composites with repeated
/// fields (see [`CompositeDesc::array`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Int { width: u8, signed: bool },
    Float { width: u8 },
    Pointer,
    Bool,
    Composite(CompositeDesc),
}

impl TypeDesc {
    pub const I8: TypeDesc = TypeDesc::Int { width: 1, signed: true };
    pub const I16: TypeDesc = TypeDesc::Int { width: 2, signed: true };
    pub const I32: TypeDesc = TypeDesc::Int { width: 4, signed: true };
    pub const I64: TypeDesc = TypeDesc::Int { width: 8, signed: true };
    pub const U8: TypeDesc = TypeDesc::Int { width: 1, signed: false };
    pub const U16: TypeDesc = TypeDesc::Int { width: 2, signed: false };
    pub const U32: TypeDesc = TypeDesc::Int { width: 4, signed: false };
    pub const U64: TypeDesc = TypeDesc::Int { width: 8, signed: false };
    pub const F32: TypeDesc = TypeDesc::Float { width: 4 };
    pub const F64: TypeDesc = TypeDesc::Float { width: 8 };
    pub const PTR: TypeDesc = TypeDesc::Pointer;
    pub const BOOL: TypeDesc = TypeDesc::Bool;

    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            TypeDesc::Int { width, .. } => *width as usize,
            TypeDesc::Float { width } => *width as usize,
            TypeDesc::Pointer => 8,
            TypeDesc::Bool => 1,
            TypeDesc::Composite(c) => c.size(),
        }
    }

    /// Natural C alignment in bytes.
    pub fn align(&self) -> usize {
        match self {
            TypeDesc::Int { width, .. } => *width as usize,
            TypeDesc::Float { width } => *width as usize,
            TypeDesc::Pointer => 8,
            TypeDesc::Bool => 1,
            TypeDesc::Composite(c) => c.align(),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDesc::Float { .. })
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, TypeDesc::Composite(_))
    }

    /// Checks the descriptor is one the engine can marshal at all.
    pub fn validate(&self) -> Result<(), FfiError> {
        match self {
            TypeDesc::Int { width, .. } => match width {
                1 | 2 | 4 | 8 => Ok(()),
                w => Err(FfiError::unsupported(format!("integer width {w}"))),
            },
            TypeDesc::Float { width } => match width {
                4 | 8 => Ok(()),
                w => Err(FfiError::unsupported(format!("float width {w}"))),
            },
            TypeDesc::Pointer | TypeDesc::Bool => Ok(()),
            TypeDesc::Composite(c) => c.validate(),
        }
    }
}

/// One member of a composite: a descriptor at a fixed byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub offset: usize,
    pub desc: TypeDesc,
}

/// A C struct (or fixed array) layout: ordered fields, total size, alignment.
///
/// Offsets are absolute within the composite and must respect each field's
/// natural alignment; the engine relies on that to keep primitives from
/// straddling 8-byte chunks during classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeDesc {
    fields: Vec<Field>,
    size: usize,
    align: usize,
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

impl CompositeDesc {
    /// Builds a composite from explicit field offsets.
    pub fn new(fields: Vec<Field>, size: usize, align: usize) -> Result<Self, FfiError> {
        let c = CompositeDesc { fields, size, align };
        c.validate()?;
        Ok(c)
    }

    /// Builds a composite with natural C layout: each field at the next
    /// offset aligned to its own alignment, total size rounded up to the
    /// struct alignment (tail padding included).
    pub fn natural(descs: Vec<TypeDesc>) -> Result<Self, FfiError> {
        let mut fields = Vec::with_capacity(descs.len());
        let mut offset = 0usize;
        let mut align = 1usize;
        for desc in descs {
            desc.validate()?;
            let a = desc.align().max(1);
            align = align.max(a);
            offset = round_up(offset, a);
            let size = desc.size();
            fields.push(Field { offset, desc });
            offset += size;
        }
        let size = round_up(offset, align);
        Ok(CompositeDesc { fields, size, align })
    }

    /// Builds a fixed-size array of a primitive element type, expanded into
    /// repeated fields at the element stride.
    pub fn array(elem: TypeDesc, len: usize) -> Result<Self, FfiError> {
        if elem.is_composite() {
            return Err(FfiError::unsupported(
                "arrays of composites; flatten the element first",
            ));
        }
        elem.validate()?;
        let stride = elem.size();
        let fields = (0..len)
            .map(|i| Field {
                offset: i * stride,
                desc: elem.clone(),
            })
            .collect();
        Ok(CompositeDesc {
            fields,
            size: stride * len,
            align: elem.align().max(1),
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// All primitive fields in declaration order, with offsets made absolute
    /// through any nesting.
    pub fn leaves(&self) -> Vec<(usize, &TypeDesc)> {
        let mut out = Vec::new();
        self.collect_leaves(0, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, base: usize, out: &mut Vec<(usize, &'a TypeDesc)>) {
        for f in &self.fields {
            match &f.desc {
                TypeDesc::Composite(inner) => inner.collect_leaves(base + f.offset, out),
                leaf => out.push((base + f.offset, leaf)),
            }
        }
    }

    pub fn validate(&self) -> Result<(), FfiError> {
        if !self.align.is_power_of_two() {
            return Err(FfiError::layout(format!(
                "alignment {} is not a power of two",
                self.align
            )));
        }
        if self.size % self.align != 0 {
            return Err(FfiError::layout(format!(
                "size {} is not a multiple of alignment {}",
                self.size, self.align
            )));
        }
        let mut prev_end = 0usize;
        for f in &self.fields {
            f.desc.validate()?;
            let a = f.desc.align().max(1);
            if f.offset % a != 0 {
                return Err(FfiError::layout(format!(
                    "field at offset {} violates alignment {a}",
                    f.offset
                )));
            }
            if f.offset < prev_end {
                return Err(FfiError::layout(format!(
                    "field at offset {} overlaps the previous field",
                    f.offset
                )));
            }
            let end = f.offset + f.desc.size();
            if end > self.size {
                return Err(FfiError::layout(format!(
                    "field at offset {} extends past size {}",
                    f.offset, self.size
                )));
            }
            prev_end = end;
        }
        Ok(())
    }
}
