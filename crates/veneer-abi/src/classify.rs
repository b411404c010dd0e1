//! Argument classification: one pass over a signature, left to right,
//! producing the placement plan both marshaling directions execute.

use veneer_types::{CallSignature, CompositeDesc, FfiError, TypeDesc};

use crate::arch::{Arch, CALL_WORDS, INDIRECT_RETURN_MAX};
use crate::cursor::{FrameCursor, Slot};
use crate::layout::{classify_composite, CompositeClass, EightbyteClass};

/// Where one argument lands, broadly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    IntegerRegister,
    FloatRegister,
    StackSlot,
    MemoryByReference,
    /// Inside the contiguous C-layout stack blob (Apple arm64 overflow).
    PackedStack,
    /// Zero-sized: present in the signature, absent from the frame.
    ZeroSized,
}

/// One contiguous byte range of an argument image bound to one frame slot.
///
/// `offset`/`len` address the argument's little-endian byte image; for
/// primitives the range is always the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub slot: Slot,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Zero-sized argument.
    None,
    /// Direct placement, one piece per slot.
    Pieces(Vec<Piece>),
    /// The value lives in a scratch buffer; `slot` carries its address.
    Indirect { slot: Slot, size: usize, align: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Where the argument starts: the landing slot of its first piece. A
    /// composite may span both register files; `placement` carries the slot
    /// of every piece and is what the marshalers consume.
    pub kind: PlaceKind,
    /// Byte width of the argument value.
    pub width: usize,
    pub placement: Placement,
}

/// How the return value comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetPlan {
    Void,
    /// Integer-class scalar in the first integer return register.
    Scalar(TypeDesc),
    /// Float scalar in the first float return register.
    FloatScalar(TypeDesc),
    /// Composite small enough for return registers, decoded per its class.
    Small {
        desc: CompositeDesc,
        class: CompositeClass,
    },
    /// Composite written by the callee through a hidden buffer pointer.
    Indirect {
        desc: CompositeDesc,
        size: usize,
        align: usize,
    },
}

/// The full classification of one signature for one convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub arch: Arch,
    pub args: Vec<Classification>,
    pub ret: RetPlan,
    /// General-purpose registers available to arguments (the full register
    /// count minus one when a hidden return pointer occupies the first).
    pub int_budget: usize,
    pub int_words: usize,
    pub float_words: usize,
    /// Total overflow stack words, packed blob included.
    pub stack_words: usize,
    /// Length of the packed stack blob, zero outside packed mode.
    pub packed_bytes: usize,
    /// Integer/stack words the trampoline must carry for this call.
    pub call_words: usize,
}

impl Classification {
    fn from_pieces(width: usize, pieces: Vec<Piece>) -> Self {
        let kind = match pieces.first().map(|p| p.slot) {
            Some(Slot::IntReg(_)) => PlaceKind::IntegerRegister,
            Some(Slot::FloatReg(_)) => PlaceKind::FloatRegister,
            Some(Slot::StackWord(_)) => PlaceKind::StackSlot,
            Some(Slot::PackedByte(_)) => PlaceKind::PackedStack,
            None => PlaceKind::ZeroSized,
        };
        Classification {
            kind,
            width,
            placement: if pieces.is_empty() {
                Placement::None
            } else {
                Placement::Pieces(pieces)
            },
        }
    }
}

/// Packed-blob alignment of one spilled value: natural C alignment, except
/// that aggregates of a word or more align to the word.
fn packed_align(size: usize, natural: usize, composite: bool) -> usize {
    if composite && size >= 8 {
        8
    } else {
        natural.max(1)
    }
}

fn spill_int(cur: &mut FrameCursor, arch: Arch, size: usize, align: usize) -> Result<Slot, FfiError> {
    if arch.packs_stack_args() {
        cur.next_packed(size, align)
    } else {
        cur.next_stack_word()
    }
}

/// Integer-register placement with the architecture's overflow rule.
fn place_int_like(
    cur: &mut FrameCursor,
    arch: Arch,
    size: usize,
    align: usize,
) -> Result<Slot, FfiError> {
    match cur.next_int_slot() {
        Some(slot) => Ok(slot),
        None => spill_int(cur, arch, size, align),
    }
}

fn place_float_like(
    cur: &mut FrameCursor,
    arch: Arch,
    size: usize,
    align: usize,
) -> Result<Slot, FfiError> {
    match cur.next_float_slot() {
        Some(slot) => Ok(slot),
        None => spill_int(cur, arch, size, align),
    }
}

fn classify_param(
    desc: &TypeDesc,
    arch: Arch,
    cur: &mut FrameCursor,
) -> Result<Classification, FfiError> {
    let width = desc.size();
    match desc {
        TypeDesc::Int { .. } | TypeDesc::Pointer | TypeDesc::Bool => {
            let slot = place_int_like(cur, arch, width, desc.align())?;
            Ok(Classification::from_pieces(
                width,
                vec![Piece { slot, offset: 0, len: width }],
            ))
        }
        TypeDesc::Float { .. } => {
            let slot = place_float_like(cur, arch, width, desc.align())?;
            Ok(Classification::from_pieces(
                width,
                vec![Piece { slot, offset: 0, len: width }],
            ))
        }
        TypeDesc::Composite(c) => classify_composite_param(c, arch, cur),
    }
}

fn classify_composite_param(
    desc: &CompositeDesc,
    arch: Arch,
    cur: &mut FrameCursor,
) -> Result<Classification, FfiError> {
    let size = desc.size();
    let class = classify_composite(desc, arch)?;
    match class {
        CompositeClass::Empty => Ok(Classification {
            kind: PlaceKind::ZeroSized,
            width: 0,
            placement: Placement::None,
        }),
        CompositeClass::Memory { size, align } => {
            if align > 16 {
                return Err(FfiError::Unsupported {
                    reason: format!("composite alignment {align} exceeds 16"),
                });
            }
            // The value is copied to scratch; only its address travels, as
            // an ordinary integer-register argument.
            let slot = place_int_like(cur, arch, 8, 8)?;
            Ok(Classification {
                kind: PlaceKind::MemoryByReference,
                width: size,
                placement: Placement::Indirect { slot, size, align },
            })
        }
        CompositeClass::Hfa { width, count } => {
            let elem = width as usize;
            if cur.floats_remaining() < count as usize {
                return spill_aggregate(desc, arch, cur, SpillPool::Float);
            }
            let mut pieces = Vec::with_capacity(count as usize);
            for (offset, _) in desc.leaves() {
                let slot = cur.next_float_slot().ok_or_else(|| FfiError::Invariant {
                    reason: "float budget changed mid-aggregate".into(),
                })?;
                pieces.push(Piece { slot, offset, len: elem });
            }
            Ok(Classification::from_pieces(size, pieces))
        }
        CompositeClass::Hva { width, count } => {
            let elem = width as usize;
            if cur.ints_remaining() < count as usize {
                return spill_aggregate(desc, arch, cur, SpillPool::Int);
            }
            let mut pieces = Vec::with_capacity(count as usize);
            for (offset, _) in desc.leaves() {
                let slot = cur.next_int_slot().ok_or_else(|| FfiError::Invariant {
                    reason: "integer budget changed mid-aggregate".into(),
                })?;
                pieces.push(Piece { slot, offset, len: elem });
            }
            Ok(Classification::from_pieces(size, pieces))
        }
        CompositeClass::ByteChunks { words } => {
            let words = words as usize;
            if arch.spills_composites_whole() && cur.ints_remaining() < words {
                return spill_aggregate(desc, arch, cur, SpillPool::Int);
            }
            let mut pieces = Vec::with_capacity(words);
            for k in 0..words {
                let offset = k * 8;
                let len = (size - offset).min(8);
                let slot = place_int_like(cur, arch, 8, 8)?;
                pieces.push(Piece { slot, offset, len });
            }
            Ok(Classification::from_pieces(size, pieces))
        }
        CompositeClass::Eightbytes(classes) => {
            // amd64: chunks overflow individually; a chunk that misses its
            // register falls to the stack while earlier ones stay put.
            let mut pieces = Vec::with_capacity(classes.len());
            for (k, class) in classes.iter().enumerate() {
                let offset = k * 8;
                let len = (size - offset).min(8);
                let slot = match class {
                    EightbyteClass::Integer => place_int_like(cur, arch, 8, 8)?,
                    EightbyteClass::Sse => place_float_like(cur, arch, 8, 8)?,
                };
                pieces.push(Piece { slot, offset, len });
            }
            Ok(Classification::from_pieces(size, pieces))
        }
    }
}

enum SpillPool {
    Int,
    Float,
}

/// All-or-nothing aggregate spill (arm64 rule): the whole value moves to the
/// stack and the remaining matching registers are forfeited.
fn spill_aggregate(
    desc: &CompositeDesc,
    arch: Arch,
    cur: &mut FrameCursor,
    pool: SpillPool,
) -> Result<Classification, FfiError> {
    match pool {
        SpillPool::Int => cur.saturate_ints(),
        SpillPool::Float => cur.saturate_floats(),
    }
    let size = desc.size();
    if arch.packs_stack_args() {
        let align = packed_align(size, desc.align(), true);
        let slot = cur.next_packed(size, align)?;
        return Ok(Classification {
            kind: PlaceKind::PackedStack,
            width: size,
            placement: Placement::Pieces(vec![Piece { slot, offset: 0, len: size }]),
        });
    }
    let words = size.div_ceil(8);
    let mut pieces = Vec::with_capacity(words);
    for k in 0..words {
        let offset = k * 8;
        let len = (size - offset).min(8);
        let slot = cur.next_stack_word()?;
        pieces.push(Piece { slot, offset, len });
    }
    Ok(Classification::from_pieces(size, pieces))
}

/// Classifies the return type alone.
pub fn classify_return(ret: Option<&TypeDesc>, arch: Arch) -> Result<RetPlan, FfiError> {
    let desc = match ret {
        None => return Ok(RetPlan::Void),
        Some(d) => d,
    };
    match desc {
        TypeDesc::Int { .. } | TypeDesc::Pointer | TypeDesc::Bool => {
            Ok(RetPlan::Scalar(desc.clone()))
        }
        TypeDesc::Float { .. } => Ok(RetPlan::FloatScalar(desc.clone())),
        TypeDesc::Composite(c) => {
            let class = classify_composite(c, arch)?;
            match class {
                CompositeClass::Memory { size, align } => {
                    if size > INDIRECT_RETURN_MAX {
                        return Err(FfiError::ReturnTooLarge {
                            size,
                            max: INDIRECT_RETURN_MAX,
                        });
                    }
                    if align > 16 {
                        return Err(FfiError::Unsupported {
                            reason: format!("return alignment {align} exceeds 16"),
                        });
                    }
                    Ok(RetPlan::Indirect { desc: c.clone(), size, align })
                }
                class => Ok(RetPlan::Small { desc: c.clone(), class }),
            }
        }
    }
}

/// Classifies a whole signature. Pure: the same signature and convention
/// always produce the same plan, so results are safely cacheable.
pub fn classify(sig: &CallSignature, arch: Arch) -> Result<Plan, FfiError> {
    let ret = classify_return(sig.ret(), arch)?;
    let mut int_budget = arch.integer_registers();
    if matches!(ret, RetPlan::Indirect { .. }) && arch.indirect_return_uses_gp() {
        int_budget -= 1;
    }
    let mut cur = FrameCursor::with_int_budget(arch, int_budget);
    let mut args = Vec::with_capacity(sig.params().len());
    for desc in sig.params() {
        args.push(classify_param(desc, arch, &mut cur)?);
    }
    let stack_words = cur.stack_words_total();
    let call_words = if stack_words > 0 {
        int_budget + stack_words
    } else {
        cur.ints_used()
    };
    debug_assert!(call_words <= CALL_WORDS);
    Ok(Plan {
        arch,
        args,
        ret,
        int_budget,
        int_words: cur.ints_used(),
        float_words: cur.floats_used(),
        stack_words,
        packed_bytes: cur.packed_len(),
        call_words,
    })
}
