//! Struct layout analysis: how one composite type crosses the boundary.

use veneer_types::{CompositeDesc, FfiError, TypeDesc};

use crate::arch::Arch;

/// Class of one 8-byte chunk of a System V amd64 composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EightbyteClass {
    Integer,
    Sse,
}

/// The analyzer's verdict for one composite type under one convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeClass {
    /// Zero-sized: consumes nothing.
    Empty,
    /// Homogeneous floating-point aggregate: `count` elements of `width`
    /// bytes, each in its own float register.
    Hfa { width: u8, count: u8 },
    /// Homogeneous small-integer aggregate: `count` elements of `width`
    /// bytes, each in its own integer register.
    Hva { width: u8, count: u8 },
    /// amd64: one register per 8-byte chunk, integer or SSE per chunk.
    Eightbytes(Vec<EightbyteClass>),
    /// arm64: the raw byte image split across `words` integer words.
    ByteChunks { words: u8 },
    /// Passed by pointer to a buffer of this size and alignment.
    Memory { size: usize, align: usize },
}

fn rounded8(size: usize) -> usize {
    (size + 7) & !7
}

/// Detects a Homogeneous Floating-point Aggregate: uniform float leaves,
/// at most four of them, rounded size within four 8-byte slots.
fn as_hfa(desc: &CompositeDesc) -> Option<CompositeClass> {
    let leaves = desc.leaves();
    if leaves.is_empty() || leaves.len() > 4 || rounded8(desc.size()) > 32 {
        return None;
    }
    let width = match leaves[0].1 {
        TypeDesc::Float { width } => *width,
        _ => return None,
    };
    if leaves
        .iter()
        .all(|(_, d)| matches!(d, TypeDesc::Float { width: w } if *w == width))
    {
        Some(CompositeClass::Hfa {
            width,
            count: leaves.len() as u8,
        })
    } else {
        None
    }
}

/// Detects a Homogeneous (short-)Vector Aggregate: uniform 1- or 2-byte
/// integer leaves whose rounded size is exactly 8 or 16 bytes.
fn as_hva(desc: &CompositeDesc) -> Option<CompositeClass> {
    let rounded = rounded8(desc.size());
    if rounded != 8 && rounded != 16 {
        return None;
    }
    let leaves = desc.leaves();
    let (width, signed) = match leaves.first()?.1 {
        TypeDesc::Int { width, signed } if *width <= 2 => (*width, *signed),
        _ => return None,
    };
    if leaves.iter().all(
        |(_, d)| matches!(d, TypeDesc::Int { width: w, signed: s } if *w == width && *s == signed),
    ) {
        Some(CompositeClass::Hva {
            width,
            count: leaves.len() as u8,
        })
    } else {
        None
    }
}

fn amd64_eightbytes(desc: &CompositeDesc) -> Result<CompositeClass, FfiError> {
    let size = desc.size();
    // Pointer-valued fields force the whole composite to memory; the engine
    // cannot prove the pointee outlives the call otherwise.
    let has_pointer = desc
        .leaves()
        .iter()
        .any(|(_, d)| matches!(d, TypeDesc::Pointer));
    if size > 16 || has_pointer {
        return Ok(CompositeClass::Memory {
            size,
            align: desc.align(),
        });
    }
    let chunk_count = size.div_ceil(8);
    // NONE < SSE < INTEGER; MEMORY cannot arise because field offsets are
    // validated to natural alignment, so no primitive straddles a chunk.
    let mut classes = vec![None::<EightbyteClass>; chunk_count];
    for (offset, leaf) in desc.leaves() {
        let first = offset / 8;
        let last = (offset + leaf.size() - 1) / 8;
        if last >= chunk_count {
            return Err(FfiError::Invariant {
                reason: format!("field at offset {offset} escapes its composite"),
            });
        }
        let class = if leaf.is_float() {
            EightbyteClass::Sse
        } else {
            EightbyteClass::Integer
        };
        for chunk in classes.iter_mut().take(last + 1).skip(first) {
            *chunk = Some(match (*chunk, class) {
                (Some(EightbyteClass::Integer), _) | (_, EightbyteClass::Integer) => {
                    EightbyteClass::Integer
                }
                _ => EightbyteClass::Sse,
            });
        }
    }
    // Padding-only chunks count as integer.
    Ok(CompositeClass::Eightbytes(
        classes
            .into_iter()
            .map(|c| c.unwrap_or(EightbyteClass::Integer))
            .collect(),
    ))
}

/// Classifies one composite type under `arch`.
///
/// Pure and idempotent; both marshaling directions consume the result.
pub fn classify_composite(
    desc: &CompositeDesc,
    arch: Arch,
) -> Result<CompositeClass, FfiError> {
    desc.validate()?;
    if desc.is_empty() {
        return Ok(CompositeClass::Empty);
    }
    let size = desc.size();
    match arch {
        Arch::SysVAmd64 => amd64_eightbytes(desc),
        Arch::Aapcs64 | Arch::AppleArm64 => {
            if let Some(hfa) = as_hfa(desc) {
                return Ok(hfa);
            }
            if let Some(hva) = as_hva(desc) {
                return Ok(hva);
            }
            if size <= arch.register_passing_threshold() {
                Ok(CompositeClass::ByteChunks {
                    words: rounded8(size) as u8 / 8,
                })
            } else {
                Ok(CompositeClass::Memory {
                    size,
                    align: desc.align(),
                })
            }
        }
        Arch::WindowsX64 => {
            // By-value only for power-of-two sizes up to one word.
            if matches!(size, 1 | 2 | 4 | 8) {
                Ok(CompositeClass::ByteChunks { words: 1 })
            } else {
                Ok(CompositeClass::Memory {
                    size,
                    align: desc.align(),
                })
            }
        }
    }
}
