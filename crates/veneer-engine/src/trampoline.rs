//! The fixed-arity trampoline family.
//!
//! Outbound calls never JIT a stub. Every call is funneled through one of
//! two fixed shapes: eight float words plus either eight or sixteen
//! integer/stack words. The callee reads only the slots its real signature
//! names; surplus slots carry zeros.
//!
//! Frame contract, in declaration order:
//!   words 0..8            float registers (xmm0-7 / v0-v7)
//!   words 8..8+N          integer registers (rdi..r9 / x0-x7), then
//!                         overflow stack words in call order
//!
//! Return registers come back through a closed set of `#[repr(C)]` shapes,
//! one per return classification, so both integer and float return
//! registers are observable without assembly.

use std::mem;

use veneer_abi::{CALL_WORDS, FLOAT_WORDS, INDIRECT_RETURN_MAX};

/// Both integer return registers (rax:rdx / x0:x1).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetPair {
    pub lo: u64,
    pub hi: u64,
}

/// First two float return registers (xmm0:xmm1 / v0:v1).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetFloatPair {
    pub f0: f64,
    pub f1: f64,
}

/// Four float return registers, for homogeneous aggregate returns (v0-v3).
/// Only selected under the arm64 conventions.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetFloatQuad {
    pub f0: f64,
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
}

/// amd64 mixed 16-byte return: integer chunk then SSE chunk (rax, xmm0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetIntFloat {
    pub a: u64,
    pub f: f64,
}

/// amd64 mixed 16-byte return: SSE chunk then integer chunk (xmm0, rax).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetFloatInt {
    pub f: f64,
    pub a: u64,
}

/// Receiving buffer for hidden-pointer returns. The callee writes its real
/// return size; the tail stays uninitialized-but-owned.
#[repr(C, align(16))]
pub struct RetBlob {
    pub bytes: [u8; INDIRECT_RETURN_MAX],
}

impl Default for RetBlob {
    fn default() -> Self {
        RetBlob {
            bytes: [0; INDIRECT_RETURN_MAX],
        }
    }
}

/// Raw return registers, normalized across shapes. `blob` is populated only
/// for hidden-pointer returns.
#[derive(Debug, Default)]
pub struct RawReturn {
    pub ints: [u64; 2],
    pub floats: [u64; 4],
    pub blob: Option<Box<[u8; INDIRECT_RETURN_MAX]>>,
}

type Call8<R> = unsafe extern "C" fn(
    f64, f64, f64, f64, f64, f64, f64, f64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> R;

type Call16<R> = unsafe extern "C" fn(
    f64, f64, f64, f64, f64, f64, f64, f64,
    u64, u64, u64, u64, u64, u64, u64, u64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> R;

/// Positional shape for the unified-budget convention: float bits travel in
/// the integer words, so no float parameters are declared.
type CallPositional16<R> = unsafe extern "C" fn(
    u64, u64, u64, u64, u64, u64, u64, u64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> R;

/// C-variadic flavor of the wide shape. Calling through a variadic pointer
/// makes the compiler emit the variadic call protocol; on System V amd64
/// that loads AL with the number of vector registers in use, which the
/// callee's prologue consults before saving xmm0-7. The physical register
/// assignment is identical to [`Call16`].
type CallVariadic16<R> = unsafe extern "C" fn(
    f64, f64, f64, f64, f64, f64, f64, f64,
    u64, ...
) -> R;

/// # Safety
/// `target` must be a C function whose real signature consumes a subset of
/// the trampoline frame per the caller's classification plan.
pub unsafe fn call8<R>(target: usize, f: &[u64; FLOAT_WORDS], w: &[u64; CALL_WORDS]) -> R {
    let fun: Call8<R> = mem::transmute(target);
    fun(
        f64::from_bits(f[0]),
        f64::from_bits(f[1]),
        f64::from_bits(f[2]),
        f64::from_bits(f[3]),
        f64::from_bits(f[4]),
        f64::from_bits(f[5]),
        f64::from_bits(f[6]),
        f64::from_bits(f[7]),
        w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7],
    )
}

/// # Safety
/// See [`call8`].
pub unsafe fn call16<R>(target: usize, f: &[u64; FLOAT_WORDS], w: &[u64; CALL_WORDS]) -> R {
    let fun: Call16<R> = mem::transmute(target);
    fun(
        f64::from_bits(f[0]),
        f64::from_bits(f[1]),
        f64::from_bits(f[2]),
        f64::from_bits(f[3]),
        f64::from_bits(f[4]),
        f64::from_bits(f[5]),
        f64::from_bits(f[6]),
        f64::from_bits(f[7]),
        w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7],
        w[8], w[9], w[10], w[11], w[12], w[13], w[14], w[15],
    )
}

/// # Safety
/// See [`call8`]. Variadic targets only; the convention must place variadic
/// arguments exactly like fixed ones (System V amd64 does).
pub unsafe fn call_variadic16<R>(
    target: usize,
    f: &[u64; FLOAT_WORDS],
    w: &[u64; CALL_WORDS],
) -> R {
    let fun: CallVariadic16<R> = mem::transmute(target);
    fun(
        f64::from_bits(f[0]),
        f64::from_bits(f[1]),
        f64::from_bits(f[2]),
        f64::from_bits(f[3]),
        f64::from_bits(f[4]),
        f64::from_bits(f[5]),
        f64::from_bits(f[6]),
        f64::from_bits(f[7]),
        w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7],
        w[8], w[9], w[10], w[11], w[12], w[13], w[14], w[15],
    )
}

/// # Safety
/// See [`call8`]. Unified-budget targets only.
pub unsafe fn call_positional16<R>(target: usize, w: &[u64; CALL_WORDS]) -> R {
    let fun: CallPositional16<R> = mem::transmute(target);
    fun(
        w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7],
        w[8], w[9], w[10], w[11], w[12], w[13], w[14], w[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // The trampolines are exercised end to end in the integration tests;
    // here we only pin the frame constants the shapes are built around.
    #[test]
    fn frame_constants() {
        assert_eq!(FLOAT_WORDS, 8);
        assert_eq!(CALL_WORDS, 16);
        assert_eq!(mem::size_of::<RetPair>(), 16);
        assert_eq!(mem::size_of::<RetBlob>(), INDIRECT_RETURN_MAX);
        assert_eq!(mem::align_of::<RetBlob>(), 16);
    }
}
