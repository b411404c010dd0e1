//! Outbound argument-block construction.
//!
//! An [`ArgBlock`] is the materialized trampoline frame for one call:
//! float-register words, integer/stack words, and the scratch buffers that
//! back by-reference aggregates. Building it executes a classification plan
//! against concrete values; nothing here decides placement.

use veneer_abi::{Piece, Placement, Plan, Slot, CALL_WORDS, FLOAT_WORDS};
use veneer_types::{CallSignature, FfiError, Value};

#[derive(Debug)]
pub struct ArgBlock {
    floats: [u64; FLOAT_WORDS],
    words: [u64; CALL_WORDS],
    packed: Vec<u8>,
    /// Scratch copies of by-reference aggregates, kept alive for the
    /// duration of the call. `u128` backing gives 16-byte alignment.
    scratch: Vec<Vec<u128>>,
}

impl ArgBlock {
    /// Executes `plan` against `args`, producing the frame the trampoline
    /// will pass verbatim.
    pub fn build(plan: &Plan, sig: &CallSignature, args: &[Value]) -> Result<Self, FfiError> {
        if args.len() != plan.args.len() {
            return Err(FfiError::ArgumentCount {
                expected: plan.args.len(),
                got: args.len(),
            });
        }
        let mut block = ArgBlock {
            floats: [0; FLOAT_WORDS],
            words: [0; CALL_WORDS],
            packed: vec![0; plan.packed_bytes],
            scratch: Vec::new(),
        };
        for ((class, desc), value) in plan.args.iter().zip(sig.params()).zip(args) {
            match &class.placement {
                Placement::None => {
                    // Zero-sized: type-check the value, place nothing.
                    value.bytes(desc)?;
                }
                Placement::Pieces(pieces) => {
                    let image = value.bytes(desc)?;
                    for piece in pieces {
                        block.write_piece(plan, piece, &image)?;
                    }
                }
                Placement::Indirect { slot, size, .. } => {
                    let image = value.bytes(desc)?;
                    let addr = block.stash(&image, *size);
                    block.write_word(plan, *slot, addr as u64);
                }
            }
        }
        // The packed blob occupies the stack-word region of the frame; fold
        // it in as little-endian words.
        let packed = std::mem::take(&mut block.packed);
        for (k, chunk) in packed.chunks(8).enumerate() {
            let mut w = [0u8; 8];
            w[..chunk.len()].copy_from_slice(chunk);
            block.words[plan.int_budget + k] = u64::from_le_bytes(w);
        }
        Ok(block)
    }

    pub fn floats(&self) -> &[u64; FLOAT_WORDS] {
        &self.floats
    }

    pub fn words(&self) -> &[u64; CALL_WORDS] {
        &self.words
    }

    fn write_piece(&mut self, plan: &Plan, piece: &Piece, image: &[u8]) -> Result<(), FfiError> {
        let bytes = image
            .get(piece.offset..piece.offset + piece.len)
            .ok_or_else(|| FfiError::Invariant {
                reason: format!(
                    "piece {}..{} outside a {}-byte image",
                    piece.offset,
                    piece.offset + piece.len,
                    image.len()
                ),
            })?;
        if let Slot::PackedByte(off) = piece.slot {
            self.packed[off..off + piece.len].copy_from_slice(bytes);
            return Ok(());
        }
        let mut w = [0u8; 8];
        w[..bytes.len()].copy_from_slice(bytes);
        self.write_word(plan, piece.slot, u64::from_le_bytes(w));
        Ok(())
    }

    fn write_word(&mut self, plan: &Plan, slot: Slot, word: u64) {
        match slot {
            Slot::IntReg(i) => self.words[i] = word,
            Slot::FloatReg(i) => {
                // Unified-budget slots are positional integer words; the
                // trampoline for that convention declares no float params.
                if plan.arch.unified_slots() {
                    self.words[i] = word;
                } else {
                    self.floats[i] = word;
                }
            }
            Slot::StackWord(i) => self.words[plan.int_budget + i] = word,
            // An aggregate address can itself overflow into the packed blob.
            Slot::PackedByte(off) => {
                self.packed[off..off + 8].copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    fn stash(&mut self, image: &[u8], size: usize) -> usize {
        let mut buf = vec![0u128; size.div_ceil(16).max(1)];
        let dst = buf.as_mut_ptr() as *mut u8;
        // buf is freshly allocated and at least image.len() bytes.
        unsafe { std::ptr::copy_nonoverlapping(image.as_ptr(), dst, image.len()) };
        let addr = buf.as_ptr() as usize;
        self.scratch.push(buf);
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veneer_abi::{classify, Arch, CompositeDesc, TypeDesc};

    fn plan_and_sig(params: Vec<TypeDesc>, arch: Arch) -> (Plan, CallSignature) {
        let sig = CallSignature::new(params, None).unwrap();
        let plan = classify(&sig, arch).unwrap();
        (plan, sig)
    }

    #[test]
    fn primitives_land_in_their_pools() {
        let (plan, sig) = plan_and_sig(
            vec![TypeDesc::I64, TypeDesc::F64, TypeDesc::I32],
            Arch::SysVAmd64,
        );
        let block = ArgBlock::build(
            &plan,
            &sig,
            &[Value::Int(-7), Value::Float(2.5), Value::Int(41)],
        )
        .unwrap();
        assert_eq!(block.words[0], (-7i64) as u64);
        assert_eq!(block.floats[0], 2.5f64.to_bits());
        assert_eq!(block.words[1] as u32, 41);
    }

    #[test]
    fn stack_overflow_words_follow_the_registers() {
        let (plan, sig) = plan_and_sig(vec![TypeDesc::I64; 8], Arch::SysVAmd64);
        let args: Vec<Value> = (0..8).map(Value::Int).collect();
        let block = ArgBlock::build(&plan, &sig, &args).unwrap();
        assert_eq!(block.words[5], 5);
        // int_budget is 6, so stack word 0 is frame word 6.
        assert_eq!(block.words[6], 6);
        assert_eq!(block.words[7], 7);
    }

    #[test]
    fn composite_pieces_split_the_image() {
        let pair = CompositeDesc::natural(vec![TypeDesc::I64, TypeDesc::I64]).unwrap();
        let (plan, sig) = plan_and_sig(vec![TypeDesc::Composite(pair)], Arch::SysVAmd64);
        let mut image = Vec::new();
        image.extend_from_slice(&0x1111u64.to_le_bytes());
        image.extend_from_slice(&0x2222u64.to_le_bytes());
        let block = ArgBlock::build(&plan, &sig, &[Value::Composite(image)]).unwrap();
        assert_eq!(block.words[0], 0x1111);
        assert_eq!(block.words[1], 0x2222);
    }

    #[test]
    fn packed_blob_is_folded_into_stack_words() {
        // Registers full, then i32 / i64 / f32 into the packed blob.
        let mut params = vec![TypeDesc::I64; 8];
        params.push(TypeDesc::I32);
        params.push(TypeDesc::I64);
        params.extend(vec![TypeDesc::F64; 8]);
        params.push(TypeDesc::F32);
        let (plan, sig) = plan_and_sig(params, Arch::AppleArm64);
        let mut args: Vec<Value> = (0..8).map(Value::Int).collect();
        args.push(Value::Int(0x0A0B_0C0D));
        args.push(Value::Int(0x1122_3344_5566_7788));
        args.extend((0..8).map(|i| Value::Float(i as f64)));
        args.push(Value::F32(1.5));
        let block = ArgBlock::build(&plan, &sig, &args).unwrap();
        // Blob: i32 at 0, pad to 8, i64 at 8, f32 at 16.
        assert_eq!(block.words[8], 0x0A0B_0C0D);
        assert_eq!(block.words[9], 0x1122_3344_5566_7788);
        assert_eq!(block.words[10] as u32, 1.5f32.to_bits());
    }

    #[test]
    fn by_reference_aggregate_gets_an_aligned_scratch_copy() {
        let big =
            CompositeDesc::natural(vec![TypeDesc::I64, TypeDesc::I64, TypeDesc::I64]).unwrap();
        let (plan, sig) = plan_and_sig(vec![TypeDesc::Composite(big)], Arch::SysVAmd64);
        let image: Vec<u8> = (0u8..24).collect();
        let block = ArgBlock::build(&plan, &sig, &[Value::Composite(image.clone())]).unwrap();
        let addr = block.words[0] as usize;
        assert_eq!(addr % 16, 0);
        let copied = unsafe { std::slice::from_raw_parts(addr as *const u8, 24) };
        assert_eq!(copied, &image[..]);
    }

    #[test]
    fn arity_mismatch_rejected() {
        let (plan, sig) = plan_and_sig(vec![TypeDesc::I64], Arch::SysVAmd64);
        let err = ArgBlock::build(&plan, &sig, &[]).unwrap_err();
        assert!(matches!(
            err,
            FfiError::ArgumentCount { expected: 1, got: 0 }
        ));
    }

    #[test]
    fn unified_floats_travel_in_positional_words() {
        let (plan, sig) = plan_and_sig(vec![TypeDesc::I64, TypeDesc::F64], Arch::WindowsX64);
        let block = ArgBlock::build(&plan, &sig, &[Value::Int(9), Value::Float(0.5)]).unwrap();
        assert_eq!(block.words[0], 9);
        assert_eq!(block.words[1], 0.5f64.to_bits());
        assert_eq!(block.floats, [0; FLOAT_WORDS]);
    }
}
