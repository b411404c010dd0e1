//! Inbound callback frames.
//!
//! A [`RawFrame`] is the register file and stack-word snapshot captured by a
//! callback entry point, laid out exactly like the outbound trampoline
//! frame. Parsing one runs a classification plan in reverse: every piece
//! placement becomes a read instead of a write.

use veneer_abi::{Classification, Piece, Placement, Plan, Slot, CALL_WORDS, FLOAT_WORDS};
use veneer_types::{CallSignature, FfiError, TypeDesc, Value};

#[repr(C)]
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Float registers, raw bits.
    pub floats: [u64; FLOAT_WORDS],
    /// Integer registers followed by caller stack words.
    pub words: [u64; CALL_WORDS],
}

impl Default for RawFrame {
    fn default() -> Self {
        RawFrame {
            floats: [0; FLOAT_WORDS],
            words: [0; CALL_WORDS],
        }
    }
}

impl RawFrame {
    /// Recovers the argument values of one call from the captured frame.
    ///
    /// # Safety
    /// The frame must be a capture of a live call classified by `plan`. Any
    /// by-reference aggregate slot must hold a pointer to readable memory of
    /// the declared size for the duration of the parse.
    pub unsafe fn parse_args(
        &self,
        plan: &Plan,
        sig: &CallSignature,
    ) -> Result<Vec<Value>, FfiError> {
        let mut values = Vec::with_capacity(plan.args.len());
        for (class, desc) in plan.args.iter().zip(sig.params()) {
            values.push(self.parse_one(plan, class, desc)?);
        }
        Ok(values)
    }

    unsafe fn parse_one(
        &self,
        plan: &Plan,
        class: &Classification,
        desc: &TypeDesc,
    ) -> Result<Value, FfiError> {
        match &class.placement {
            Placement::None => Ok(Value::Composite(Vec::new())),
            Placement::Pieces(pieces) => {
                if !desc.is_composite() {
                    let piece = pieces.first().ok_or_else(|| FfiError::Invariant {
                        reason: "primitive classified without a slot".into(),
                    })?;
                    return Value::from_word(self.piece_word(plan, piece), desc);
                }
                let mut image = vec![0u8; class.width];
                for piece in pieces {
                    self.piece_bytes(
                        plan,
                        piece,
                        &mut image[piece.offset..piece.offset + piece.len],
                    );
                }
                Ok(Value::Composite(image))
            }
            Placement::Indirect { slot, size, .. } => {
                let addr = self.slot_word(*slot, plan.int_budget) as *const u8;
                if addr.is_null() {
                    return Err(FfiError::Invariant {
                        reason: "null pointer for a by-reference aggregate".into(),
                    });
                }
                let mut image = vec![0u8; *size];
                std::ptr::copy_nonoverlapping(addr, image.as_mut_ptr(), *size);
                Ok(Value::Composite(image))
            }
        }
    }

    /// Copies one piece's bytes out of the frame. A packed piece may span
    /// several stack words; word-slot pieces are at most eight bytes.
    fn piece_bytes(&self, plan: &Plan, piece: &Piece, out: &mut [u8]) {
        match piece.slot {
            Slot::PackedByte(off) => {
                for (k, b) in out.iter_mut().enumerate() {
                    *b = self.packed_byte(plan.int_budget, off + k);
                }
            }
            slot => {
                let word = self.slot_word(slot, plan.int_budget);
                out.copy_from_slice(&word.to_le_bytes()[..out.len()]);
            }
        }
    }

    /// Up to eight little-endian bytes of one piece, as a zero-extended word.
    fn piece_word(&self, plan: &Plan, piece: &Piece) -> u64 {
        match piece.slot {
            Slot::PackedByte(off) => {
                let mut w = [0u8; 8];
                for (k, b) in w.iter_mut().take(piece.len.min(8)).enumerate() {
                    *b = self.packed_byte(plan.int_budget, off + k);
                }
                u64::from_le_bytes(w)
            }
            slot => {
                let word = self.slot_word(slot, plan.int_budget);
                if piece.len >= 8 {
                    word
                } else {
                    word & ((1u64 << (piece.len as u32 * 8)) - 1)
                }
            }
        }
    }

    fn slot_word(&self, slot: Slot, int_budget: usize) -> u64 {
        match slot {
            Slot::IntReg(i) => self.words[i],
            Slot::FloatReg(i) => self.floats[i],
            Slot::StackWord(i) => self.words[int_budget + i],
            Slot::PackedByte(off) => {
                let mut w = [0u8; 8];
                for (k, b) in w.iter_mut().enumerate() {
                    *b = self.packed_byte(int_budget, off + k);
                }
                u64::from_le_bytes(w)
            }
        }
    }

    /// One byte of the packed stack blob, which occupies the stack-word
    /// region of the frame.
    fn packed_byte(&self, int_budget: usize, off: usize) -> u8 {
        self.words[int_budget + off / 8].to_le_bytes()[off % 8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ArgBlock;
    use veneer_abi::{classify, Arch, CompositeDesc};

    fn frame_of(block: &ArgBlock) -> RawFrame {
        RawFrame {
            floats: *block.floats(),
            words: *block.words(),
        }
    }

    fn round_trip(params: Vec<TypeDesc>, args: Vec<Value>, arch: Arch) {
        let sig = CallSignature::new(params, None).unwrap();
        let plan = classify(&sig, arch).unwrap();
        let block = ArgBlock::build(&plan, &sig, &args).unwrap();
        let parsed = unsafe { frame_of(&block).parse_args(&plan, &sig).unwrap() };
        assert_eq!(parsed, args);
    }

    #[test]
    fn parse_inverts_build_for_primitives() {
        round_trip(
            vec![TypeDesc::I64, TypeDesc::F64, TypeDesc::I32, TypeDesc::BOOL],
            vec![
                Value::Int(-9),
                Value::Float(6.25),
                Value::Int(-1),
                Value::Bool(true),
            ],
            Arch::SysVAmd64,
        );
    }

    #[test]
    fn parse_inverts_build_for_stack_overflow() {
        let params = vec![TypeDesc::I64; 10];
        let args: Vec<Value> = (0..10).map(|i| Value::Int(i * 3 - 7)).collect();
        round_trip(params, args, Arch::SysVAmd64);
    }

    #[test]
    fn parse_inverts_build_for_packed_blob() {
        let mut params = vec![TypeDesc::I64; 8];
        params.push(TypeDesc::I32);
        params.push(TypeDesc::I64);
        let mut args: Vec<Value> = (0..8).map(Value::Int).collect();
        args.push(Value::Int(-5));
        args.push(Value::Int(0x7766_5544_3322_1100));
        round_trip(params, args, Arch::AppleArm64);
    }

    #[test]
    fn parse_inverts_build_for_small_composites() {
        let pair = CompositeDesc::natural(vec![TypeDesc::I32, TypeDesc::F32]).unwrap();
        let mut image = Vec::new();
        image.extend_from_slice(&12i32.to_le_bytes());
        image.extend_from_slice(&1.5f32.to_le_bytes());
        for arch in [Arch::SysVAmd64, Arch::Aapcs64] {
            round_trip(
                vec![TypeDesc::Composite(pair.clone())],
                vec![Value::Composite(image.clone())],
                arch,
            );
        }
    }

    #[test]
    fn packed_aggregate_spans_stack_words() {
        // A 16-byte pair spilled into the packed blob is one wide piece.
        let pair = CompositeDesc::natural(vec![TypeDesc::I64, TypeDesc::I64]).unwrap();
        let mut image = Vec::new();
        image.extend_from_slice(&0xAAAAu64.to_le_bytes());
        image.extend_from_slice(&0xBBBBu64.to_le_bytes());
        let mut params = vec![TypeDesc::I64; 8];
        params.push(TypeDesc::Composite(pair));
        let mut args: Vec<Value> = (0..8).map(Value::Int).collect();
        args.push(Value::Composite(image));
        round_trip(params, args, Arch::AppleArm64);
    }

    #[test]
    fn by_reference_aggregate_is_copied_out() {
        let big = CompositeDesc::array(TypeDesc::U64, 4).unwrap();
        let image: Vec<u8> = (0u8..32).collect();
        round_trip(
            vec![TypeDesc::Composite(big)],
            vec![Value::Composite(image)],
            Arch::Aapcs64,
        );
    }

    #[test]
    fn zero_sized_composite_parses_to_an_empty_image() {
        let empty = CompositeDesc::natural(vec![]).unwrap();
        round_trip(
            vec![TypeDesc::Composite(empty), TypeDesc::I64],
            vec![Value::Composite(Vec::new()), Value::Int(1)],
            Arch::SysVAmd64,
        );
    }
}
