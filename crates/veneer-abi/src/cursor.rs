//! Typed cursor over one trampoline frame.
//!
//! All slot arithmetic lives here so the classifier never does raw offset
//! bookkeeping. The cursor only hands out positions; placement policy
//! (register vs. stack vs. packed) stays in the classifier.

use veneer_types::FfiError;

use crate::arch::Arch;

/// One landing position inside a trampoline frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// General-purpose register `n`.
    IntReg(usize),
    /// Float register `n`. Under a unified-budget convention the index is
    /// positional, shared with integer slots.
    FloatReg(usize),
    /// Overflow stack word `n` (word 0 is the first word past the integer
    /// registers in the trampoline frame).
    StackWord(usize),
    /// Byte offset into the packed stack blob.
    PackedByte(usize),
}

#[derive(Debug, Clone)]
pub struct FrameCursor {
    arch: Arch,
    int_budget: usize,
    ints: usize,
    floats: usize,
    stack: usize,
    packed_bytes: usize,
}

impl FrameCursor {
    pub fn new(arch: Arch) -> Self {
        Self::with_int_budget(arch, arch.integer_registers())
    }

    /// A cursor with a reduced general-purpose budget, used when a hidden
    /// return pointer occupies the first register.
    pub fn with_int_budget(arch: Arch, int_budget: usize) -> Self {
        FrameCursor {
            arch,
            int_budget,
            ints: 0,
            floats: 0,
            stack: 0,
            packed_bytes: 0,
        }
    }

    /// Next general-purpose register, or `None` once the budget is spent.
    pub fn next_int_slot(&mut self) -> Option<Slot> {
        if self.ints < self.int_budget {
            let slot = Slot::IntReg(self.ints);
            self.ints += 1;
            Some(slot)
        } else {
            None
        }
    }

    /// Next float register, or `None` once the budget is spent. The float
    /// pool is independent of the integer pool except under a unified-budget
    /// convention, where both draw from the same positional counter.
    pub fn next_float_slot(&mut self) -> Option<Slot> {
        if self.arch.unified_slots() {
            return match self.next_int_slot() {
                Some(Slot::IntReg(i)) => Some(Slot::FloatReg(i)),
                _ => None,
            };
        }
        if self.floats < self.arch.float_registers() {
            let slot = Slot::FloatReg(self.floats);
            self.floats += 1;
            Some(slot)
        } else {
            None
        }
    }

    /// Next overflow stack word; fails once the fixed frame is exhausted.
    pub fn next_stack_word(&mut self) -> Result<Slot, FfiError> {
        let capacity = self.arch.stack_words() + self.arch.integer_registers() - self.int_budget;
        if self.stack >= capacity {
            return Err(FfiError::StackExhausted {
                needed: self.stack + 1,
                capacity,
            });
        }
        let slot = Slot::StackWord(self.stack);
        self.stack += 1;
        Ok(slot)
    }

    /// Reserves `size` bytes at natural alignment in the packed stack blob.
    pub fn next_packed(&mut self, size: usize, align: usize) -> Result<Slot, FfiError> {
        if !align.is_power_of_two() {
            return Err(FfiError::Invariant {
                reason: format!("packed alignment {align} is not a power of two"),
            });
        }
        let offset = (self.packed_bytes + align - 1) & !(align - 1);
        self.packed_bytes = offset + size;
        let capacity = self.arch.stack_words();
        if self.packed_words() > capacity {
            return Err(FfiError::StackExhausted {
                needed: self.packed_words(),
                capacity,
            });
        }
        Ok(Slot::PackedByte(offset))
    }

    /// Marks every integer register as spent (all-or-nothing aggregate
    /// spill).
    pub fn saturate_ints(&mut self) {
        self.ints = self.int_budget;
    }

    /// Marks every float register as spent.
    pub fn saturate_floats(&mut self) {
        self.floats = self.arch.float_registers();
    }

    pub fn ints_used(&self) -> usize {
        self.ints
    }

    pub fn floats_used(&self) -> usize {
        self.floats
    }

    pub fn ints_remaining(&self) -> usize {
        self.int_budget - self.ints
    }

    pub fn floats_remaining(&self) -> usize {
        if self.arch.unified_slots() {
            self.ints_remaining()
        } else {
            self.arch.float_registers() - self.floats
        }
    }

    /// Plain overflow stack words handed out so far.
    pub fn stack_used(&self) -> usize {
        self.stack
    }

    /// Bytes reserved in the packed blob so far.
    pub fn packed_len(&self) -> usize {
        self.packed_bytes
    }

    fn packed_words(&self) -> usize {
        self.packed_bytes.div_ceil(8)
    }

    /// Total stack words the call will occupy, packed blob included.
    pub fn stack_words_total(&self) -> usize {
        self.stack + self.packed_words()
    }

    pub fn int_budget(&self) -> usize {
        self.int_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_independent() {
        let mut cur = FrameCursor::new(Arch::SysVAmd64);
        for i in 0..6 {
            assert_eq!(cur.next_int_slot(), Some(Slot::IntReg(i)));
        }
        assert_eq!(cur.next_int_slot(), None);
        // Exhausted integers do not borrow from floats.
        assert_eq!(cur.next_float_slot(), Some(Slot::FloatReg(0)));
        assert_eq!(cur.next_stack_word().unwrap(), Slot::StackWord(0));
    }

    #[test]
    fn unified_budget_shares_positions() {
        let mut cur = FrameCursor::new(Arch::WindowsX64);
        assert_eq!(cur.next_int_slot(), Some(Slot::IntReg(0)));
        assert_eq!(cur.next_float_slot(), Some(Slot::FloatReg(1)));
        assert_eq!(cur.next_int_slot(), Some(Slot::IntReg(2)));
        assert_eq!(cur.next_float_slot(), Some(Slot::FloatReg(3)));
        assert_eq!(cur.next_int_slot(), None);
        assert_eq!(cur.next_float_slot(), None);
    }

    #[test]
    fn stack_capacity_is_enforced() {
        let mut cur = FrameCursor::new(Arch::Aapcs64);
        for i in 0..Arch::Aapcs64.stack_words() {
            assert_eq!(cur.next_stack_word().unwrap(), Slot::StackWord(i));
        }
        assert!(matches!(
            cur.next_stack_word(),
            Err(FfiError::StackExhausted { .. })
        ));
    }

    #[test]
    fn reduced_budget_extends_stack() {
        // A hidden return pointer eats a register but not a frame word.
        let mut cur = FrameCursor::with_int_budget(Arch::SysVAmd64, 5);
        for _ in 0..5 {
            cur.next_int_slot().unwrap();
        }
        assert_eq!(cur.next_int_slot(), None);
        let mut words = 0;
        while cur.next_stack_word().is_ok() {
            words += 1;
        }
        assert_eq!(words, 11);
    }

    #[test]
    fn packed_offsets_follow_natural_alignment() {
        let mut cur = FrameCursor::new(Arch::AppleArm64);
        assert_eq!(cur.next_packed(4, 4).unwrap(), Slot::PackedByte(0));
        // An 8-byte value after a 4-byte one gets 4 bytes of padding.
        assert_eq!(cur.next_packed(8, 8).unwrap(), Slot::PackedByte(8));
        assert_eq!(cur.next_packed(2, 2).unwrap(), Slot::PackedByte(16));
        assert_eq!(cur.next_packed(4, 4).unwrap(), Slot::PackedByte(20));
        assert_eq!(cur.packed_len(), 24);
        assert_eq!(cur.stack_words_total(), 3);
    }

    #[test]
    fn packed_blob_respects_frame_capacity() {
        let mut cur = FrameCursor::new(Arch::AppleArm64);
        for _ in 0..8 {
            cur.next_packed(8, 8).unwrap();
        }
        assert!(matches!(
            cur.next_packed(1, 1),
            Err(FfiError::StackExhausted { .. })
        ));
    }

    #[test]
    fn saturation_spends_whole_pools() {
        let mut cur = FrameCursor::new(Arch::Aapcs64);
        cur.next_float_slot().unwrap();
        cur.saturate_floats();
        assert_eq!(cur.next_float_slot(), None);
        cur.saturate_ints();
        assert_eq!(cur.next_int_slot(), None);
    }
}
