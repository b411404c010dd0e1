//! The closed set of supported calling conventions.

/// Float-register words in every trampoline frame (both directions).
pub const FLOAT_WORDS: usize = 8;

/// Integer-register plus stack words in the wide trampoline frame. Stack
/// capacity for a given convention is `CALL_WORDS` minus its integer
/// register count.
pub const CALL_WORDS: usize = 16;

/// Word count of the short trampoline, used when a call fits entirely in
/// registers.
pub const CALL_WORDS_SMALL: usize = 8;

/// Largest composite return the engine accepts through the hidden-pointer
/// path. The receiving buffer in the trampoline layer has a static size, so
/// bigger returns are rejected when the signature is built.
pub const INDIRECT_RETURN_MAX: usize = 128;

/// One calling convention, as a (CPU, OS) pair.
///
/// Selected once per process with [`Arch::host`]; every variant's
/// classification rules are pure and can be exercised on any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// System V AMD64 (Linux, macOS, BSD on x86-64).
    SysVAmd64,
    /// AAPCS64 (Linux and other non-Apple arm64).
    Aapcs64,
    /// Apple arm64: AAPCS64 plus byte-packed small structs and C-style
    /// contiguous stack-argument packing.
    AppleArm64,
    /// Windows x64: one positional budget of four slots shared by integer
    /// and float arguments.
    WindowsX64,
}

impl Arch {
    /// The convention of the running process.
    pub fn host() -> Arch {
        if cfg!(all(target_arch = "x86_64", target_os = "windows")) {
            Arch::WindowsX64
        } else if cfg!(target_arch = "x86_64") {
            Arch::SysVAmd64
        } else if cfg!(all(
            target_arch = "aarch64",
            any(target_os = "macos", target_os = "ios")
        )) {
            Arch::AppleArm64
        } else {
            Arch::Aapcs64
        }
    }

    /// General-purpose argument registers.
    pub const fn integer_registers(self) -> usize {
        match self {
            Arch::SysVAmd64 => 6,
            Arch::Aapcs64 | Arch::AppleArm64 => 8,
            Arch::WindowsX64 => 4,
        }
    }

    /// Float argument registers.
    pub const fn float_registers(self) -> usize {
        match self {
            Arch::WindowsX64 => 4,
            _ => FLOAT_WORDS,
        }
    }

    /// Whether integer and float arguments share one positional slot budget.
    pub const fn unified_slots(self) -> bool {
        matches!(self, Arch::WindowsX64)
    }

    /// Whether stack-bound arguments are packed into one contiguous C-layout
    /// blob once registers are exhausted.
    pub const fn packs_stack_args(self) -> bool {
        matches!(self, Arch::AppleArm64)
    }

    /// Whether a partially fitting composite spills whole to the stack
    /// (arm64 rule) instead of chunk by chunk (amd64 rule).
    pub const fn spills_composites_whole(self) -> bool {
        matches!(self, Arch::Aapcs64 | Arch::AppleArm64)
    }

    /// Whether an indirect (hidden-pointer) return consumes the first
    /// general-purpose argument register. On arm64 the pointer travels in a
    /// dedicated register instead.
    pub const fn indirect_return_uses_gp(self) -> bool {
        matches!(self, Arch::SysVAmd64 | Arch::WindowsX64)
    }

    /// Stack words available in the wide trampoline frame.
    pub const fn stack_words(self) -> usize {
        CALL_WORDS - self.integer_registers()
    }

    /// Largest composite passed by value; anything bigger goes by reference.
    pub const fn register_passing_threshold(self) -> usize {
        16
    }
}
