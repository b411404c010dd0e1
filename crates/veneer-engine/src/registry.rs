//! Inbound callbacks: the slot registry and the static entry table.
//!
//! Native code cannot call a Rust closure directly, so the engine keeps a
//! fixed table of `extern "C"` entry points, one per slot, each capturing
//! its register file into a [`RawFrame`] and dispatching through the
//! process-wide registry. Slots are allocated at registration and never
//! recycled; the table size is the hard callback limit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use veneer_abi::{classify, classify_return, Arch, CompositeClass, EightbyteClass, PlaceKind, Plan, RetPlan};
use veneer_types::{CallSignature, FfiError, TypeDesc, Value};

use crate::frame::RawFrame;

/// Hard limit on live callbacks per process.
pub const MAX_CALLBACKS: usize = 128;

/// Address of a callback entry point, handed to native code as a plain C
/// function pointer.
pub type TrampolineAddress = usize;

/// The Rust side of one callback.
pub type CallbackHandler = Box<dyn Fn(&[Value]) -> Value + Send + Sync>;

struct SlotEntry {
    handler: CallbackHandler,
    /// Signature the frame is parsed against. For hidden-pointer returns it
    /// carries a synthetic leading pointer parameter.
    dispatch_sig: CallSignature,
    plan: Arc<Plan>,
    ret: RetPlan,
    indirect_return: bool,
}

pub struct CallbackRegistry {
    arch: Arch,
    slots: Mutex<Vec<Arc<SlotEntry>>>,
}

static GLOBAL: Lazy<CallbackRegistry> = Lazy::new(|| CallbackRegistry::new(Arch::host()));

/// The process-wide registry every entry point dispatches into.
pub fn global_registry() -> &'static CallbackRegistry {
    &GLOBAL
}

/// Registers a callback with the process-wide registry and mints the entry
/// address native code should be handed. This is the only source of
/// [`TrampolineAddress`]es: the entry table dispatches into the global
/// registry, so an address minted against any other instance would invoke
/// the wrong handler.
pub fn register_callback<F>(sig: CallSignature, handler: F) -> Result<TrampolineAddress, FfiError>
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    let slot = GLOBAL.register(sig, handler)?;
    Ok(entry_address(slot))
}

impl CallbackRegistry {
    /// A standalone registry. The entry table routes into the global
    /// registry only, so standalone instances serve validation and direct
    /// dispatch; addresses for native code come from [`register_callback`].
    pub fn new(arch: Arch) -> Self {
        CallbackRegistry {
            arch,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Registers a callback and returns its slot index. Use
    /// [`register_callback`] to obtain the C function pointer for native
    /// code; a slot in a standalone instance has no entry address.
    ///
    /// Returns travel through the first integer register only, so float and
    /// homogeneous-float returns are rejected here, as are hidden-pointer
    /// returns under the arm64 conventions, where the buffer pointer arrives
    /// in a register the entry point cannot observe.
    pub fn register<F>(&self, sig: CallSignature, handler: F) -> Result<usize, FfiError>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let ret = classify_return(sig.ret(), self.arch)?;
        let indirect_return = match &ret {
            RetPlan::Void | RetPlan::Scalar(_) => false,
            RetPlan::FloatScalar(_) => {
                return Err(FfiError::Unsupported {
                    reason: "callback float returns are not supported".into(),
                })
            }
            RetPlan::Small { desc, class } => {
                let float_chunks = match class {
                    CompositeClass::Hfa { .. } => true,
                    CompositeClass::Eightbytes(classes) => {
                        classes.iter().any(|c| *c == EightbyteClass::Sse)
                    }
                    _ => false,
                };
                if desc.size() > 8 || float_chunks {
                    return Err(FfiError::Unsupported {
                        reason: "callback composite returns must fit one integer register"
                            .into(),
                    });
                }
                false
            }
            RetPlan::Indirect { .. } => {
                if !self.arch.indirect_return_uses_gp() {
                    return Err(FfiError::Unsupported {
                        reason: "hidden-pointer callback returns need the pointer in an \
                                 argument register"
                            .into(),
                    });
                }
                true
            }
        };

        let mut params = Vec::with_capacity(sig.params().len() + 1);
        if indirect_return {
            params.push(TypeDesc::Pointer);
        }
        params.extend_from_slice(sig.params());
        let dispatch_sig = CallSignature::new(params, None)?;
        let plan = Arc::new(classify(&dispatch_sig, self.arch)?);

        if self.arch.unified_slots() {
            // The positional entry declares integer words only; a float
            // argument register would be invisible to it.
            for arg in &plan.args {
                if arg.kind == PlaceKind::FloatRegister {
                    return Err(FfiError::Unsupported {
                        reason: "callback float parameters are not supported under the \
                                 unified-slot convention"
                            .into(),
                    });
                }
            }
        }

        let mut slots = self.slots.lock();
        if slots.len() >= MAX_CALLBACKS {
            return Err(FfiError::CallbackTableFull {
                capacity: MAX_CALLBACKS,
            });
        }
        let slot = slots.len();
        slots.push(Arc::new(SlotEntry {
            handler: Box::new(handler),
            dispatch_sig,
            plan,
            ret,
            indirect_return,
        }));
        Ok(slot)
    }

    /// Dispatches one captured frame. Never unwinds into native code: any
    /// handler panic or frame mismatch collapses to a zero return word.
    pub fn dispatch(&self, slot: usize, frame: &RawFrame) -> u64 {
        let entry = match self.slots.lock().get(slot) {
            Some(e) => Arc::clone(e),
            None => return 0,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| run_entry(&entry, frame))) {
            Ok(Ok(word)) => word,
            _ => 0,
        }
    }
}

fn run_entry(entry: &SlotEntry, frame: &RawFrame) -> Result<u64, FfiError> {
    // Safety: the frame was captured by this slot's entry point, and the
    // caller honors the C signature the callback was registered with.
    let mut values = unsafe { frame.parse_args(&entry.plan, &entry.dispatch_sig)? };
    if entry.indirect_return {
        let out_ptr = match values.remove(0) {
            Value::Ptr(p) if p != 0 => p,
            _ => {
                return Err(FfiError::Invariant {
                    reason: "missing return buffer pointer".into(),
                })
            }
        };
        let result = (entry.handler)(&values);
        let (desc, size) = match &entry.ret {
            RetPlan::Indirect { desc, size, .. } => (desc.clone(), *size),
            _ => {
                return Err(FfiError::Invariant {
                    reason: "indirect flag without an indirect return plan".into(),
                })
            }
        };
        let image = result.bytes(&TypeDesc::Composite(desc))?;
        // Safety: the caller supplied a buffer of the declared return size.
        unsafe { std::ptr::copy_nonoverlapping(image.as_ptr(), out_ptr as *mut u8, size) };
        // The hidden-pointer protocol echoes the buffer address back.
        return Ok(out_ptr as u64);
    }
    let result = (entry.handler)(&values);
    encode_result(&result, &entry.ret)
}

/// Encodes a callback result into the single integer return word.
fn encode_result(value: &Value, ret: &RetPlan) -> Result<u64, FfiError> {
    match ret {
        RetPlan::Void => Ok(0),
        RetPlan::Scalar(desc) => value.as_word(desc),
        RetPlan::Small { desc, .. } => {
            let image = value.bytes(&TypeDesc::Composite(desc.clone()))?;
            let mut w = [0u8; 8];
            w[..image.len()].copy_from_slice(&image);
            Ok(u64::from_le_bytes(w))
        }
        _ => Err(FfiError::Invariant {
            reason: "return class rejected at registration".into(),
        }),
    }
}

// --- the static entry table ---

#[cfg(not(windows))]
type EntryFn = unsafe extern "C" fn(
    f64, f64, f64, f64, f64, f64, f64, f64,
    u64, u64, u64, u64, u64, u64, u64, u64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> u64;

/// One monomorphized entry per slot. Declaring the full frame as parameters
/// makes the compiler materialize every argument register and the caller's
/// stack words for us; slots the real signature does not use hold garbage
/// the plan never reads.
#[cfg(not(windows))]
#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn entry<const SLOT: usize>(
    f0: f64, f1: f64, f2: f64, f3: f64, f4: f64, f5: f64, f6: f64, f7: f64,
    w0: u64, w1: u64, w2: u64, w3: u64, w4: u64, w5: u64, w6: u64, w7: u64,
    w8: u64, w9: u64, w10: u64, w11: u64, w12: u64, w13: u64, w14: u64, w15: u64,
) -> u64 {
    let frame = RawFrame {
        floats: [
            f0.to_bits(),
            f1.to_bits(),
            f2.to_bits(),
            f3.to_bits(),
            f4.to_bits(),
            f5.to_bits(),
            f6.to_bits(),
            f7.to_bits(),
        ],
        words: [
            w0, w1, w2, w3, w4, w5, w6, w7, w8, w9, w10, w11, w12, w13, w14, w15,
        ],
    };
    global_registry().dispatch(SLOT, &frame)
}

#[cfg(windows)]
type EntryFn = unsafe extern "C" fn(
    u64, u64, u64, u64, u64, u64, u64, u64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> u64;

#[cfg(windows)]
#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn entry<const SLOT: usize>(
    w0: u64, w1: u64, w2: u64, w3: u64, w4: u64, w5: u64, w6: u64, w7: u64,
    w8: u64, w9: u64, w10: u64, w11: u64, w12: u64, w13: u64, w14: u64, w15: u64,
) -> u64 {
    let frame = RawFrame {
        floats: [0; 8],
        words: [
            w0, w1, w2, w3, w4, w5, w6, w7, w8, w9, w10, w11, w12, w13, w14, w15,
        ],
    };
    global_registry().dispatch(SLOT, &frame)
}

macro_rules! entry_table {
    ($($slot:literal)*) => {
        [$(entry::<$slot> as EntryFn),*]
    };
}

static ENTRIES: [EntryFn; MAX_CALLBACKS] = entry_table![
    0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
    16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
    32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47
    48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63
    64 65 66 67 68 69 70 71 72 73 74 75 76 77 78 79
    80 81 82 83 84 85 86 87 88 89 90 91 92 93 94 95
    96 97 98 99 100 101 102 103 104 105 106 107 108 109 110 111
    112 113 114 115 116 117 118 119 120 121 122 123 124 125 126 127
];

fn entry_address(slot: usize) -> TrampolineAddress {
    ENTRIES[slot] as TrampolineAddress
}
