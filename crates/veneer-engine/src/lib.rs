//! Runtime FFI dispatch without per-signature code generation.
//!
//! Outbound: bind a native address to a [`CallSignature`], get a
//! [`Function`], call it with tagged [`Value`]s. The classification plan
//! from `veneer-abi` is executed against a fixed-arity trampoline frame, so
//! no stubs are generated at runtime.
//!
//! Inbound: register a Rust closure with [`register_callback`] and hand the
//! returned address to native code as a plain C function pointer. A static
//! table of entry points captures the register file and dispatches through
//! the same plans in reverse.
//!
//! [`Library`] resolves the native addresses both directions start from.

mod block;
mod frame;
mod invoke;
mod loader;
mod registry;
mod trampoline;

pub use block::ArgBlock;
pub use frame::RawFrame;
pub use invoke::{plan_for, Function, NativeAddress};
pub use loader::{LoadError, Library};
pub use registry::{
    global_registry, register_callback, CallbackHandler, CallbackRegistry, TrampolineAddress,
    MAX_CALLBACKS,
};
pub use trampoline::RawReturn;

pub use veneer_abi::{classify, Arch, Plan, RetPlan};
pub use veneer_types::{CallSignature, CompositeDesc, FfiError, TypeDesc, Value};
