//! Outbound calls: binding, plan caching, and dispatch through the
//! trampoline family.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use veneer_abi::{
    classify, Arch, CompositeClass, EightbyteClass, Plan, RetPlan, CALL_WORDS_SMALL,
};
use veneer_types::{CallSignature, FfiError, TypeDesc, Value};

use crate::block::ArgBlock;
use crate::trampoline::{
    self, RawReturn, RetBlob, RetFloatInt, RetFloatPair, RetFloatQuad, RetIntFloat, RetPair,
};

/// Address of a native function in this process.
pub type NativeAddress = usize;

static PLAN_CACHE: Lazy<Mutex<FxHashMap<(CallSignature, Arch), Arc<Plan>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Classification with memoization. Plans are pure functions of the
/// signature and convention, so cached entries are shared freely.
pub fn plan_for(sig: &CallSignature, arch: Arch) -> Result<Arc<Plan>, FfiError> {
    let key = (sig.clone(), arch);
    let mut cache = PLAN_CACHE.lock();
    if let Some(plan) = cache.get(&key) {
        return Ok(Arc::clone(plan));
    }
    let plan = Arc::new(classify(sig, arch)?);
    cache.insert(key, Arc::clone(&plan));
    Ok(plan)
}

/// A native function bound to a signature, ready to call.
pub struct Function {
    target: NativeAddress,
    sig: CallSignature,
    plan: Arc<Plan>,
}

impl Function {
    /// Binds `target` under the host convention. Classification errors
    /// surface here, before any call is attempted.
    pub fn bind(target: NativeAddress, sig: CallSignature) -> Result<Self, FfiError> {
        Self::bind_on(target, sig, Arch::host())
    }

    /// Binds under an explicit convention. Plans for a foreign convention
    /// can be inspected but must only be called on their own host.
    pub fn bind_on(
        target: NativeAddress,
        sig: CallSignature,
        arch: Arch,
    ) -> Result<Self, FfiError> {
        let plan = plan_for(&sig, arch)?;
        Ok(Function { target, sig, plan })
    }

    pub fn signature(&self) -> &CallSignature {
        &self.sig
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Calls the bound function.
    ///
    /// # Safety
    /// The target must be a live function whose real C signature matches the
    /// bound one, and any pointer arguments must satisfy its contract.
    pub unsafe fn call(&self, args: &[Value]) -> Result<Value, FfiError> {
        let block = ArgBlock::build(&self.plan, &self.sig, args)?;
        let raw = raw_call(self.target, &self.plan, &block, false);
        decode_return(&self.plan.ret, &raw)
    }

    /// Calls a variadic target: the fixed arguments per the bound signature,
    /// plus trailing arguments that get C default promotions before
    /// classification.
    ///
    /// # Safety
    /// See [`Function::call`].
    pub unsafe fn call_variadic(
        &self,
        args: &[Value],
        trailing: &[(TypeDesc, Value)],
    ) -> Result<Value, FfiError> {
        let descs: Vec<TypeDesc> = trailing.iter().map(|(d, _)| d.clone()).collect();
        let wide_sig = self.sig.with_trailing(&descs)?;
        let plan = plan_for(&wide_sig, self.plan.arch)?;
        let mut all = args.to_vec();
        all.extend(trailing.iter().map(|(_, v)| promote_value(v)));
        let block = ArgBlock::build(&plan, &wide_sig, &all)?;
        let raw = raw_call(self.target, &plan, &block, true);
        decode_return(&plan.ret, &raw)
    }
}

/// Widens a trailing variadic value to match its promoted descriptor.
fn promote_value(value: &Value) -> Value {
    match value {
        Value::F32(v) => Value::Float(f64::from(*v)),
        Value::Bool(v) => Value::Int(i64::from(*v)),
        other => other.clone(),
    }
}

/// Which return-register shape the trampoline must declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetShape {
    IntPair,
    FloatPair,
    FloatQuad,
    IntFloat,
    FloatInt,
    Indirect,
}

fn ret_shape(ret: &RetPlan) -> RetShape {
    match ret {
        RetPlan::Void | RetPlan::Scalar(_) => RetShape::IntPair,
        RetPlan::FloatScalar(_) => RetShape::FloatPair,
        RetPlan::Indirect { .. } => RetShape::Indirect,
        RetPlan::Small { class, .. } => match class {
            CompositeClass::Hfa { count, .. } if *count > 2 => RetShape::FloatQuad,
            CompositeClass::Hfa { .. } => RetShape::FloatPair,
            CompositeClass::Eightbytes(classes) => match classes.as_slice() {
                [EightbyteClass::Sse] => RetShape::FloatPair,
                [EightbyteClass::Sse, EightbyteClass::Sse] => RetShape::FloatPair,
                [EightbyteClass::Integer, EightbyteClass::Sse] => RetShape::IntFloat,
                [EightbyteClass::Sse, EightbyteClass::Integer] => RetShape::FloatInt,
                _ => RetShape::IntPair,
            },
            // Empty, Hva, and byte-chunk images come back in the integer
            // pair; Memory never classifies as Small.
            _ => RetShape::IntPair,
        },
    }
}

unsafe fn raw_call(
    target: NativeAddress,
    plan: &Plan,
    block: &ArgBlock,
    variadic: bool,
) -> RawReturn {
    let mut raw = RawReturn::default();
    let shape = ret_shape(&plan.ret);

    if plan.arch.unified_slots() {
        // Positional trampoline: float bits travel in the integer words and
        // only one return register exists per class.
        match shape {
            RetShape::FloatPair => {
                let r: f64 = trampoline::call_positional16(target, block.words());
                raw.floats[0] = r.to_bits();
            }
            RetShape::Indirect => {
                let r: RetBlob = trampoline::call_positional16(target, block.words());
                raw.blob = Some(Box::new(r.bytes));
            }
            _ => {
                let r: u64 = trampoline::call_positional16(target, block.words());
                raw.ints[0] = r;
            }
        }
        return raw;
    }

    // System V amd64 variadic callees read AL as the count of vector
    // registers in use; a fixed-signature trampoline would leave it stale.
    let need_al = variadic && plan.arch == Arch::SysVAmd64;
    let wide = plan.call_words > CALL_WORDS_SMALL;
    macro_rules! call {
        ($ret:ty) => {
            if need_al {
                trampoline::call_variadic16::<$ret>(target, block.floats(), block.words())
            } else if wide {
                trampoline::call16::<$ret>(target, block.floats(), block.words())
            } else {
                trampoline::call8::<$ret>(target, block.floats(), block.words())
            }
        };
    }
    match shape {
        RetShape::IntPair => {
            let r: RetPair = call!(RetPair);
            raw.ints = [r.lo, r.hi];
        }
        RetShape::FloatPair => {
            let r: RetFloatPair = call!(RetFloatPair);
            raw.floats[0] = r.f0.to_bits();
            raw.floats[1] = r.f1.to_bits();
        }
        RetShape::FloatQuad => {
            let r: RetFloatQuad = call!(RetFloatQuad);
            raw.floats = [
                r.f0.to_bits(),
                r.f1.to_bits(),
                r.f2.to_bits(),
                r.f3.to_bits(),
            ];
        }
        RetShape::IntFloat => {
            let r: RetIntFloat = call!(RetIntFloat);
            raw.ints[0] = r.a;
            raw.floats[0] = r.f.to_bits();
        }
        RetShape::FloatInt => {
            let r: RetFloatInt = call!(RetFloatInt);
            raw.floats[0] = r.f.to_bits();
            raw.ints[0] = r.a;
        }
        RetShape::Indirect => {
            let r: RetBlob = call!(RetBlob);
            raw.blob = Some(Box::new(r.bytes));
        }
    }
    raw
}

/// Reassembles the returned [`Value`] from the normalized return registers.
fn decode_return(ret: &RetPlan, raw: &RawReturn) -> Result<Value, FfiError> {
    match ret {
        RetPlan::Void => Ok(Value::Unit),
        RetPlan::Scalar(desc) => Value::from_word(raw.ints[0], desc),
        RetPlan::FloatScalar(desc) => Value::from_word(raw.floats[0], desc),
        RetPlan::Small { desc, class } => {
            let size = desc.size();
            let mut image = vec![0u8; size];
            match class {
                CompositeClass::Empty => {}
                CompositeClass::Hfa { width, count } => {
                    let elem = *width as usize;
                    for i in 0..*count as usize {
                        let bytes = raw.floats[i].to_le_bytes();
                        image[i * elem..(i + 1) * elem].copy_from_slice(&bytes[..elem]);
                    }
                }
                CompositeClass::Eightbytes(classes) => {
                    let (mut next_int, mut next_float) = (0, 0);
                    for (k, chunk) in classes.iter().enumerate() {
                        let word = match chunk {
                            EightbyteClass::Integer => {
                                let w = raw.ints[next_int];
                                next_int += 1;
                                w
                            }
                            EightbyteClass::Sse => {
                                let w = raw.floats[next_float];
                                next_float += 1;
                                w
                            }
                        };
                        let off = k * 8;
                        let len = (size - off).min(8);
                        image[off..off + len].copy_from_slice(&word.to_le_bytes()[..len]);
                    }
                }
                // Hva and byte-chunk returns arrive as a byte image in the
                // integer pair.
                _ => {
                    for (k, chunk) in image.chunks_mut(8).enumerate() {
                        let len = chunk.len();
                        chunk.copy_from_slice(&raw.ints[k].to_le_bytes()[..len]);
                    }
                }
            }
            Ok(Value::Composite(image))
        }
        RetPlan::Indirect { size, .. } => {
            let blob = raw.blob.as_ref().ok_or_else(|| FfiError::Invariant {
                reason: "hidden-pointer return produced no buffer".into(),
            })?;
            Ok(Value::Composite(blob[..*size].to_vec()))
        }
    }
}
