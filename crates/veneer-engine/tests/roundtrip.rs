//! End-to-end dispatch against real native functions on the host
//! convention: C-ABI stubs compiled into this test binary, plus a few
//! process symbols, called through the full classify/marshal/trampoline
//! path, and callbacks invoked the way native code would invoke them.

use std::mem;

use veneer_engine::{
    register_callback, CallSignature, CompositeDesc, FfiError, Function, TypeDesc, Value,
};

extern "C" fn add3(a: i64, b: i32, c: u8) -> i64 {
    a + i64::from(b) + i64::from(c)
}

extern "C" fn mix(a: f64, b: i64, c: f32) -> f64 {
    a + b as f64 + f64::from(c)
}

extern "C" fn halve(x: f32) -> f32 {
    x / 2.0
}

extern "C" fn is_even(x: i64) -> bool {
    x % 2 == 0
}

#[allow(clippy::too_many_arguments)]
extern "C" fn sum10(
    a: i64, b: i64, c: i64, d: i64, e: i64,
    f: i64, g: i64, h: i64, i: i64, j: i64,
) -> i64 {
    a + b + c + d + e + f + g + h + i + j
}

#[allow(clippy::too_many_arguments)]
extern "C" fn sum10f(
    a: f64, b: f64, c: f64, d: f64, e: f64,
    f: f64, g: f64, h: f64, i: f64, j: f64,
) -> f64 {
    a + b + c + d + e + f + g + h + i + j
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PairI32 {
    a: i32,
    b: i32,
}

extern "C" fn swap_pair(p: PairI32) -> PairI32 {
    PairI32 { a: p.b, b: p.a }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct IntDouble {
    n: i64,
    x: f64,
}

extern "C" fn scale(v: IntDouble) -> IntDouble {
    IntDouble {
        n: v.n * 2,
        x: v.x * 2.0,
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Big {
    vals: [u64; 4],
}

// Oversized composites travel by reference under the engine's convention,
// so the native side sees a pointer.
extern "C" fn sum_big(p: *const Big) -> u64 {
    let b = unsafe { &*p };
    b.vals.iter().sum()
}

extern "C" fn make_big(seed: u64) -> Big {
    Big {
        vals: [seed, seed + 1, seed + 2, seed + 3],
    }
}

fn pair_desc() -> TypeDesc {
    TypeDesc::Composite(CompositeDesc::natural(vec![TypeDesc::I32, TypeDesc::I32]).unwrap())
}

fn big_desc() -> TypeDesc {
    TypeDesc::Composite(CompositeDesc::array(TypeDesc::U64, 4).unwrap())
}

fn bytes_of<T: Copy>(v: &T) -> Vec<u8> {
    let ptr = v as *const T as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, mem::size_of::<T>()) }.to_vec()
}

#[test]
fn integer_arguments_and_return() {
    let sig = CallSignature::new(
        vec![TypeDesc::I64, TypeDesc::I32, TypeDesc::U8],
        Some(TypeDesc::I64),
    )
    .unwrap();
    let f = Function::bind(add3 as usize, sig).unwrap();
    let out = unsafe { f.call(&[Value::Int(-100), Value::Int(40), Value::UInt(2)]) }.unwrap();
    assert_eq!(out, Value::Int(-58));
}

#[test]
fn float_and_integer_pools_mix() {
    let sig = CallSignature::new(
        vec![TypeDesc::F64, TypeDesc::I64, TypeDesc::F32],
        Some(TypeDesc::F64),
    )
    .unwrap();
    let f = Function::bind(mix as usize, sig).unwrap();
    let out =
        unsafe { f.call(&[Value::Float(0.5), Value::Int(2), Value::F32(0.25)]) }.unwrap();
    assert_eq!(out, Value::Float(2.75));
}

#[test]
fn f32_return_comes_back_narrow() {
    let sig = CallSignature::new(vec![TypeDesc::F32], Some(TypeDesc::F32)).unwrap();
    let f = Function::bind(halve as usize, sig).unwrap();
    let out = unsafe { f.call(&[Value::F32(7.0)]) }.unwrap();
    assert_eq!(out, Value::F32(3.5));
}

#[test]
fn bool_return_ignores_register_garbage() {
    let sig = CallSignature::new(vec![TypeDesc::I64], Some(TypeDesc::BOOL)).unwrap();
    let f = Function::bind(is_even as usize, sig).unwrap();
    assert_eq!(unsafe { f.call(&[Value::Int(4)]) }.unwrap(), Value::Bool(true));
    assert_eq!(
        unsafe { f.call(&[Value::Int(7)]) }.unwrap(),
        Value::Bool(false)
    );
}

#[test]
fn arguments_overflow_to_the_stack() {
    let sig = CallSignature::new(vec![TypeDesc::I64; 10], Some(TypeDesc::I64)).unwrap();
    let f = Function::bind(sum10 as usize, sig).unwrap();
    let args: Vec<Value> = (1..=10).map(Value::Int).collect();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::Int(55));
}

#[test]
fn float_arguments_overflow_to_the_stack() {
    // Ten doubles exhaust the eight float registers; the last two must
    // travel as stack words.
    let sig = CallSignature::new(vec![TypeDesc::F64; 10], Some(TypeDesc::F64)).unwrap();
    let f = Function::bind(sum10f as usize, sig).unwrap();
    let args: Vec<Value> = (1..=10).map(|n| Value::Float(n as f64)).collect();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::Float(55.0));
}

#[test]
fn small_struct_round_trips_by_value() {
    let sig = CallSignature::new(vec![pair_desc()], Some(pair_desc())).unwrap();
    let f = Function::bind(swap_pair as usize, sig).unwrap();
    let arg = PairI32 { a: 11, b: -22 };
    let out = unsafe { f.call(&[Value::Composite(bytes_of(&arg))]) }.unwrap();
    assert_eq!(out, Value::Composite(bytes_of(&PairI32 { a: -22, b: 11 })));
}

#[test]
fn mixed_struct_round_trips_by_value() {
    let desc = TypeDesc::Composite(
        CompositeDesc::natural(vec![TypeDesc::I64, TypeDesc::F64]).unwrap(),
    );
    let sig = CallSignature::new(vec![desc.clone()], Some(desc)).unwrap();
    let f = Function::bind(scale as usize, sig).unwrap();
    let arg = IntDouble { n: 21, x: 1.5 };
    let out = unsafe { f.call(&[Value::Composite(bytes_of(&arg))]) }.unwrap();
    assert_eq!(
        out,
        Value::Composite(bytes_of(&IntDouble { n: 42, x: 3.0 }))
    );
}

#[test]
fn large_struct_travels_by_reference() {
    let sig = CallSignature::new(vec![big_desc()], Some(TypeDesc::U64)).unwrap();
    let f = Function::bind(sum_big as usize, sig).unwrap();
    let arg = Big {
        vals: [10, 20, 30, 40],
    };
    let out = unsafe { f.call(&[Value::Composite(bytes_of(&arg))]) }.unwrap();
    assert_eq!(out, Value::UInt(100));
}

#[test]
fn large_struct_returns_through_hidden_pointer() {
    let sig = CallSignature::new(vec![TypeDesc::U64], Some(big_desc())).unwrap();
    let f = Function::bind(make_big as usize, sig).unwrap();
    let out = unsafe { f.call(&[Value::UInt(5)]) }.unwrap();
    assert_eq!(
        out,
        Value::Composite(bytes_of(&Big {
            vals: [5, 6, 7, 8]
        }))
    );
}

#[test]
fn arity_mismatch_is_a_construction_error() {
    let sig = CallSignature::new(vec![TypeDesc::I64], Some(TypeDesc::I64)).unwrap();
    let f = Function::bind(add3 as usize, sig).unwrap();
    let err = unsafe { f.call(&[]) }.unwrap_err();
    assert!(matches!(err, FfiError::ArgumentCount { expected: 1, got: 0 }));
}

#[test]
fn callback_is_callable_as_a_plain_c_function() {
    let sig =
        CallSignature::new(vec![TypeDesc::I32, TypeDesc::I32], Some(TypeDesc::I32)).unwrap();
    let addr = register_callback(sig, |args| match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a * b),
        _ => Value::Int(0),
    })
    .unwrap();
    let f: extern "C" fn(i32, i32) -> i32 = unsafe { mem::transmute(addr) };
    assert_eq!(f(6, -7), -42);
}

#[cfg(not(windows))]
#[test]
fn callback_sees_float_arguments() {
    let sig = CallSignature::new(vec![TypeDesc::F64, TypeDesc::I64], Some(TypeDesc::I64)).unwrap();
    let addr = register_callback(sig, |args| match (&args[0], &args[1]) {
        (Value::Float(x), Value::Int(n)) => Value::Int((x * *n as f64) as i64),
        _ => Value::Int(0),
    })
    .unwrap();
    let f: extern "C" fn(f64, i64) -> i64 = unsafe { mem::transmute(addr) };
    assert_eq!(f(2.5, 4), 10);
}

#[test]
fn callback_reads_caller_stack_words() {
    let sig = CallSignature::new(vec![TypeDesc::I64; 10], Some(TypeDesc::I64)).unwrap();
    let addr = register_callback(sig, |args| {
        let sum = args
            .iter()
            .map(|v| match v {
                Value::Int(n) => *n,
                _ => 0,
            })
            .sum();
        Value::Int(sum)
    })
    .unwrap();
    #[allow(clippy::type_complexity)]
    let f: extern "C" fn(i64, i64, i64, i64, i64, i64, i64, i64, i64, i64) -> i64 =
        unsafe { mem::transmute(addr) };
    assert_eq!(f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10), 55);
}

#[test]
fn callback_receives_small_structs() {
    let sig = CallSignature::new(vec![pair_desc()], Some(TypeDesc::I32)).unwrap();
    let addr = register_callback(sig, |args| match &args[0] {
        Value::Composite(image) => {
            let a = i32::from_le_bytes([image[0], image[1], image[2], image[3]]);
            let b = i32::from_le_bytes([image[4], image[5], image[6], image[7]]);
            Value::Int(i64::from(a - b))
        }
        _ => Value::Int(0),
    })
    .unwrap();
    let f: extern "C" fn(PairI32) -> i32 = unsafe { mem::transmute(addr) };
    assert_eq!(f(PairI32 { a: 30, b: 12 }), 18);
}

#[test]
fn callback_echoes_a_small_struct_byte_identically() {
    let sig = CallSignature::new(vec![pair_desc()], Some(pair_desc())).unwrap();
    let addr = register_callback(sig, |args| args[0].clone()).unwrap();
    let f: extern "C" fn(PairI32) -> PairI32 = unsafe { mem::transmute(addr) };
    let arg = PairI32 {
        a: -123456,
        b: 0x5EED_1234,
    };
    let out = f(arg);
    assert_eq!(bytes_of(&out), bytes_of(&arg));
}

#[cfg(target_arch = "x86_64")]
#[test]
fn callback_fills_a_hidden_return_buffer() {
    let sig = CallSignature::new(vec![TypeDesc::U64], Some(big_desc())).unwrap();
    let addr = register_callback(sig, |args| {
        let seed = match args[0] {
            Value::UInt(v) => v,
            _ => 0,
        };
        Value::Composite(bytes_of(&Big {
            vals: [seed, seed * 2, seed * 3, seed * 4],
        }))
    })
    .unwrap();
    let f: extern "C" fn(u64) -> Big = unsafe { mem::transmute(addr) };
    let out = f(3);
    assert_eq!(out.vals, [3, 6, 9, 12]);
}

#[cfg(unix)]
#[test]
fn process_symbols_resolve_and_call() {
    use veneer_engine::Library;

    let lib = Library::this_process().unwrap();
    let strlen = lib.symbol("strlen").unwrap();
    let sig = CallSignature::new(vec![TypeDesc::PTR], Some(TypeDesc::U64)).unwrap();
    let f = Function::bind(strlen, sig).unwrap();
    let text = std::ffi::CString::new("veneer").unwrap();
    let out = unsafe { f.call(&[Value::Ptr(text.as_ptr() as usize)]) }.unwrap();
    assert_eq!(out, Value::UInt(6));
}

#[cfg(unix)]
#[test]
fn variadic_call_promotes_trailing_arguments() {
    use veneer_engine::Library;

    let lib = Library::this_process().unwrap();
    let snprintf = lib.symbol("snprintf").unwrap();
    let sig = CallSignature::new(
        vec![TypeDesc::PTR, TypeDesc::U64, TypeDesc::PTR],
        Some(TypeDesc::I32),
    )
    .unwrap();
    let f = Function::bind(snprintf, sig).unwrap();

    let mut buf = vec![0u8; 64];
    let fmt = std::ffi::CString::new("%ld then %.1f").unwrap();
    let out = unsafe {
        f.call_variadic(
            &[
                Value::Ptr(buf.as_mut_ptr() as usize),
                Value::UInt(buf.len() as u64),
                Value::Ptr(fmt.as_ptr() as usize),
            ],
            &[
                (TypeDesc::I64, Value::Int(-42)),
                // An f32 trailing argument must be promoted to double.
                (TypeDesc::F32, Value::F32(1.5)),
            ],
        )
    }
    .unwrap();
    assert_eq!(out, Value::Int(12));
    let written = buf.iter().position(|b| *b == 0).unwrap();
    assert_eq!(&buf[..written], b"-42 then 1.5");
}

#[cfg(unix)]
#[test]
fn variadic_floats_reach_the_callee_intact() {
    use veneer_engine::Library;

    // A variadic callee saves only as many vector registers as the call
    // site advertises, so every trailing double must survive its prologue.
    let lib = Library::this_process().unwrap();
    let snprintf = lib.symbol("snprintf").unwrap();
    let sig = CallSignature::new(
        vec![TypeDesc::PTR, TypeDesc::U64, TypeDesc::PTR],
        Some(TypeDesc::I32),
    )
    .unwrap();
    let f = Function::bind(snprintf, sig).unwrap();

    let mut buf = vec![0u8; 64];
    let fmt = std::ffi::CString::new("%.0f%.0f%.0f%.0f%.0f%.0f%.0f%.0f").unwrap();
    let trailing: Vec<(TypeDesc, Value)> = (1..=8)
        .map(|n| (TypeDesc::F64, Value::Float(n as f64)))
        .collect();
    let out = unsafe {
        f.call_variadic(
            &[
                Value::Ptr(buf.as_mut_ptr() as usize),
                Value::UInt(buf.len() as u64),
                Value::Ptr(fmt.as_ptr() as usize),
            ],
            &trailing,
        )
    }
    .unwrap();
    assert_eq!(out, Value::Int(8));
    let written = buf.iter().position(|b| *b == 0).unwrap();
    assert_eq!(&buf[..written], b"12345678");
}
