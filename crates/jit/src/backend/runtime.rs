//! The fixed whitelist of host symbols emitted code may call. Every entry is
//! a C-ABI shim so the call sequence is one `mov rax, imm64; call rax`.

use crate::ir::{BinOp, Intrinsic};

pub extern "C" fn rt_sinf(x: f32) -> f32 {
    x.sin()
}

pub extern "C" fn rt_cosf(x: f32) -> f32 {
    x.cos()
}

pub extern "C" fn rt_tanf(x: f32) -> f32 {
    x.tan()
}

pub extern "C" fn rt_asinf(x: f32) -> f32 {
    x.asin()
}

pub extern "C" fn rt_acosf(x: f32) -> f32 {
    x.acos()
}

pub extern "C" fn rt_atanf(x: f32) -> f32 {
    x.atan()
}

pub extern "C" fn rt_atan2f(y: f32, x: f32) -> f32 {
    y.atan2(x)
}

pub extern "C" fn rt_powf(x: f32, y: f32) -> f32 {
    x.powf(y)
}

pub extern "C" fn rt_expf(x: f32) -> f32 {
    x.exp()
}

pub extern "C" fn rt_logf(x: f32) -> f32 {
    x.ln()
}

pub extern "C" fn rt_exp2f(x: f32) -> f32 {
    x.exp2()
}

pub extern "C" fn rt_log2f(x: f32) -> f32 {
    x.log2()
}

pub extern "C" fn rt_fmodf(x: f32, y: f32) -> f32 {
    x % y
}

/// Unary helper for a float intrinsic, if it lowers to a call.
pub fn unary_helper(op: Intrinsic) -> Option<extern "C" fn(f32) -> f32> {
    Some(match op {
        Intrinsic::Sin => rt_sinf,
        Intrinsic::Cos => rt_cosf,
        Intrinsic::Tan => rt_tanf,
        Intrinsic::Asin => rt_asinf,
        Intrinsic::Acos => rt_acosf,
        Intrinsic::Atan => rt_atanf,
        Intrinsic::Exp => rt_expf,
        Intrinsic::Log => rt_logf,
        Intrinsic::Exp2 => rt_exp2f,
        Intrinsic::Log2 => rt_log2f,
        _ => return None,
    })
}

/// Binary helper for a float intrinsic.
pub fn binary_helper(op: Intrinsic) -> Option<extern "C" fn(f32, f32) -> f32> {
    Some(match op {
        Intrinsic::Atan2 => rt_atan2f,
        Intrinsic::Pow => rt_powf,
        _ => return None,
    })
}

/// Binary helper for a float binary op (only `Rem` needs one).
pub fn bin_op_helper(op: BinOp) -> Option<extern "C" fn(f32, f32) -> f32> {
    match op {
        BinOp::Rem => Some(rt_fmodf),
        _ => None,
    }
}
