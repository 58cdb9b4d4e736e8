//! Lane-wise evaluation of pure instructions over raw 16-byte slots.
//!
//! Both the constant folder and the portable engine call into this module,
//! and the semantics here deliberately mirror what the x86-64 emitter
//! produces (SSE min/max operand order, truncating float→int conversion
//! yielding `i32::MIN` on overflow, shift counts saturating the lane).

use crate::ir::{BinOp, CastOp, CmpOp, Intrinsic};
use crate::ty::Ty;

pub type Slot = [u32; 4];

pub fn lane_get(slot: &Slot, lane_bytes: usize, i: usize) -> u64 {
    let bytes: [u8; 16] = slot_bytes(slot);
    let off = i * lane_bytes;
    let mut v = 0u64;
    for b in 0..lane_bytes {
        v |= (bytes[off + b] as u64) << (b * 8);
    }
    v
}

pub fn lane_set(slot: &mut Slot, lane_bytes: usize, i: usize, v: u64) {
    let mut bytes: [u8; 16] = slot_bytes(slot);
    let off = i * lane_bytes;
    for b in 0..lane_bytes {
        bytes[off + b] = (v >> (b * 8)) as u8;
    }
    *slot = bytes_slot(&bytes);
}

fn slot_bytes(slot: &Slot) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, w) in slot.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}

fn bytes_slot(bytes: &[u8; 16]) -> Slot {
    let mut out = [0u32; 4];
    for (i, w) in out.iter_mut().enumerate() {
        *w = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    }
    out
}

fn sext(v: u64, bytes: usize) -> i64 {
    let shift = 64 - bytes * 8;
    ((v << shift) as i64) >> shift
}

fn truncate(v: u64, bytes: usize) -> u64 {
    if bytes >= 8 {
        v
    } else {
        v & ((1u64 << (bytes * 8)) - 1)
    }
}

/// `cvttss2si`-style conversion with 64-bit intermediate.
fn cvtt_f32_i64(v: f32) -> i64 {
    if v.is_nan() || v < -9.223372e18 || v > 9.223372e18 {
        i64::MIN
    } else {
        v as i64
    }
}

pub fn eval_bin(op: BinOp, ty: Ty, a: &Slot, b: &Slot) -> Slot {
    let mut out = [0u32; 4];
    let lanes = ty.lanes().max(1);
    let bytes = ty.lane_bytes().max(1);

    if ty.is_float() {
        for i in 0..lanes {
            let x = f32::from_bits(lane_get(a, 4, i) as u32);
            let y = f32::from_bits(lane_get(b, 4, i) as u32);
            let r = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Rem => x % y,
                BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr => {
                    let xb = x.to_bits();
                    let yb = y.to_bits();
                    f32::from_bits(match op {
                        BinOp::And => xb & yb,
                        BinOp::Or => xb | yb,
                        BinOp::Xor => xb ^ yb,
                        _ => xb,
                    })
                }
            };
            lane_set(&mut out, 4, i, r.to_bits() as u64);
        }
        return out;
    }

    // Shift counts come from lane 0 of the right operand.
    let shift_count = lane_get(b, bytes, 0);

    for i in 0..lanes {
        let x = lane_get(a, bytes, i);
        let y = lane_get(b, bytes, i);
        let bits = bytes * 8;

        let r: u64 = match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div => {
                if ty.is_signed() {
                    let d = sext(y, bytes);
                    if d == 0 {
                        0
                    } else {
                        sext(x, bytes).wrapping_div(d) as u64
                    }
                } else if y == 0 {
                    0
                } else {
                    x / y
                }
            }
            BinOp::Rem => {
                if ty.is_signed() {
                    let d = sext(y, bytes);
                    if d == 0 {
                        0
                    } else {
                        sext(x, bytes).wrapping_rem(d) as u64
                    }
                } else if y == 0 {
                    0
                } else {
                    x % y
                }
            }
            BinOp::And => x & y,
            BinOp::Or => x | y,
            BinOp::Xor => x ^ y,
            BinOp::Shl => {
                if shift_count as usize >= bits {
                    0
                } else {
                    x << shift_count
                }
            }
            BinOp::Shr => {
                if ty.is_signed() {
                    let count = (shift_count as usize).min(bits - 1);
                    (sext(x, bytes) >> count) as u64
                } else if shift_count as usize >= bits {
                    0
                } else {
                    x >> shift_count
                }
            }
        };

        lane_set(&mut out, bytes, i, truncate(r, bytes));
    }

    out
}

pub fn eval_neg(ty: Ty, a: &Slot) -> Slot {
    let mut out = [0u32; 4];
    let lanes = ty.lanes().max(1);
    let bytes = ty.lane_bytes().max(1);

    for i in 0..lanes {
        let x = lane_get(a, bytes, i);
        let r = if ty.is_float() {
            (-f32::from_bits(x as u32)).to_bits() as u64
        } else {
            truncate((x as i64).wrapping_neg() as u64, bytes)
        };
        lane_set(&mut out, bytes, i, r);
    }

    out
}

pub fn eval_not(ty: Ty, a: &Slot) -> Slot {
    let mut out = [0u32; 4];
    let lanes = ty.lanes().max(1);
    let bytes = ty.lane_bytes().max(1);

    for i in 0..lanes {
        let x = lane_get(a, bytes, i);
        lane_set(&mut out, bytes, i, truncate(!x, bytes));
    }

    out
}

pub fn eval_cmp(op: CmpOp, operand_ty: Ty, a: &Slot, b: &Slot) -> Slot {
    let mut out = [0u32; 4];
    let lanes = operand_ty.lanes().max(1);
    let bytes = operand_ty.lane_bytes().max(1);

    for i in 0..lanes {
        let hit = if operand_ty.is_float() {
            let x = f32::from_bits(lane_get(a, 4, i) as u32);
            let y = f32::from_bits(lane_get(b, 4, i) as u32);
            match op {
                CmpOp::Eq => x == y,
                CmpOp::Ne => x != y,
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
            }
        } else if operand_ty.is_signed() {
            let x = sext(lane_get(a, bytes, i), bytes);
            let y = sext(lane_get(b, bytes, i), bytes);
            cmp_ord(op, x.cmp(&y))
        } else {
            let x = lane_get(a, bytes, i);
            let y = lane_get(b, bytes, i);
            cmp_ord(op, x.cmp(&y))
        };

        lane_set(&mut out, bytes, i, if hit { truncate(!0, bytes) } else { 0 });
    }

    out
}

fn cmp_ord(op: CmpOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
    }
}

pub fn eval_select(cond_ty: Ty, cond: &Slot, t: &Slot, f: &Slot) -> Slot {
    if cond_ty.is_vector() {
        // Lane-mask select, bitwise like andps/andnps/orps.
        let mut out = [0u32; 4];
        for i in 0..4 {
            out[i] = (t[i] & cond[i]) | (f[i] & !cond[i]);
        }
        out
    } else if lane_get(cond, 4, 0) != 0 {
        *t
    } else {
        *f
    }
}

pub fn eval_cast(op: CastOp, from: Ty, to: Ty, a: &Slot) -> Slot {
    let mut out = [0u32; 4];
    let lanes = to.lanes().max(1);
    let fb = from.lane_bytes().max(1);
    let tb = to.lane_bytes().max(1);

    match op {
        CastOp::Bitcast => *a,
        CastOp::IntCast => {
            for i in 0..lanes {
                let src = lane_get(a, fb, i.min(from.lanes().max(1) - 1));
                let v = if from.is_signed() {
                    sext(src, fb) as u64
                } else {
                    src
                };
                lane_set(&mut out, tb, i, truncate(v, tb));
            }
            out
        }
        CastOp::SiToFp => {
            for i in 0..lanes {
                let v = sext(lane_get(a, fb, i), fb) as f32;
                lane_set(&mut out, 4, i, v.to_bits() as u64);
            }
            out
        }
        CastOp::UiToFp => {
            for i in 0..lanes {
                let v = lane_get(a, fb, i) as f32;
                lane_set(&mut out, 4, i, v.to_bits() as u64);
            }
            out
        }
        CastOp::FpToSi => {
            for i in 0..lanes {
                let v = f32::from_bits(lane_get(a, 4, i) as u32);
                let r = if v.is_nan() || v >= 2147483648.0 || v < -2147483648.0 {
                    i32::MIN
                } else {
                    v as i32
                };
                lane_set(&mut out, tb, i, r as u32 as u64);
            }
            out
        }
        CastOp::FpToUi => {
            for i in 0..lanes {
                let v = f32::from_bits(lane_get(a, 4, i) as u32);
                lane_set(&mut out, tb, i, cvtt_f32_i64(v) as u64 & 0xffff_ffff);
            }
            out
        }
    }
}

pub fn eval_swizzle(ty: Ty, a: &Slot, sel: u16) -> Slot {
    let mut out = [0u32; 4];
    let bytes = ty.lane_bytes().max(1);
    for i in 0..ty.lanes().max(1).min(4) {
        let src = crate::dsl::sel_lane(sel, i);
        lane_set(&mut out, bytes, i, lane_get(a, bytes, src));
    }
    out
}

pub fn eval_shuffle(ty: Ty, a: &Slot, b: &Slot, sel: u16) -> Slot {
    let mut out = [0u32; 4];
    let bytes = ty.lane_bytes().max(1);
    // `shufps` model: destination lanes 0 and 1 select from the first
    // vector, lanes 2 and 3 from the second.
    for i in 0..ty.lanes().max(1).min(4) {
        let src = crate::dsl::sel_lane(sel, i);
        let from = if i < 2 { a } else { b };
        lane_set(&mut out, bytes, i, lane_get(from, bytes, src));
    }
    out
}

pub fn eval_insert(ty: Ty, vec: &Slot, scalar: &Slot, lane: u8) -> Slot {
    let mut out = *vec;
    let bytes = ty.lane_bytes().max(1);
    lane_set(&mut out, bytes, lane as usize, lane_get(scalar, bytes, 0));
    out
}

pub fn eval_extract(vec_ty: Ty, vec: &Slot, lane: u8) -> Slot {
    let mut out = [0u32; 4];
    let bytes = vec_ty.lane_bytes().max(1);
    lane_set(&mut out, bytes, 0, lane_get(vec, bytes, lane as usize));
    out
}

pub fn eval_intrinsic(
    op: Intrinsic,
    ty: Ty,
    a: &Slot,
    b: Option<&Slot>,
    c: Option<&Slot>,
) -> Slot {
    use Intrinsic::*;

    let mut out = [0u32; 4];
    let lanes = ty.lanes().max(1);
    let bytes = ty.lane_bytes().max(1);

    match op {
        SignMask => {
            let src_bytes = if lanes == 1 { 4 } else { bytes };
            let src_lanes = 16 / src_bytes;
            let mut mask = 0u64;
            for i in 0..src_lanes {
                let v = lane_get(a, src_bytes, i);
                if v >> (src_bytes * 8 - 1) & 1 != 0 {
                    mask |= 1 << i;
                }
            }
            lane_set(&mut out, 4, 0, mask);
            return out;
        }
        PackSigned | PackUnsigned => {
            let b = b.expect("pack needs two operands");
            // Result lanes are half the source width; sources are the two
            // inputs concatenated.
            let src_bytes = bytes * 2;
            let src_lanes = lanes / 2;
            for i in 0..lanes {
                let src = if i < src_lanes { a } else { b };
                let v = sext(lane_get(src, src_bytes, i % src_lanes), src_bytes);
                let packed = if op == PackSigned && ty.is_signed() {
                    let lo = -(1i64 << (bytes * 8 - 1));
                    let hi = (1i64 << (bytes * 8 - 1)) - 1;
                    v.clamp(lo, hi)
                } else {
                    v.clamp(0, (1i64 << (bytes * 8)) - 1)
                };
                lane_set(&mut out, bytes, i, truncate(packed as u64, bytes));
            }
            return out;
        }
        _ => {}
    }

    if ty.is_float() {
        for i in 0..lanes {
            let x = f32::from_bits(lane_get(a, 4, i) as u32);
            let y = b.map(|b| f32::from_bits(lane_get(b, 4, i) as u32));
            let z = c.map(|c| f32::from_bits(lane_get(c, 4, i) as u32));
            let r = match op {
                // SSE min/max keep the second operand on unordered input.
                Min => {
                    let y = y.unwrap();
                    if x < y {
                        x
                    } else {
                        y
                    }
                }
                Max => {
                    let y = y.unwrap();
                    if x > y {
                        x
                    } else {
                        y
                    }
                }
                Abs => x.abs(),
                Floor => x.floor(),
                Ceil => x.ceil(),
                Trunc => x.trunc(),
                RoundNearest => x.round_ties_even(),
                Sqrt => x.sqrt(),
                Rcp => 1.0 / x,
                RcpSqrt => 1.0 / x.sqrt(),
                MulAdd => x * y.unwrap() + z.unwrap(),
                Sin => x.sin(),
                Cos => x.cos(),
                Tan => x.tan(),
                Asin => x.asin(),
                Acos => x.acos(),
                Atan => x.atan(),
                Atan2 => x.atan2(y.unwrap()),
                Pow => x.powf(y.unwrap()),
                Exp => x.exp(),
                Log => x.ln(),
                Exp2 => x.exp2(),
                Log2 => x.log2(),
                _ => x,
            };
            lane_set(&mut out, 4, i, r.to_bits() as u64);
        }
        return out;
    }

    for i in 0..lanes {
        let x = lane_get(a, bytes, i);
        let y = b.map(|b| lane_get(b, bytes, i)).unwrap_or(0);
        let bits = bytes * 8;

        let r: u64 = match op {
            Min => {
                if ty.is_signed() {
                    sext(x, bytes).min(sext(y, bytes)) as u64
                } else {
                    x.min(y)
                }
            }
            Max => {
                if ty.is_signed() {
                    sext(x, bytes).max(sext(y, bytes)) as u64
                } else {
                    x.max(y)
                }
            }
            Abs => {
                if ty.is_signed() {
                    sext(x, bytes).wrapping_abs() as u64
                } else {
                    x
                }
            }
            AddSat => {
                if ty.is_signed() {
                    let lo = -(1i64 << (bits - 1));
                    let hi = (1i64 << (bits - 1)) - 1;
                    (sext(x, bytes) + sext(y, bytes)).clamp(lo, hi) as u64
                } else {
                    (x + y).min((1u64 << bits) - 1)
                }
            }
            SubSat => {
                if ty.is_signed() {
                    let lo = -(1i64 << (bits - 1));
                    let hi = (1i64 << (bits - 1)) - 1;
                    (sext(x, bytes) - sext(y, bytes)).clamp(lo, hi) as u64
                } else {
                    x.saturating_sub(y)
                }
            }
            MulHigh => {
                if ty.is_signed() {
                    ((sext(x, bytes) as i128 * sext(y, bytes) as i128) >> bits) as u64
                } else {
                    ((x as u128 * y as u128) >> bits) as u64
                }
            }
            MulAdd => {
                let z = c.map(|c| lane_get(c, bytes, i)).unwrap_or(0);
                x.wrapping_mul(y).wrapping_add(z)
            }
            _ => x,
        };

        lane_set(&mut out, bytes, i, truncate(r, bytes));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int4_wrapping_add() {
        let a = [u32::MAX, 1, 2, 3];
        let b = [1, 1, 1, 1];
        assert_eq!(eval_bin(BinOp::Add, Ty::Int4, &a, &b), [0, 2, 3, 4]);
    }

    #[test]
    fn float_min_keeps_second_on_nan() {
        let nan = f32::NAN.to_bits();
        let one = 1.0f32.to_bits();
        let r = eval_intrinsic(Intrinsic::Min, Ty::Float, &[nan, 0, 0, 0], Some(&[one, 0, 0, 0]), None);
        assert_eq!(r[0], one);
        let r = eval_intrinsic(Intrinsic::Min, Ty::Float, &[one, 0, 0, 0], Some(&[nan, 0, 0, 0]), None);
        assert!(f32::from_bits(r[0]).is_nan());
    }

    #[test]
    fn round_is_banker() {
        let r = eval_intrinsic(
            Intrinsic::RoundNearest,
            Ty::Float,
            &[2.5f32.to_bits(), 0, 0, 0],
            None,
            None,
        );
        assert_eq!(f32::from_bits(r[0]), 2.0);
        let r = eval_intrinsic(
            Intrinsic::RoundNearest,
            Ty::Float,
            &[3.5f32.to_bits(), 0, 0, 0],
            None,
            None,
        );
        assert_eq!(f32::from_bits(r[0]), 4.0);
    }

    #[test]
    fn fp_to_si_overflow_matches_sse() {
        let r = eval_cast(CastOp::FpToSi, Ty::Float, Ty::Int, &[f32::NAN.to_bits(), 0, 0, 0]);
        assert_eq!(r[0] as i32, i32::MIN);
        let r = eval_cast(CastOp::FpToSi, Ty::Float, Ty::Int, &[3e9f32.to_bits(), 0, 0, 0]);
        assert_eq!(r[0] as i32, i32::MIN);
    }

    #[test]
    fn pack_signed_saturates() {
        let a = [40000u32, (-40000i32) as u32, 5, 6];
        let b = [7, 8, 9, 10];
        let r = eval_intrinsic(Intrinsic::PackSigned, Ty::Short8, &a, Some(&b), None);
        assert_eq!(lane_get(&r, 2, 0) as u16 as i16, i16::MAX);
        assert_eq!(lane_get(&r, 2, 1) as u16 as i16, i16::MIN);
        assert_eq!(lane_get(&r, 2, 4) as u16, 7);
    }

    #[test]
    fn shuffle_selects_across_vectors() {
        let a = [1, 2, 3, 4];
        let b = [5, 6, 7, 8];
        // dest lanes 0,1 from a; lanes 2,3 from b
        let sel = crate::dsl::sel(0, 3, 0, 1);
        assert_eq!(eval_shuffle(Ty::Float4, &a, &b, sel), [1, 4, 5, 6]);
    }
}
