//! The expression DSL. Executing this code on the host does not compute
//! anything: it appends instructions to the routine under construction.

mod pointer;
mod value;
mod var;

pub use pointer::*;
pub use value::*;
pub use var::*;

use crate::builder;
use crate::ir::{InstrKind, Intrinsic, Terminator};
use crate::ty::{MemOrder, Ty};

// ── swizzle selectors ────────────────────────────────────────────────
//
// Selectors pack 2 bits per destination lane into the low byte of a 16-bit
// constant, lane 0 in the most significant nibble.

pub const fn sel(l0: u16, l1: u16, l2: u16, l3: u16) -> u16 {
    (l0 & 3) << 6 | (l1 & 3) << 4 | (l2 & 3) << 2 | (l3 & 3)
}

pub const SEL_XYZW: u16 = sel(0, 1, 2, 3);
pub const SEL_XXXX: u16 = sel(0, 0, 0, 0);
pub const SEL_YYYY: u16 = sel(1, 1, 1, 1);
pub const SEL_ZZZZ: u16 = sel(2, 2, 2, 2);
pub const SEL_WWWW: u16 = sel(3, 3, 3, 3);
pub const SEL_XYXY: u16 = sel(0, 1, 0, 1);
pub const SEL_ZWZW: u16 = sel(2, 3, 2, 3);
pub const SEL_XXYY: u16 = sel(0, 0, 1, 1);
pub const SEL_ZZWW: u16 = sel(2, 2, 3, 3);

pub(crate) fn sel_lane(sel: u16, dest_lane: usize) -> usize {
    (sel as usize >> ((3 - dest_lane) * 2)) & 3
}

// ── routine arguments ────────────────────────────────────────────────

pub fn arg_ptr<T: Handle>(index: u8) -> Pointer<T> {
    Pointer::from_raw(emit(InstrKind::Arg(index), Ty::Ptr))
}

pub fn arg_int(index: u8) -> Int {
    Int::from_value(emit(InstrKind::Arg(index), Ty::Int))
}

pub fn arg_uint(index: u8) -> UInt {
    UInt::from_value(emit(InstrKind::Arg(index), Ty::UInt))
}

// ── control flow ─────────────────────────────────────────────────────

pub fn if_then(cond: Bool, then: impl FnOnce()) {
    if_then_else(cond, then, || {});
}

pub fn if_then_else(cond: Bool, then: impl FnOnce(), else_: impl FnOnce()) {
    let (then_to, else_to, join) = builder::with(|b| {
        b.materialize_all();
        let then_to = b.create_block();
        let else_to = b.create_block();
        let join = b.create_block();
        b.terminate(Terminator::Branch {
            cond: cond.value(),
            then_to,
            else_to,
        });
        b.switch_to(then_to);
        (then_to, else_to, join)
    });
    let _ = then_to;

    then();
    builder::with(|b| {
        b.materialize_all();
        b.terminate(Terminator::Jump(join));
        b.switch_to(else_to);
    });

    else_();
    builder::with(|b| {
        b.materialize_all();
        b.terminate(Terminator::Jump(join));
        b.switch_to(join);
    });
}

pub fn while_loop(cond: impl FnOnce() -> Bool, body: impl FnOnce()) {
    let header = builder::with(|b| {
        b.materialize_all();
        let header = b.create_block();
        b.terminate(Terminator::Jump(header));
        b.switch_to(header);
        header
    });

    let c = cond();

    let (body_to, exit) = builder::with(|b| {
        b.materialize_all();
        let body_to = b.create_block();
        let exit = b.create_block();
        b.terminate(Terminator::Branch {
            cond: c.value(),
            then_to: body_to,
            else_to: exit,
        });
        b.switch_to(body_to);
        (body_to, exit)
    });
    let _ = body_to;

    body();
    builder::with(|b| {
        b.materialize_all();
        b.terminate(Terminator::Jump(header));
        b.switch_to(exit);
    });
}

pub fn for_loop(
    init: impl FnOnce(),
    cond: impl FnOnce() -> Bool,
    step: impl FnOnce(),
    body: impl FnOnce(),
) {
    init();
    while_loop(cond, || {
        body();
        step();
    });
}

/// Run `body`, then repeat until `cond` holds.
pub fn do_until(body: impl Fn(), cond: impl Fn() -> Bool) {
    let top = builder::with(|b| {
        b.materialize_all();
        let top = b.create_block();
        b.terminate(Terminator::Jump(top));
        b.switch_to(top);
        top
    });

    body();
    let c = cond();

    builder::with(|b| {
        b.materialize_all();
        let exit = b.create_block();
        b.terminate(Terminator::Branch {
            cond: c.value(),
            then_to: exit,
            else_to: top,
        });
        b.switch_to(exit);
    });
}

pub fn ret<T: Handle>(v: T) {
    builder::with(|b| b.terminate(Terminator::Ret(Some(v.value()))));
}

pub fn ret_void() {
    builder::with(|b| b.terminate(Terminator::Ret(None)));
}

// ── intrinsics ───────────────────────────────────────────────────────

fn intr1<T: Handle>(op: Intrinsic, a: T) -> T {
    T::from_value(emit(InstrKind::Intr(op, a.value(), None, None), T::TY))
}

fn intr2<T: Handle>(op: Intrinsic, a: T, b: T) -> T {
    T::from_value(emit(
        InstrKind::Intr(op, a.value(), Some(b.value()), None),
        T::TY,
    ))
}

fn intr3<T: Handle>(op: Intrinsic, a: T, b: T, c: T) -> T {
    T::from_value(emit(
        InstrKind::Intr(op, a.value(), Some(b.value()), Some(c.value())),
        T::TY,
    ))
}

pub fn min<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::Min, a, b)
}

pub fn max<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::Max, a, b)
}

pub fn clamp<T: Handle>(x: T, lo: T, hi: T) -> T {
    min(max(x, lo), hi)
}

pub fn abs<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Abs, a)
}

pub fn floor<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Floor, a)
}

pub fn ceil<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Ceil, a)
}

pub fn trunc<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Trunc, a)
}

/// Round to nearest, ties to even.
pub fn round<T: Handle>(a: T) -> T {
    intr1(Intrinsic::RoundNearest, a)
}

pub fn round_int(a: Float) -> Int {
    Int::from(round(a))
}

pub fn round_int4(a: Float4) -> Int4 {
    Int4::from(round(a))
}

pub fn sqrt<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Sqrt, a)
}

/// Reciprocal approximation refined to full single precision.
pub fn rcp<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Rcp, a)
}

pub fn rcp_sqrt<T: Handle>(a: T) -> T {
    intr1(Intrinsic::RcpSqrt, a)
}

pub fn mul_add<T: Handle>(a: T, b: T, c: T) -> T {
    intr3(Intrinsic::MulAdd, a, b, c)
}

pub fn mul_high<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::MulHigh, a, b)
}

pub fn add_sat<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::AddSat, a, b)
}

pub fn sub_sat<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::SubSat, a, b)
}

/// Narrow two `Int4`s into a `Short8` (or `Short8`s into `SByte16`) with
/// signed saturation.
pub fn pack_signed<T: Handle, U: Handle>(a: U, b: U) -> T {
    T::from_value(emit(
        InstrKind::Intr(Intrinsic::PackSigned, a.value(), Some(b.value()), None),
        T::TY,
    ))
}

/// Narrow with unsigned saturation.
pub fn pack_unsigned<T: Handle, U: Handle>(a: U, b: U) -> T {
    T::from_value(emit(
        InstrKind::Intr(Intrinsic::PackUnsigned, a.value(), Some(b.value()), None),
        T::TY,
    ))
}

/// Per-lane sign bits gathered into the low bits of an `Int`.
pub fn sign_mask<T: Handle>(v: T) -> Int {
    Int::from_value(emit(
        InstrKind::Intr(Intrinsic::SignMask, v.value(), None, None),
        Ty::Int,
    ))
}

/// True when any lane of the mask is set.
pub fn any(mask: Int4) -> Bool {
    sign_mask(mask).ne_(Int::from(0))
}

/// True when all four lanes of the mask are set.
pub fn all(mask: Int4) -> Bool {
    sign_mask(mask).eq_(Int::from(0xf))
}

pub fn sin<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Sin, a)
}

pub fn cos<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Cos, a)
}

pub fn tan<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Tan, a)
}

pub fn asin<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Asin, a)
}

pub fn acos<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Acos, a)
}

pub fn atan<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Atan, a)
}

pub fn atan2<T: Handle>(y: T, x: T) -> T {
    intr2(Intrinsic::Atan2, y, x)
}

pub fn pow<T: Handle>(a: T, b: T) -> T {
    intr2(Intrinsic::Pow, a, b)
}

pub fn exp<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Exp, a)
}

pub fn log<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Log, a)
}

pub fn exp2<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Exp2, a)
}

pub fn log2<T: Handle>(a: T) -> T {
    intr1(Intrinsic::Log2, a)
}

// ── atomics ──────────────────────────────────────────────────────────

pub fn atomic_load(ptr: Pointer<UInt>, order: MemOrder) -> UInt {
    UInt::from_value(emit(
        InstrKind::Load {
            ptr: ptr.raw(),
            order: Some(order),
        },
        Ty::UInt,
    ))
}

pub fn atomic_store(ptr: Pointer<UInt>, value: UInt, order: MemOrder) {
    emit(
        InstrKind::Store {
            ptr: ptr.raw(),
            value: value.value(),
            order: Some(order),
        },
        Ty::Void,
    );
}
