#![allow(non_snake_case)]

use crate::builder;
use crate::ir::{BinOp, CmpOp, InstrKind, Value};
use crate::ty::{Const, Ty};
use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Rem, Shl, Shr, Sub};

/// A typed SSA value handle. Handles are cheap copies of a value id; all
/// state lives in the thread-local builder.
pub trait Handle: Copy {
    const TY: Ty;

    fn from_value(value: Value) -> Self;
    fn value(self) -> Value;
}

pub(crate) fn emit(kind: InstrKind, ty: Ty) -> Value {
    builder::with(|b| b.push(kind, ty))
}

pub(crate) fn emit_const(c: Const) -> Value {
    builder::with(|b| b.push_const(c))
}

macro_rules! impl_handle {
    ($name:ident, $ty:expr) => {
        #[derive(Clone, Copy, Debug)]
        pub struct $name(pub(crate) Value);

        impl Handle for $name {
            const TY: Ty = $ty;

            fn from_value(value: Value) -> Self {
                Self(value)
            }

            fn value(self) -> Value {
                self.0
            }
        }
    };
}

impl_handle!(Bool, Ty::Bool);
impl_handle!(Byte, Ty::Byte);
impl_handle!(SByte, Ty::SByte);
impl_handle!(Short, Ty::Short);
impl_handle!(UShort, Ty::UShort);
impl_handle!(Int, Ty::Int);
impl_handle!(UInt, Ty::UInt);
impl_handle!(Long, Ty::Long);
impl_handle!(Float, Ty::Float);

impl_handle!(Byte8, Ty::Byte8);
impl_handle!(Byte16, Ty::Byte16);
impl_handle!(SByte8, Ty::SByte8);
impl_handle!(SByte16, Ty::SByte16);
impl_handle!(Short4, Ty::Short4);
impl_handle!(UShort4, Ty::UShort4);
impl_handle!(Short8, Ty::Short8);
impl_handle!(UShort8, Ty::UShort8);
impl_handle!(Int2, Ty::Int2);
impl_handle!(UInt2, Ty::UInt2);
impl_handle!(Int4, Ty::Int4);
impl_handle!(UInt4, Ty::UInt4);
impl_handle!(Float2, Ty::Float2);
impl_handle!(Float4, Ty::Float4);

macro_rules! impl_binop {
    ($name:ident, $trait_:ident, $method:ident, $op:expr) => {
        impl $trait_ for $name {
            type Output = $name;
            fn $method(self, rhs: $name) -> $name {
                $name(emit(InstrKind::Bin($op, self.0, rhs.0), <$name>::TY))
            }
        }
    };
}

macro_rules! impl_arith {
    ($name:ident) => {
        impl_binop!($name, Add, add, BinOp::Add);
        impl_binop!($name, Sub, sub, BinOp::Sub);
        impl_binop!($name, Mul, mul, BinOp::Mul);
        impl_binop!($name, Div, div, BinOp::Div);
        impl_binop!($name, Rem, rem, BinOp::Rem);

        impl Neg for $name {
            type Output = $name;
            fn neg(self) -> $name {
                $name(emit(InstrKind::Neg(self.0), <$name>::TY))
            }
        }
    };
}

impl_arith!(Int);
impl_arith!(UInt);
impl_arith!(Long);
impl_arith!(Float);
impl_arith!(Int2);
impl_arith!(UInt2);
impl_arith!(Int4);
impl_arith!(UInt4);
impl_arith!(Float2);
impl_arith!(Float4);
impl_arith!(Short4);
impl_arith!(UShort4);
impl_arith!(Short8);
impl_arith!(UShort8);

macro_rules! impl_bits {
    ($name:ident) => {
        impl_binop!($name, BitAnd, bitand, BinOp::And);
        impl_binop!($name, BitOr, bitor, BinOp::Or);
        impl_binop!($name, BitXor, bitxor, BinOp::Xor);

        impl Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(emit(InstrKind::Not(self.0), <$name>::TY))
            }
        }
    };
}

impl_bits!(Bool);
impl_bits!(Int);
impl_bits!(UInt);
impl_bits!(Long);
impl_bits!(Int2);
impl_bits!(UInt2);
impl_bits!(Int4);
impl_bits!(UInt4);
impl_bits!(Short8);
impl_bits!(UShort8);
impl_bits!(Byte16);
impl_bits!(SByte16);

// Vector shifts take a scalar count; scalar ints shift by scalar too.
macro_rules! impl_shift {
    ($name:ident, $count:ty) => {
        impl Shl<$count> for $name {
            type Output = $name;
            fn shl(self, rhs: $count) -> $name {
                $name(emit(InstrKind::Bin(BinOp::Shl, self.0, rhs.value()), <$name>::TY))
            }
        }

        impl Shr<$count> for $name {
            type Output = $name;
            fn shr(self, rhs: $count) -> $name {
                $name(emit(InstrKind::Bin(BinOp::Shr, self.0, rhs.value()), <$name>::TY))
            }
        }

        impl Shl<i32> for $name {
            type Output = $name;
            fn shl(self, rhs: i32) -> $name {
                self << <$count>::from(rhs)
            }
        }

        impl Shr<i32> for $name {
            type Output = $name;
            fn shr(self, rhs: i32) -> $name {
                self >> <$count>::from(rhs)
            }
        }
    };
}

impl_shift!(Int, Int);
impl_shift!(UInt, Int);
impl_shift!(Int2, Int);
impl_shift!(UInt2, Int);
impl_shift!(Int4, Int);
impl_shift!(UInt4, Int);
impl_shift!(Short8, Int);
impl_shift!(UShort8, Int);

// Comparisons: scalars yield Bool, vectors yield a full-width lane mask.
macro_rules! impl_cmp {
    ($name:ident, $mask:ident) => {
        impl $name {
            pub fn eq_(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Eq, self.0, rhs.0), <$mask>::TY))
            }

            pub fn ne_(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Ne, self.0, rhs.0), <$mask>::TY))
            }

            pub fn lt(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Lt, self.0, rhs.0), <$mask>::TY))
            }

            pub fn le(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Le, self.0, rhs.0), <$mask>::TY))
            }

            pub fn gt(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Gt, self.0, rhs.0), <$mask>::TY))
            }

            pub fn ge(self, rhs: $name) -> $mask {
                $mask(emit(InstrKind::Cmp(CmpOp::Ge, self.0, rhs.0), <$mask>::TY))
            }
        }
    };
}

impl_cmp!(Int, Bool);
impl_cmp!(UInt, Bool);
impl_cmp!(Long, Bool);
impl_cmp!(Float, Bool);
impl_cmp!(Int4, Int4);
impl_cmp!(UInt4, Int4);
impl_cmp!(Float4, Int4);

// Lane-wise select on vector masks and scalar Bool.
macro_rules! impl_select {
    ($mask:ident, $name:ident) => {
        impl $mask {
            pub fn $name<T: Handle>(self, on_true: T, on_false: T) -> T {
                T::from_value(emit(
                    InstrKind::Select(self.0, on_true.value(), on_false.value()),
                    T::TY,
                ))
            }
        }
    };
}

impl_select!(Bool, select);
impl_select!(Int4, select_lanes);

// ── constant conversions ─────────────────────────────────────────────

impl From<bool> for Bool {
    fn from(v: bool) -> Bool {
        Bool(emit_const(Const::bool_(v)))
    }
}

impl From<i32> for Int {
    fn from(v: i32) -> Int {
        Int(emit_const(Const::int(v)))
    }
}

impl From<u32> for UInt {
    fn from(v: u32) -> UInt {
        UInt(emit_const(Const::uint(v)))
    }
}

impl From<i32> for UInt {
    fn from(v: i32) -> UInt {
        UInt(emit_const(Const::uint(v as u32)))
    }
}

impl From<i64> for Long {
    fn from(v: i64) -> Long {
        Long(emit_const(Const::long(v)))
    }
}

impl From<f32> for Float {
    fn from(v: f32) -> Float {
        Float(emit_const(Const::float(v)))
    }
}

impl From<f32> for Float4 {
    fn from(v: f32) -> Float4 {
        Float4(emit_const(Const::float4([v; 4])))
    }
}

impl From<i32> for Int4 {
    fn from(v: i32) -> Int4 {
        Int4(emit_const(Const::int4([v; 4])))
    }
}

impl From<u32> for UInt4 {
    fn from(v: u32) -> UInt4 {
        UInt4(emit_const(Const::uint4([v; 4])))
    }
}

// ── value conversions ────────────────────────────────────────────────

use crate::ir::CastOp;

macro_rules! impl_cast {
    ($from:ident => $to:ident, $op:expr) => {
        impl From<$from> for $to {
            fn from(v: $from) -> $to {
                $to(emit(InstrKind::Cast($op, v.0), <$to>::TY))
            }
        }
    };
}

impl_cast!(Int => Float, CastOp::SiToFp);
impl_cast!(Float => Int, CastOp::FpToSi);
impl_cast!(UInt => Float, CastOp::UiToFp);
impl_cast!(Float => UInt, CastOp::FpToUi);
impl_cast!(Int4 => Float4, CastOp::SiToFp);
impl_cast!(Float4 => Int4, CastOp::FpToSi);
impl_cast!(UInt4 => Float4, CastOp::UiToFp);
impl_cast!(Float4 => UInt4, CastOp::FpToUi);
impl_cast!(Int => Long, CastOp::IntCast);
impl_cast!(UInt => Long, CastOp::IntCast);
impl_cast!(Long => Int, CastOp::IntCast);
impl_cast!(Int => UInt, CastOp::Bitcast);
impl_cast!(UInt => Int, CastOp::Bitcast);
impl_cast!(Byte => Int, CastOp::IntCast);
impl_cast!(SByte => Int, CastOp::IntCast);
impl_cast!(Short => Int, CastOp::IntCast);
impl_cast!(UShort => Int, CastOp::IntCast);
impl_cast!(Int => Byte, CastOp::IntCast);
impl_cast!(Int => Short, CastOp::IntCast);
impl_cast!(Int => UShort, CastOp::IntCast);

/// Reinterpret a value as another type of the same size.
pub fn bitcast<T: Handle, U: Handle>(v: U) -> T {
    debug_assert_eq!(T::TY.bytes(), U::TY.bytes());
    T::from_value(emit(InstrKind::Cast(CastOp::Bitcast, v.value()), T::TY))
}

// ── vector constructors, lanes, swizzles ─────────────────────────────

impl Float4 {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Float4 {
        Float4(emit_const(Const::float4([x, y, z, w])))
    }

    pub fn splat(v: Float) -> Float4 {
        let v = Float4(emit(InstrKind::Swizzle(v.0, 0), Ty::Float4));
        v
    }

    pub fn gather(x: Float, y: Float, z: Float, w: Float) -> Float4 {
        let v = Float4::splat(x);
        let v = v.with_lane(1, y);
        let v = v.with_lane(2, z);
        v.with_lane(3, w)
    }

    pub fn lane(self, i: u8) -> Float {
        Float(emit(InstrKind::Extract(self.0, i), Ty::Float))
    }

    pub fn with_lane(self, i: u8, v: Float) -> Float4 {
        Float4(emit(InstrKind::Insert(self.0, v.0, i), Ty::Float4))
    }

    pub fn x(self) -> Float {
        self.lane(0)
    }

    pub fn y(self) -> Float {
        self.lane(1)
    }

    pub fn z(self) -> Float {
        self.lane(2)
    }

    pub fn w(self) -> Float {
        self.lane(3)
    }

    /// Lane permutation. `sel` packs 2 bits per lane with lane 0 in the most
    /// significant nibble of the low byte, e.g. `0x1B` is identity.
    pub fn swizzle(self, sel: u16) -> Float4 {
        Float4(emit(InstrKind::Swizzle(self.0, sel), Ty::Float4))
    }

    /// Shuffle of the 8-lane concatenation `self ++ other`.
    pub fn shuffle(self, other: Float4, sel: u16) -> Float4 {
        Float4(emit(InstrKind::Shuffle(self.0, other.0, sel), Ty::Float4))
    }
}

impl Int4 {
    pub fn new(x: i32, y: i32, z: i32, w: i32) -> Int4 {
        Int4(emit_const(Const::int4([x, y, z, w])))
    }

    pub fn splat(v: Int) -> Int4 {
        Int4(emit(InstrKind::Swizzle(v.0, 0), Ty::Int4))
    }

    pub fn lane(self, i: u8) -> Int {
        Int(emit(InstrKind::Extract(self.0, i), Ty::Int))
    }

    pub fn with_lane(self, i: u8, v: Int) -> Int4 {
        Int4(emit(InstrKind::Insert(self.0, v.0, i), Ty::Int4))
    }

    pub fn swizzle(self, sel: u16) -> Int4 {
        Int4(emit(InstrKind::Swizzle(self.0, sel), Ty::Int4))
    }

    pub fn shuffle(self, other: Int4, sel: u16) -> Int4 {
        Int4(emit(InstrKind::Shuffle(self.0, other.0, sel), Ty::Int4))
    }
}

impl UInt4 {
    pub fn splat(v: UInt) -> UInt4 {
        UInt4(emit(InstrKind::Swizzle(v.0, 0), Ty::UInt4))
    }

    pub fn lane(self, i: u8) -> UInt {
        UInt(emit(InstrKind::Extract(self.0, i), Ty::UInt))
    }

    pub fn with_lane(self, i: u8, v: UInt) -> UInt4 {
        UInt4(emit(InstrKind::Insert(self.0, v.0, i), Ty::UInt4))
    }
}

impl Float2 {
    pub fn lane(self, i: u8) -> Float {
        Float(emit(InstrKind::Extract(self.0, i), Ty::Float))
    }
}
