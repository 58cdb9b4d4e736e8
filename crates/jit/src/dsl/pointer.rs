use super::value::{emit, Handle, Int, UInt};
use crate::ir::{BinOp, InstrKind, Value};
use crate::ty::Ty;
use std::marker::PhantomData;
use std::ops::Add;

/// A typed pointer value. Arithmetic is byte-granular: `ptr + Int` offsets by
/// bytes regardless of `T`; `element(i)` scales by the element size.
pub struct Pointer<T: Handle> {
    value: Value,
    _marker: PhantomData<T>,
}

impl<T: Handle> Clone for Pointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Handle> Copy for Pointer<T> {}

impl<T: Handle> Pointer<T> {
    pub fn from_raw(value: Value) -> Pointer<T> {
        Pointer {
            value,
            _marker: PhantomData,
        }
    }

    /// Treat a loaded 64-bit value as an address.
    pub fn from_long(v: super::Long) -> Pointer<T> {
        Pointer::from_raw(emit(
            InstrKind::Cast(crate::ir::CastOp::Bitcast, v.value()),
            Ty::Ptr,
        ))
    }

    pub fn raw(self) -> Value {
        self.value
    }

    /// Reinterpret as a pointer to another element type.
    pub fn cast<U: Handle>(self) -> Pointer<U> {
        Pointer::from_raw(self.value)
    }

    pub fn offset(self, bytes: Int) -> Pointer<T> {
        Pointer::from_raw(emit(
            InstrKind::Gep {
                ptr: self.value,
                offset: bytes.value(),
            },
            Ty::Ptr,
        ))
    }

    pub fn offset_const(self, bytes: i32) -> Pointer<T> {
        self.offset(Int::from(bytes))
    }

    pub fn element(self, index: Int) -> Pointer<T> {
        self.offset(index * Int::from(T::TY.bytes() as i32))
    }

    pub fn load(self) -> T {
        T::from_value(emit(
            InstrKind::Load {
                ptr: self.value,
                order: None,
            },
            T::TY,
        ))
    }

    pub fn store(self, v: T) {
        emit(
            InstrKind::Store {
                ptr: self.value,
                value: v.value(),
                order: None,
            },
            Ty::Void,
        );
    }
}

impl<T: Handle> Add<Int> for Pointer<T> {
    type Output = Pointer<T>;

    fn add(self, rhs: Int) -> Pointer<T> {
        self.offset(rhs)
    }
}

impl<T: Handle> Add<UInt> for Pointer<T> {
    type Output = Pointer<T>;

    fn add(self, rhs: UInt) -> Pointer<T> {
        Pointer::from_raw(emit(
            InstrKind::Bin(BinOp::Add, self.value, rhs.value()),
            Ty::Ptr,
        ))
    }
}

impl<T: Handle> Add<i32> for Pointer<T> {
    type Output = Pointer<T>;

    fn add(self, rhs: i32) -> Pointer<T> {
        self.offset_const(rhs)
    }
}
