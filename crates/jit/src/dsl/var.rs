use super::pointer::Pointer;
use super::value::Handle;
use crate::builder::{self, VarId};
use std::marker::PhantomData;

/// A mutable local. Stays a pure SSA name until its address is taken or
/// control flow forces it into a stack slot; either way `get`/`set` keep
/// working unchanged.
pub struct Var<T: Handle> {
    id: VarId,
    _marker: PhantomData<T>,
}

impl<T: Handle> Clone for Var<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Handle> Copy for Var<T> {}

impl<T: Handle> Var<T> {
    pub fn new() -> Var<T> {
        Var {
            id: builder::with(|b| b.var_new(T::TY)),
            _marker: PhantomData,
        }
    }

    pub fn init(value: T) -> Var<T> {
        let var = Var::new();
        var.set(value);
        var
    }

    pub fn get(self) -> T {
        T::from_value(builder::with(|b| b.var_get(self.id)))
    }

    pub fn set(self, value: T) {
        let value = value.value();
        builder::with(|b| b.var_set(self.id, value));
    }

    /// Address of the backing slot; materializes it on first use.
    pub fn addr(self) -> Pointer<T> {
        Pointer::from_raw(builder::with(|b| b.var_addr(self.id)))
    }
}

impl<T: Handle> Default for Var<T> {
    fn default() -> Self {
        Var::new()
    }
}
