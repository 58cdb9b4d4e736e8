//! Runtime code generation.
//!
//! Host code builds a routine by executing DSL expressions: typed value
//! handles append instructions to a thread-local function under
//! construction, control-flow helpers open and close basic blocks, and the
//! backend optimizes and materializes the result — native x86-64 code on
//! executable pages where available, a portable evaluator otherwise.
//!
//! ```no_run
//! use shale_jit::{dsl::*, BackendConfig, Ty};
//!
//! let routine = shale_jit::build_routine("plus_one", &[Ty::Ptr], &BackendConfig::default(), || {
//!     let data = arg_ptr::<Float4>(0);
//!     let v = data.load();
//!     data.store(v + Float4::from(1.0));
//! })
//! .unwrap();
//! ```

mod builder;
mod routine;
mod verify;

pub mod backend;
pub mod dsl;
pub mod ir;
pub mod opt;
pub mod ty;

pub use backend::{BackendConfig, BackendError};
pub use opt::Pass;
pub use routine::{Routine, RoutineContext};
pub use ty::{Const, MemOrder, Ty};
pub use verify::VerifyError;

use tracing::trace;

/// Build a routine: run `body` to record the program, then hand it to the
/// backend. `params` documents the argument types read via `arg_*`.
pub fn build_routine(
    name: &str,
    params: &[Ty],
    config: &BackendConfig,
    body: impl FnOnce(),
) -> Result<Routine, BackendError> {
    trace!(routine = name, "building routine");
    builder::install(builder::FunctionBuilder::new(name, params, Ty::Void));
    body();
    let func = builder::take().finish();
    backend::build(func, config)
}

/// Build a routine whose body ends with `ret(...)` of type `ret`.
pub fn build_routine_ret(
    name: &str,
    params: &[Ty],
    ret: Ty,
    config: &BackendConfig,
    body: impl FnOnce(),
) -> Result<Routine, BackendError> {
    trace!(routine = name, "building routine");
    builder::install(builder::FunctionBuilder::new(name, params, ret));
    body();
    let func = builder::take().finish();
    backend::build(func, config)
}
