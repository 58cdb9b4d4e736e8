//! Backend: verification, optimization, and materialization of built
//! functions into callable routines.

pub mod eval;
pub mod interp;
pub mod linear;
pub mod memory;
pub mod runtime;
pub mod x86;

use crate::ir::Function;
use crate::opt::{self, Pass};
use crate::routine::Routine;
use crate::verify;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("routine verification failed: {0}")]
    Verify(#[from] verify::VerifyError),
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub passes: Vec<Pass>,
    pub verify: bool,
    /// Skip the native engine even where it is available.
    pub force_portable: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            passes: opt::default_passes(),
            verify: cfg!(debug_assertions),
            force_portable: false,
        }
    }
}

fn native_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("sse4.1")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

pub fn build(func: Function, config: &BackendConfig) -> Result<Routine, BackendError> {
    if config.verify {
        verify::verify(&func)?;
    }

    let mut optimized = func.clone();
    opt::run(&mut optimized, &config.passes);

    // A transform that broke the program is recoverable: retry once with the
    // optimizer disabled.
    let optimized = if config.verify && verify::verify(&optimized).is_err() {
        warn!(routine = %func.name, "optimized routine failed verification, retrying unoptimized");
        func
    } else {
        optimized
    };

    let program = linear::lower(&optimized);

    if native_available() && !config.force_portable {
        match x86::emit_program(&program) {
            Ok(code) => match memory::ExecutableMemory::new(&code) {
                Some(pages) => {
                    debug!(routine = %program.name, bytes = code.len(), "materialized native routine");
                    return Ok(Routine::native(
                        program.name.clone(),
                        pages,
                        program.buffer_bytes(),
                    ));
                }
                None => {
                    warn!(routine = %program.name, "executable pages unavailable, using portable engine");
                }
            },
            Err(x86::Unsupported(what)) => {
                debug!(routine = %program.name, what, "native emitter rejected program");
            }
        }
    }

    debug!(routine = %program.name, ops = program.ops.len(), "materialized portable routine");
    Ok(Routine::portable(program.name.clone(), program))
}
