use thiserror::Error;

/// Per-context error slot values. Every entry point that fails records one of
/// these; the slot keeps the first error until it is read.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid enum")]
    InvalidEnum,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid framebuffer operation")]
    InvalidFramebufferOperation,
}
