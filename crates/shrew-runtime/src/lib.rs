//! Shrew runtime: memory primitives and external iterator kinds for compiled iterators.
//!
//! # Safety: Raw Pointer Arguments in FFI Functions
//!
//! The `extern "C"` functions in this crate are called by JIT-compiled iterator
//! code. They receive raw pointers that are valid because the compiler only
//! passes live iterator state and output buffers sized by the layout builder.
//! We allow `clippy::not_unsafe_ptr_arg_deref` per-function since marking every
//! FFI function as `unsafe` would add noise without improving safety.
pub mod alloc_track;
pub mod array;
pub mod coroutine;
pub mod memory;
pub mod range;
pub mod status;

pub use alloc_track::AllocKind;
pub use array::{ArrayIter, RtArray};
pub use coroutine::{GenStep, GeneratorHandle};
pub use range::RangeIter;
pub use status::{
    STATUS_ERROR, STATUS_NONE, STATUS_OK, STATUS_STOP_ITERATION, StatusClass, classify,
};
