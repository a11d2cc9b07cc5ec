//! Coroutine-backed resumable computations via corosensei.
//!
//! `GeneratorHandle` is the runtime side of the generator bridge: an opaque
//! resumable-state blob whose bound resume procedure is
//! [`shrew_generator_resume`]. Lowered code never owns a handle; whoever
//! created it drops it.

use std::ptr;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine as RawCoroutine, CoroutineResult, Yielder};

use crate::status::{STATUS_ERROR, STATUS_OK, STATUS_STOP_ITERATION};

/// Outcome of one resume step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenStep {
    /// The body suspended with a value word.
    Yield(i64),
    /// The body returned normally.
    Stopped,
    /// The body returned a failure code.
    Errored(i32),
}

/// A suspended computation producing `i64` value words.
///
/// The body returns `Ok(())` to stop and `Err(code)` to fail. Once finished,
/// further resumes repeat the final outcome.
pub struct GeneratorHandle {
    inner: RawCoroutine<(), i64, Result<(), i32>, DefaultStack>,
    finished: Option<GenStep>,
}

impl GeneratorHandle {
    /// Create a generator from a closure.
    pub fn new(f: impl FnOnce(&Yielder<(), i64>) -> Result<(), i32> + 'static) -> Box<Self> {
        Box::new(Self {
            inner: RawCoroutine::new(move |yielder, ()| f(yielder)),
            finished: None,
        })
    }

    /// Generator that yields `values` in order and then stops.
    pub fn from_values(values: Vec<i64>) -> Box<Self> {
        Self::new(move |yielder| {
            for value in values {
                yielder.suspend(value);
            }
            Ok(())
        })
    }

    /// Generator that yields `values` in order and then fails with `code`.
    pub fn failing_after(values: Vec<i64>, code: i32) -> Box<Self> {
        debug_assert!(code != STATUS_OK && code != STATUS_STOP_ITERATION);
        Self::new(move |yielder| {
            for value in values {
                yielder.suspend(value);
            }
            Err(code)
        })
    }

    /// Advance the computation by one step.
    pub fn resume(&mut self) -> GenStep {
        if let Some(done) = self.finished {
            return done;
        }
        match self.inner.resume(()) {
            CoroutineResult::Yield(value) => GenStep::Yield(value),
            CoroutineResult::Return(result) => {
                let step = match result {
                    Ok(()) => GenStep::Stopped,
                    Err(code) => GenStep::Errored(code),
                };
                self.finished = Some(step);
                step
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Raw handle pointer handed to compiled code.
    pub fn as_raw(&mut self) -> *mut u8 {
        self as *mut GeneratorHandle as *mut u8
    }
}

// =============================================================================
// FFI functions
// =============================================================================

/// Resume procedure bound to [`GeneratorHandle`].
///
/// Writes the yielded word to `out` and returns `STATUS_OK`, returns
/// `STATUS_STOP_ITERATION` once the body has returned, or returns the body's
/// failure code. A failure code equal to `STATUS_OK` or
/// `STATUS_STOP_ITERATION` is reported as `STATUS_ERROR`.
#[unsafe(no_mangle)]
#[expect(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn shrew_generator_resume(handle: *mut GeneratorHandle, out: *mut u8) -> i32 {
    let handle = unsafe { &mut *handle };
    match handle.resume() {
        GenStep::Yield(value) => {
            unsafe { ptr::write_unaligned(out as *mut i64, value) };
            STATUS_OK
        }
        GenStep::Stopped => STATUS_STOP_ITERATION,
        GenStep::Errored(code) if code == STATUS_OK || code == STATUS_STOP_ITERATION => {
            STATUS_ERROR
        }
        GenStep::Errored(code) => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_sequence_then_stops() {
        let mut generator = GeneratorHandle::from_values(vec![1, 2, 3]);
        assert_eq!(generator.resume(), GenStep::Yield(1));
        assert_eq!(generator.resume(), GenStep::Yield(2));
        assert_eq!(generator.resume(), GenStep::Yield(3));
        assert_eq!(generator.resume(), GenStep::Stopped);
        // Repeated calls after finish keep reporting the final outcome
        assert_eq!(generator.resume(), GenStep::Stopped);
        assert!(generator.is_finished());
    }

    #[test]
    fn failure_code_is_sticky() {
        let mut generator = GeneratorHandle::failing_after(vec![7], 42);
        assert_eq!(generator.resume(), GenStep::Yield(7));
        assert_eq!(generator.resume(), GenStep::Errored(42));
        assert_eq!(generator.resume(), GenStep::Errored(42));
    }

    #[test]
    fn drop_before_finish() {
        let mut generator = GeneratorHandle::from_values(vec![10, 20, 30]);
        assert_eq!(generator.resume(), GenStep::Yield(10));
        drop(generator);
    }

    #[test]
    fn resume_procedure_maps_steps_to_status_words() {
        let mut generator = GeneratorHandle::failing_after(vec![5], -9);
        let raw = generator.as_raw() as *mut GeneratorHandle;
        let mut out: i64 = 0;
        let out_ptr = &mut out as *mut i64 as *mut u8;

        assert_eq!(shrew_generator_resume(raw, out_ptr), STATUS_OK);
        assert_eq!(out, 5);
        assert_eq!(shrew_generator_resume(raw, out_ptr), -9);
    }

    #[test]
    fn reserved_failure_codes_become_generic_errors() {
        let mut generator = GeneratorHandle::new(|_| Err(STATUS_STOP_ITERATION));
        let raw = generator.as_raw() as *mut GeneratorHandle;
        let mut out: i64 = 0;
        assert_eq!(
            shrew_generator_resume(raw, &mut out as *mut i64 as *mut u8),
            STATUS_ERROR
        );
    }
}
