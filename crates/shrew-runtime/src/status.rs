//! Status-word calling convention shared by compiled iterators and the runtime.
//!
//! Every lowered `iternext` function, every generator resume procedure, and the
//! `for_each` loop driver return a single `i32` status word:
//!
//! | code                    | meaning                                   |
//! |-------------------------|-------------------------------------------|
//! | `STATUS_OK` (0)         | a value was produced and written to `out` |
//! | `STATUS_STOP_ITERATION` | the source is exhausted                   |
//! | anything else           | a propagated failure, forwarded unchanged |

/// A value was produced.
pub const STATUS_OK: i32 = 0;

/// Generic failure raised by a resumable computation.
pub const STATUS_ERROR: i32 = -1;

/// No value was produced and no failure occurred.
pub const STATUS_NONE: i32 = -2;

/// The source is exhausted.
pub const STATUS_STOP_ITERATION: i32 = -3;

/// Classification of a raw status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    StopIteration,
    Error(i32),
}

/// Classify a status word.
///
/// `STATUS_NONE` is treated as an error: a resume procedure must either
/// produce a value or signal stop.
pub fn classify(code: i32) -> StatusClass {
    match code {
        STATUS_OK => StatusClass::Ok,
        STATUS_STOP_ITERATION => StatusClass::StopIteration,
        other => StatusClass::Error(other),
    }
}
