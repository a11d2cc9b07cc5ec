// src/codegen/call_conv.rs
//
// Status-word calling convention shared by lowered iternext functions,
// resume procedures and the loop driver.

use cranelift::prelude::{FunctionBuilder, InstBuilder, IntCC, Value, types};

use shrew_runtime::{STATUS_OK, STATUS_STOP_ITERATION, StatusClass, classify};

/// Outcome of one `iternext` step as seen by host code.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationResult<T> {
    Valid(T),
    Exhausted,
    /// A failure status forwarded unchanged from a generator bridge.
    PropagatedFailure(i32),
}

impl<T> IterationResult<T> {
    pub fn from_status(status: i32, value: impl FnOnce() -> T) -> Self {
        match classify(status) {
            StatusClass::Ok => IterationResult::Valid(value()),
            StatusClass::StopIteration => IterationResult::Exhausted,
            StatusClass::Error(code) => IterationResult::PropagatedFailure(code),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, IterationResult::Valid(_))
    }

    pub fn valid(self) -> Option<T> {
        match self {
            IterationResult::Valid(value) => Some(value),
            _ => None,
        }
    }
}

/// The status returned by a call to some `iternext`-shaped function.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IterNextResult {
    pub status: Value,
}

impl IterNextResult {
    /// i8 flag: the step produced a value.
    pub fn is_valid(&self, builder: &mut FunctionBuilder) -> Value {
        builder
            .ins()
            .icmp_imm(IntCC::Equal, self.status, i64::from(STATUS_OK))
    }

    /// i8 flag: the source is exhausted.
    pub fn is_stop(&self, builder: &mut FunctionBuilder) -> Value {
        builder
            .ins()
            .icmp_imm(IntCC::Equal, self.status, i64::from(STATUS_STOP_ITERATION))
    }

    /// i8 flag: neither valid nor exhausted.
    pub fn is_failure(&self, builder: &mut FunctionBuilder) -> Value {
        let not_ok = builder
            .ins()
            .icmp_imm(IntCC::NotEqual, self.status, i64::from(STATUS_OK));
        let not_stop = builder.ins().icmp_imm(
            IntCC::NotEqual,
            self.status,
            i64::from(STATUS_STOP_ITERATION),
        );
        builder.ins().band(not_ok, not_stop)
    }
}

/// Terminate the current block returning the constant `code`.
pub(crate) fn return_status(builder: &mut FunctionBuilder, code: i32) {
    let status = builder.ins().iconst(types::I32, i64::from(code));
    builder.ins().return_(&[status]);
}

/// Terminate the current block returning `status` unchanged.
pub(crate) fn return_status_propagate(builder: &mut FunctionBuilder, status: Value) {
    builder.ins().return_(&[status]);
}

/// Branch out with the failure status if `result` is a failure; continue in a
/// fresh block otherwise.
pub(crate) fn forward_failure(builder: &mut FunctionBuilder, result: IterNextResult) {
    let failed = result.is_failure(builder);
    let fail_block = builder.create_block();
    let continue_block = builder.create_block();
    builder.set_cold_block(fail_block);
    builder
        .ins()
        .brif(failed, fail_block, &[], continue_block, &[]);

    builder.switch_to_block(fail_block);
    builder.seal_block(fail_block);
    return_status_propagate(builder, result.status);

    builder.switch_to_block(continue_block);
    builder.seal_block(continue_block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrew_runtime::STATUS_ERROR;

    #[test]
    fn from_status_maps_the_three_outcomes() {
        assert_eq!(
            IterationResult::from_status(STATUS_OK, || 5),
            IterationResult::Valid(5)
        );
        assert_eq!(
            IterationResult::from_status(STATUS_STOP_ITERATION, || 5),
            IterationResult::Exhausted
        );
        assert_eq!(
            IterationResult::from_status(STATUS_ERROR, || 5),
            IterationResult::PropagatedFailure(STATUS_ERROR)
        );
        assert_eq!(
            IterationResult::from_status(-77, || 5),
            IterationResult::PropagatedFailure(-77)
        );
    }

    #[test]
    fn value_is_only_decoded_when_valid() {
        let result: IterationResult<i32> =
            IterationResult::from_status(STATUS_STOP_ITERATION, || panic!("decoded"));
        assert!(!result.is_valid());
        assert_eq!(result.valid(), None);
    }
}
