// src/codegen/generator.rs
//
// Bridge from a resumable computation to the iterator protocol.
//
// `iternext` on a generator calls its resume procedure
// `resume(handle, out) -> status` and maps the status:
//   OK      -> valid, the value is already at `out`
//   STOP    -> exhausted
//   anything else -> immediate `return status`, bypassing the
//                    valid/exhausted channel
// The bridge never owns the handle.

use cranelift::prelude::{InstBuilder, Value};

use shrew_runtime::{STATUS_OK, STATUS_STOP_ITERATION};

use crate::call_conv::{return_status, return_status_propagate};
use crate::context::Cg;
use crate::errors::CodegenResult;
use crate::function_registry::IterOp;
use crate::protocol::{EntryPoint, IterProtocol};
use crate::types::GeneratorType;

impl IterProtocol for GeneratorType {
    fn entry_point(&self, op: &IterOp) -> EntryPoint {
        match op {
            IterOp::IterNext => EntryPoint::Lowered,
            _ => EntryPoint::Unsupported,
        }
    }

    fn lower_iternext(&self, cg: &mut Cg<'_, '_>, handle: Value, out: Value) -> CodegenResult<()> {
        let result = cg.call_resume(&self.resume_symbol, handle, out)?;

        let ok_block = cg.builder.create_block();
        let not_ok_block = cg.builder.create_block();
        let stop_block = cg.builder.create_block();
        let error_block = cg.builder.create_block();
        cg.builder.set_cold_block(stop_block);
        cg.builder.set_cold_block(error_block);

        let is_ok = result.is_valid(&mut cg.builder);
        cg.builder
            .ins()
            .brif(is_ok, ok_block, &[], not_ok_block, &[]);

        cg.switch_to_block(ok_block);
        return_status(&mut cg.builder, STATUS_OK);

        cg.switch_to_block(not_ok_block);
        let is_stop = result.is_stop(&mut cg.builder);
        cg.builder
            .ins()
            .brif(is_stop, stop_block, &[], error_block, &[]);

        cg.switch_to_block(stop_block);
        return_status(&mut cg.builder, STATUS_STOP_ITERATION);

        cg.switch_to_block(error_block);
        return_status_propagate(&mut cg.builder, result.status);
        Ok(())
    }
}
