// src/codegen/for_loop.rs
//
// Generic for-loop driver: getiter once, then iternext until the iterator
// stops or fails, handing every valid value to a sink callback.

use cranelift::prelude::{InstBuilder, IntCC, StackSlotData, StackSlotKind, Value, types};

use shrew_runtime::STATUS_OK;

use crate::context::Cg;
use crate::errors::CodegenResult;
use crate::function_registry::IterOp;
use crate::protocol::source_release_dependency;
use crate::runtime_registry::shapes;
use crate::types::IterKind;

/// Entry points `for_each` over `kind` calls.
pub(crate) fn for_each_dependencies(kind: &IterKind) -> Vec<(IterOp, IterKind)> {
    let mut deps = vec![(IterOp::IterNext, kind.iterator_kind())];
    deps.extend(source_release_dependency(kind));
    deps
}

impl Cg<'_, '_> {
    /// Emit `for_each(iterable, sink, ctx) -> status`.
    ///
    /// Returns `STATUS_OK` once the iterator is exhausted and forwards any
    /// failure status unchanged, whether it came from the iterator or from a
    /// sink returning something other than `STATUS_OK`. An owned iterator is
    /// released on every exit.
    pub fn lower_for_each(
        &mut self,
        kind: &IterKind,
        iterable: Value,
        sink: Value,
        sink_ctx: Value,
    ) -> CodegenResult<()> {
        let ptr_type = self.ptr_type();
        let iter_kind = kind.iterator_kind();
        let layout = self.layouts.yield_layout(kind);

        // The out buffer must have an address even for an empty tuple.
        let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            layout.size.max(1),
            layout.align.trailing_zeros() as u8,
        ));
        let out = self.builder.ins().stack_addr(ptr_type, slot, 0);

        let (iter, ownership) = self.getiter(kind, iterable)?;
        tracing::trace!(kind = %kind, ?ownership, "lowering for_each");
        let sink_sig = self.import_signature(shapes::SINK);

        let header_block = self.builder.create_block();
        let body_block = self.builder.create_block();
        let done_block = self.builder.create_block();
        let exit_block = self.builder.create_block();
        self.builder.append_block_param(exit_block, types::I32);

        self.builder.ins().jump(header_block, &[]);

        self.switch_to_block(header_block);
        let result = self.call_iternext(&iter_kind, iter, out)?;
        let is_valid = result.is_valid(&mut self.builder);
        self.builder
            .ins()
            .brif(is_valid, body_block, &[], done_block, &[]);

        self.switch_to_block(body_block);
        let call = self
            .builder
            .ins()
            .call_indirect(sink_sig, sink, &[sink_ctx, out]);
        let sink_status = self.builder.inst_results(call)[0];
        let sink_ok = self
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, sink_status, i64::from(STATUS_OK));
        self.builder
            .ins()
            .brif(sink_ok, header_block, &[], exit_block, &[sink_status]);

        // Exhaustion ends the loop normally; anything else is forwarded.
        self.switch_to_block(done_block);
        let is_stop = result.is_stop(&mut self.builder);
        let ok = self.builder.ins().iconst(types::I32, i64::from(STATUS_OK));
        let status = self.builder.ins().select(is_stop, ok, result.status);
        self.builder.ins().jump(exit_block, &[status]);

        self.switch_to_block(exit_block);
        let status = self.builder.block_params(exit_block)[0];
        self.release_if_owned(kind, iter)?;
        self.builder.ins().return_(&[status]);
        Ok(())
    }
}
