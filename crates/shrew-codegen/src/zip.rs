// src/codegen/zip.rs
//
// Lockstep iteration over N >= 0 sources.
//
// Every round advances all N sources exactly once, in order, even after an
// earlier source already reported exhaustion that round. Only a failure
// status cuts the round short.

use cranelift::prelude::{InstBuilder, Value, types};
use smallvec::SmallVec;

use shrew_runtime::{STATUS_OK, STATUS_STOP_ITERATION};

use crate::call_conv::{forward_failure, return_status};
use crate::context::Cg;
use crate::errors::{CodegenError, CodegenResult};
use crate::function_registry::IterOp;
use crate::layout::{field_addr, load_field, store_field};
use crate::protocol::{EntryPoint, IterProtocol, source_release_dependency};
use crate::types::{IterKind, ScalarKind, ValueType, ZipType};

impl ZipType {
    fn yield_type(&self) -> ValueType {
        ValueType::tuple(self.sources.iter().map(|s| s.yield_type()).collect())
    }
}

impl IterProtocol for ZipType {
    fn entry_point(&self, op: &IterOp) -> EntryPoint {
        match op {
            IterOp::IterNext | IterOp::Release | IterOp::Construct(_) => EntryPoint::Lowered,
            IterOp::GetIter | IterOp::ForEach => EntryPoint::Unsupported,
        }
    }

    fn dependencies(&self, op: &IterOp) -> Vec<(IterOp, IterKind)> {
        match op {
            IterOp::IterNext => self
                .sources
                .iter()
                .map(|source| (IterOp::IterNext, source.iterator_kind()))
                .collect(),
            IterOp::Release => self
                .sources
                .iter()
                .filter_map(source_release_dependency)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// One iterable argument per resolved source.
    fn validate_construct(&self, name: &str, args: &[ScalarKind]) -> CodegenResult<()> {
        if args.len() != self.sources.len() {
            return Err(CodegenError::arg_count(name, self.sources.len(), args.len()));
        }
        if let Some(bad) = args.iter().find(|&&arg| arg != ScalarKind::Ptr) {
            return Err(CodegenError::type_mismatch(
                "zip source",
                ScalarKind::Ptr.name(),
                bad.name(),
            ));
        }
        Ok(())
    }

    fn lower_iternext(&self, cg: &mut Cg<'_, '_>, state: Value, out: Value) -> CodegenResult<()> {
        if self.sources.is_empty() {
            // zip() is an empty iterator
            return_status(&mut cg.builder, STATUS_STOP_ITERATION);
            return Ok(());
        }

        let ptr_type = cg.ptr_type();
        let state_layout = cg.layouts.zip_state(self.sources.len());
        let yield_layout = cg.layouts.value_layout(&self.yield_type());

        let mut flags: SmallVec<[Value; 4]> = SmallVec::new();
        for (i, source) in self.sources.iter().enumerate() {
            let iter = load_field(&mut cg.builder, &state_layout, i, state, ptr_type)?;
            let slot = field_addr(&mut cg.builder, &yield_layout, i, out)?;
            let result = cg.call_iternext(&source.iterator_kind(), iter, slot)?;
            forward_failure(&mut cg.builder, result);
            flags.push(result.is_valid(&mut cg.builder));
        }

        let mut is_valid = cg.builder.ins().iconst(types::I8, 1);
        for flag in flags {
            is_valid = cg.builder.ins().band(is_valid, flag);
        }

        let valid_block = cg.builder.create_block();
        let exhausted_block = cg.builder.create_block();
        cg.builder
            .ins()
            .brif(is_valid, valid_block, &[], exhausted_block, &[]);

        cg.switch_to_block(valid_block);
        return_status(&mut cg.builder, STATUS_OK);

        cg.switch_to_block(exhausted_block);
        return_status(&mut cg.builder, STATUS_STOP_ITERATION);
        Ok(())
    }

    fn lower_release(&self, cg: &mut Cg<'_, '_>, state: Value) -> CodegenResult<()> {
        let ptr_type = cg.ptr_type();
        let state_layout = cg.layouts.zip_state(self.sources.len());
        for (i, source) in self.sources.iter().enumerate() {
            if source_release_dependency(source).is_none() {
                continue;
            }
            let iter = load_field(&mut cg.builder, &state_layout, i, state, ptr_type)?;
            cg.release_if_owned(source, iter)?;
        }
        cg.free_state(state, &state_layout)
    }

    fn lower_construct(
        &self,
        cg: &mut Cg<'_, '_>,
        args: Value,
        arg_kinds: &[ScalarKind],
    ) -> CodegenResult<Value> {
        let ptr_type = cg.ptr_type();
        let args_layout = cg.layouts.zip_args(arg_kinds);
        let state_layout = cg.layouts.zip_state(self.sources.len());

        let state = cg.alloc_state(&state_layout)?;
        for (i, source) in self.sources.iter().enumerate() {
            let value = load_field(&mut cg.builder, &args_layout, i, args, ptr_type)?;
            let (iter, ownership) = cg.getiter(source, value)?;
            tracing::trace!(index = i, source = %source, ?ownership, "zip source");
            store_field(&mut cg.builder, &state_layout, i, state, iter)?;
        }
        Ok(state)
    }
}
