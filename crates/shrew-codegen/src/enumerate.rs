// src/codegen/enumerate.rs
//
// Indexed iteration: pairs each source value with a running counter.

use cranelift::prelude::{InstBuilder, Value, types};

use shrew_runtime::{STATUS_OK, STATUS_STOP_ITERATION};

use crate::call_conv::{forward_failure, return_status};
use crate::context::Cg;
use crate::errors::{CodegenError, CodegenResult};
use crate::function_registry::IterOp;
use crate::layout::{ENUMERATE_COUNT, ENUMERATE_SOURCE, field_addr, load_field, store_field};
use crate::protocol::{EntryPoint, IterProtocol, source_release_dependency};
use crate::types::{EnumerateType, ScalarKind, ValueType};

impl EnumerateType {
    fn yield_type(&self) -> ValueType {
        ValueType::tuple(vec![ValueType::i64(), self.source.yield_type()])
    }
}

impl IterProtocol for EnumerateType {
    fn entry_point(&self, op: &IterOp) -> EntryPoint {
        match op {
            IterOp::IterNext | IterOp::Release | IterOp::Construct(_) => EntryPoint::Lowered,
            IterOp::GetIter | IterOp::ForEach => EntryPoint::Unsupported,
        }
    }

    fn dependencies(&self, op: &IterOp) -> Vec<(IterOp, crate::types::IterKind)> {
        match op {
            IterOp::IterNext => vec![(IterOp::IterNext, self.source.iterator_kind())],
            IterOp::Release => source_release_dependency(&self.source).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// `enumerate(source)` or `enumerate(source, start)` with an integer start.
    fn validate_construct(&self, name: &str, args: &[ScalarKind]) -> CodegenResult<()> {
        match args.len() {
            1 | 2 => {}
            0 => return Err(CodegenError::arg_count(name, 1, 0)),
            found => return Err(CodegenError::arg_count(name, 2, found)),
        }
        if args[0] != ScalarKind::Ptr {
            return Err(CodegenError::type_mismatch(
                "enumerate source",
                ScalarKind::Ptr.name(),
                args[0].name(),
            ));
        }
        if let Some(&start) = args.get(1)
            && !start.is_integer()
        {
            return Err(CodegenError::type_mismatch(
                "enumerate start",
                "integer",
                start.name(),
            ));
        }
        Ok(())
    }

    fn lower_iternext(&self, cg: &mut Cg<'_, '_>, state: Value, out: Value) -> CodegenResult<()> {
        let ptr_type = cg.ptr_type();
        let state_layout = cg.layouts.enumerate_state();
        let yield_layout = cg.layouts.value_layout(&self.yield_type());

        // The counter advances before the source is queried, so it moves even
        // on the round that turns out exhausted.
        let count = load_field(&mut cg.builder, &state_layout, ENUMERATE_COUNT, state, ptr_type)?;
        let next_count = cg.builder.ins().iadd_imm(count, 1);
        store_field(&mut cg.builder, &state_layout, ENUMERATE_COUNT, state, next_count)?;

        let source = load_field(&mut cg.builder, &state_layout, ENUMERATE_SOURCE, state, ptr_type)?;
        let payload = field_addr(&mut cg.builder, &yield_layout, 1, out)?;
        let result = cg.call_iternext(&self.source.iterator_kind(), source, payload)?;
        forward_failure(&mut cg.builder, result);

        let is_valid = result.is_valid(&mut cg.builder);
        let valid_block = cg.builder.create_block();
        let exhausted_block = cg.builder.create_block();
        cg.builder
            .ins()
            .brif(is_valid, valid_block, &[], exhausted_block, &[]);

        cg.switch_to_block(valid_block);
        store_field(&mut cg.builder, &yield_layout, 0, out, count)?;
        return_status(&mut cg.builder, STATUS_OK);

        cg.switch_to_block(exhausted_block);
        return_status(&mut cg.builder, STATUS_STOP_ITERATION);
        Ok(())
    }

    fn lower_release(&self, cg: &mut Cg<'_, '_>, state: Value) -> CodegenResult<()> {
        let state_layout = cg.layouts.enumerate_state();
        if source_release_dependency(&self.source).is_some() {
            let ptr_type = cg.ptr_type();
            let source =
                load_field(&mut cg.builder, &state_layout, ENUMERATE_SOURCE, state, ptr_type)?;
            cg.release_if_owned(&self.source, source)?;
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
        let args_layout = cg.layouts.enumerate_args(arg_kinds);

        let source_value = load_field(&mut cg.builder, &args_layout, 0, args, ptr_type)?;
        let start = match arg_kinds.get(1) {
            Some(&start_kind) => {
                let raw = load_field(&mut cg.builder, &args_layout, 1, args, ptr_type)?;
                match start_kind {
                    ScalarKind::Bool => cg.builder.ins().uextend(types::I64, raw),
                    ScalarKind::I32 => cg.builder.ins().sextend(types::I64, raw),
                    _ => raw,
                }
            }
            None => cg.builder.ins().iconst(types::I64, 0),
        };

        let (iter, ownership) = cg.getiter(&self.source, source_value)?;
        tracing::trace!(source = %self.source, ?ownership, "enumerate source");

        let state_layout = cg.layouts.enumerate_state();
        let state = cg.alloc_state(&state_layout)?;
        store_field(&mut cg.builder, &state_layout, ENUMERATE_COUNT, state, start)?;
        store_field(&mut cg.builder, &state_layout, ENUMERATE_SOURCE, state, iter)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CodegenErrorKind;
    use crate::types::IterKind;

    fn enumerate_of(source: IterKind) -> EnumerateType {
        match IterKind::enumerate(source) {
            IterKind::Enumerate(e) => e,
            _ => unreachable!(),
        }
    }

    #[test]
    fn accepts_one_or_two_arguments() {
        let e = enumerate_of(IterKind::array_i64());
        assert!(e.validate_construct("enumerate", &[ScalarKind::Ptr]).is_ok());
        for start in [ScalarKind::Bool, ScalarKind::I32, ScalarKind::I64] {
            assert!(
                e.validate_construct("enumerate", &[ScalarKind::Ptr, start])
                    .is_ok()
            );
        }
    }

    #[test]
    fn rejects_bad_arity() {
        let e = enumerate_of(IterKind::array_i64());
        let err = e.validate_construct("enumerate", &[]).unwrap_err();
        assert!(matches!(
            err.kind,
            CodegenErrorKind::ArgumentCount { found: 0, .. }
        ));
        let err = e
            .validate_construct(
                "enumerate",
                &[ScalarKind::Ptr, ScalarKind::I64, ScalarKind::I64],
            )
            .unwrap_err();
        assert!(matches!(
            err.kind,
            CodegenErrorKind::ArgumentCount {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_integer_start() {
        let e = enumerate_of(IterKind::array_i64());
        let err = e
            .validate_construct("enumerate", &[ScalarKind::Ptr, ScalarKind::F64])
            .unwrap_err();
        assert_eq!(
            err,
            CodegenError::type_mismatch("enumerate start", "integer", "f64")
        );
    }

    #[test]
    fn iternext_depends_on_source_iterator() {
        let e = enumerate_of(IterKind::array_i64());
        assert_eq!(
            e.dependencies(&IterOp::IterNext),
            vec![(IterOp::IterNext, IterKind::array_i64().iterator_kind())]
        );
        let borrowed = enumerate_of(IterKind::range_i64());
        assert!(borrowed.dependencies(&IterOp::Release).is_empty());
    }
}
