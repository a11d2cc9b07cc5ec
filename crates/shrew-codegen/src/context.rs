// src/codegen/context.rs
//
// Lowering context - bundles the state needed while emitting one function
// body. Methods are implemented across multiple files using split impl blocks.

use cranelift::prelude::{AbiParam, Block, FunctionBuilder, InstBuilder, Type, Value, types};
use cranelift_codegen::ir::{FuncRef, SigRef};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Module};
use rustc_hash::FxHashMap;

use shrew_runtime::AllocKind;

use crate::call_conv::IterNextResult;
use crate::errors::{CodegenError, CodegenResult};
use crate::function_registry::{FunctionRegistry, IterOp};
use crate::layout::{Layout, LayoutBuilder};
use crate::runtime_registry::{RuntimeKey, SigSpec};
use crate::types::{IterKind, Ownership};

pub(crate) struct Cg<'a, 'f> {
    pub builder: FunctionBuilder<'f>,
    module: &'a mut JITModule,
    funcs: &'a FunctionRegistry,
    pub layouts: &'a mut LayoutBuilder,
    ptr_type: Type,
    func_refs: FxHashMap<FuncId, FuncRef>,
}

impl<'a, 'f> Cg<'a, 'f> {
    pub fn new(
        builder: FunctionBuilder<'f>,
        module: &'a mut JITModule,
        funcs: &'a FunctionRegistry,
        layouts: &'a mut LayoutBuilder,
    ) -> Self {
        let ptr_type = module.target_config().pointer_type();
        Self {
            builder,
            module,
            funcs,
            layouts,
            ptr_type,
            func_refs: FxHashMap::default(),
        }
    }

    pub fn ptr_type(&self) -> Type {
        self.ptr_type
    }

    /// Create the entry block, bind function params and return them.
    pub fn entry_params(&mut self) -> Vec<Value> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.switch_to_block(entry);
        self.builder.seal_block(entry);
        self.builder.block_params(entry).to_vec()
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.builder.switch_to_block(block);
    }

    /// Seal remaining blocks and finish the function.
    pub fn finish(mut self) {
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }

    fn func_ref_for(&mut self, func_id: FuncId) -> FuncRef {
        if let Some(&func_ref) = self.func_refs.get(&func_id) {
            return func_ref;
        }
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        self.func_refs.insert(func_id, func_ref);
        func_ref
    }

    /// Function reference for a protocol entry point of `kind`.
    pub fn entry_func_ref(&mut self, op: &IterOp, kind: &IterKind) -> CodegenResult<FuncRef> {
        let key = self.funcs.entry_key(op, kind).ok_or_else(|| {
            CodegenError::internal_with_context("entry point not declared", op.symbol_name(kind))
        })?;
        let func_id = self.funcs.func_id(key).ok_or_else(|| {
            CodegenError::internal_with_context("entry point has no id", self.funcs.display(key))
        })?;
        Ok(self.func_ref_for(func_id))
    }

    /// Function reference for an imported runtime or external symbol.
    pub fn imported_func_ref(&mut self, symbol: &str) -> CodegenResult<FuncRef> {
        let func_id = self
            .funcs
            .imported_key(symbol)
            .and_then(|key| self.funcs.func_id(key))
            .ok_or_else(|| CodegenError::not_found("imported function", symbol))?;
        Ok(self.func_ref_for(func_id))
    }

    /// Signature reference for an indirect call of shape `spec`.
    pub fn import_signature(&mut self, spec: SigSpec) -> SigRef {
        let mut sig = self.module.make_signature();
        for &param in spec.params {
            sig.params.push(AbiParam::new(param.ir_type(self.ptr_type)));
        }
        if let Some(ret) = spec.ret {
            sig.returns.push(AbiParam::new(ret.ir_type(self.ptr_type)));
        }
        self.builder.import_signature(sig)
    }

    fn first_result(&self, call: cranelift_codegen::ir::Inst, callee: &str) -> CodegenResult<Value> {
        self.builder
            .inst_results(call)
            .first()
            .copied()
            .ok_or_else(|| {
                CodegenError::internal_with_context("call returned no value", callee.to_string())
            })
    }

    pub fn call_runtime(&mut self, runtime: RuntimeKey, args: &[Value]) -> CodegenResult<Value> {
        let func_ref = self.imported_func_ref(runtime.name())?;
        let call = self.builder.ins().call(func_ref, args);
        self.first_result(call, runtime.name())
    }

    pub fn call_runtime_void(&mut self, runtime: RuntimeKey, args: &[Value]) -> CodegenResult<()> {
        let func_ref = self.imported_func_ref(runtime.name())?;
        self.builder.ins().call(func_ref, args);
        Ok(())
    }

    /// Call the `iternext` entry point of `iter_kind`, writing into `out`.
    pub fn call_iternext(
        &mut self,
        iter_kind: &IterKind,
        iter: Value,
        out: Value,
    ) -> CodegenResult<IterNextResult> {
        let func_ref = self.entry_func_ref(&IterOp::IterNext, iter_kind)?;
        let call = self.builder.ins().call(func_ref, &[iter, out]);
        let status = self.first_result(call, "iternext")?;
        Ok(IterNextResult { status })
    }

    pub fn call_resume(
        &mut self,
        symbol: &str,
        handle: Value,
        out: Value,
    ) -> CodegenResult<IterNextResult> {
        let func_ref = self.imported_func_ref(symbol)?;
        let call = self.builder.ins().call(func_ref, &[handle, out]);
        let status = self.first_result(call, symbol)?;
        Ok(IterNextResult { status })
    }

    /// Obtain an iterator for `value` of kind `kind`.
    ///
    /// An iterator kind is returned unchanged as a borrowed alias; no call is
    /// emitted. An iterable calls its `getiter` symbol and the result is owned.
    pub fn getiter(&mut self, kind: &IterKind, value: Value) -> CodegenResult<(Value, Ownership)> {
        match kind.getiter_ownership() {
            Ownership::Borrowed => Ok((value, Ownership::Borrowed)),
            Ownership::Owned => {
                let symbol = kind.getiter_symbol().ok_or_else(|| {
                    CodegenError::internal_with_context("iterable without getiter", kind.to_string())
                })?;
                let func_ref = self.imported_func_ref(symbol)?;
                let call = self.builder.ins().call(func_ref, &[value]);
                let iter = self.first_result(call, symbol)?;
                Ok((iter, Ownership::Owned))
            }
        }
    }

    /// Release `iter`, obtained by `getiter` on a value of kind `source`, if
    /// it is owned and its kind has a release routine.
    pub fn release_if_owned(&mut self, source: &IterKind, iter: Value) -> CodegenResult<()> {
        let iter_kind = source.iterator_kind();
        if source.getiter_ownership() == Ownership::Owned && iter_kind.needs_release() {
            let func_ref = self.entry_func_ref(&IterOp::Release, &iter_kind)?;
            self.builder.ins().call(func_ref, &[iter]);
        }
        Ok(())
    }

    /// Acquire zeroed state storage for a combinator value.
    pub fn alloc_state(&mut self, layout: &Layout) -> CodegenResult<Value> {
        let size = self.builder.ins().iconst(types::I64, i64::from(layout.size));
        let align = self.builder.ins().iconst(types::I64, i64::from(layout.align));
        let kind = self
            .builder
            .ins()
            .iconst(types::I32, AllocKind::CombinatorState as i64);
        self.call_runtime(RuntimeKey::Alloc, &[size, align, kind])
    }

    /// Hand combinator state back to the runtime.
    pub fn free_state(&mut self, state: Value, layout: &Layout) -> CodegenResult<()> {
        let size = self.builder.ins().iconst(types::I64, i64::from(layout.size));
        let align = self.builder.ins().iconst(types::I64, i64::from(layout.align));
        let kind = self
            .builder
            .ins()
            .iconst(types::I32, AllocKind::CombinatorState as i64);
        self.call_runtime_void(RuntimeKey::Free, &[state, size, align, kind])
    }
}
