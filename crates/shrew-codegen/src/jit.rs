// src/codegen/jit.rs

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use rustc_hash::FxHashMap;

use crate::errors::{CodegenError, CodegenResult};
use crate::runtime_registry::{SigSpec, all_linkable_symbols, eager_symbols, signature_for};

/// Options for JIT compilation
#[derive(Clone, Copy, Debug, Default)]
pub struct JitOptions {
    /// Release mode: disable verifier
    pub release: bool,
    /// Enable disassembly output
    pub disasm: bool,
    /// Log each function's IR at debug level before it is defined
    pub dump_ir: bool,
}

impl JitOptions {
    /// Create options for debug mode (default)
    pub fn debug() -> Self {
        Self::default()
    }

    /// Create options for release mode
    pub fn release() -> Self {
        Self {
            release: true,
            ..Self::default()
        }
    }

    /// Create options for disassembly output
    pub fn disasm() -> Self {
        Self {
            disasm: true,
            ..Self::default()
        }
    }

    /// Debug options adjusted by `SHREW_RELEASE` and `SHREW_DUMP_IR`.
    ///
    /// A variable counts as set when present and not `0`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).is_some_and(|value| value != "0");
        Self {
            release: flag("SHREW_RELEASE"),
            disasm: false,
            dump_ir: flag("SHREW_DUMP_IR"),
        }
    }
}

/// A native symbol made callable from compiled code, such as a resume
/// procedure or an external iterator entry point.
#[derive(Clone, Debug)]
pub struct ExternalSymbol {
    pub name: String,
    pub ptr: *const u8,
}

impl ExternalSymbol {
    pub fn new(name: impl Into<String>, ptr: *const u8) -> Self {
        Self {
            name: name.into(),
            ptr,
        }
    }
}

/// JIT compiler context
pub struct JitContext {
    pub module: JITModule,
    pub ctx: codegen::Context,
    /// Functions declared with Export linkage (will be compiled)
    pub func_ids: FxHashMap<String, FuncId>,
    /// Functions declared with Import linkage (runtime/external functions)
    pub imported_func_ids: FxHashMap<String, FuncId>,
    /// Every symbol the linker can resolve, with its native address
    linkable: FxHashMap<String, *const u8>,
    /// Enable disassembly output
    disasm: bool,
    dump_ir: bool,
    /// Collected disassembly output from compiled functions
    disasm_output: Vec<(String, String)>,
}

impl JitContext {
    /// Create a new JitContext with default (debug) options
    pub fn new() -> CodegenResult<Self> {
        Self::with_options(JitOptions::default())
    }

    /// Create a new JitContext with the specified options
    pub fn with_options(options: JitOptions) -> CodegenResult<Self> {
        Self::new_internal(options, &[])
    }

    /// Create a new JitContext that can also link `externals`.
    pub fn with_symbols(options: JitOptions, externals: &[ExternalSymbol]) -> CodegenResult<Self> {
        Self::new_internal(options, externals)
    }

    fn new_internal(options: JitOptions, externals: &[ExternalSymbol]) -> CodegenResult<Self> {
        // Build JIT module with native ISA
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .expect("INTERNAL: Cranelift config: invalid 'use_colocated_libcalls' flag");
        flag_builder
            .set("is_pic", "false")
            .expect("INTERNAL: Cranelift config: invalid 'is_pic' flag");
        flag_builder
            .set("opt_level", "speed")
            .expect("INTERNAL: Cranelift config: invalid 'opt_level' flag");

        if options.release {
            // Disable IR verifier for faster compilation
            flag_builder
                .set("enable_verifier", "false")
                .expect("INTERNAL: Cranelift config: invalid 'enable_verifier' flag");
        }

        let isa_builder = cranelift_native::builder()
            .map_err(|msg| CodegenError::missing_resource_with_context("native ISA", msg))?;

        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(CodegenError::cranelift)?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let mut linkable = FxHashMap::default();

        // Register runtime functions
        for symbol in all_linkable_symbols() {
            builder.symbol(symbol.c_name, symbol.ptr);
            linkable.insert(symbol.c_name.to_string(), symbol.ptr);
        }

        for external in externals {
            tracing::debug!(name = %external.name, "registering external symbol");
            builder.symbol(external.name.as_str(), external.ptr);
            linkable.insert(external.name.clone(), external.ptr);
        }

        let module = JITModule::new(builder);
        let ctx = module.make_context();

        let mut jit = Self {
            module,
            ctx,
            func_ids: FxHashMap::default(),
            imported_func_ids: FxHashMap::default(),
            linkable,
            disasm: options.disasm,
            dump_ir: options.dump_ir,
            disasm_output: Vec::new(),
        };

        // Memory primitives are used by every constructor and release routine
        for symbol in eager_symbols() {
            let sig = jit.create_signature_from_spec(signature_for(symbol.key));
            jit.import_function(symbol.c_name, &sig)?;
        }

        Ok(jit)
    }

    /// Get the pointer type for the target
    pub fn pointer_type(&self) -> Type {
        self.module.target_config().pointer_type()
    }

    /// True when `name` resolves to a runtime or registered external symbol.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.linkable.contains_key(name)
    }

    /// Native address of a runtime or registered external symbol.
    pub fn symbol_address(&self, name: &str) -> Option<*const u8> {
        self.linkable.get(name).copied()
    }

    /// Create a function signature with given parameters and return type
    pub fn create_signature(&self, params: &[Type], ret: Option<Type>) -> Signature {
        let mut sig = self.module.make_signature();
        for &param in params {
            sig.params.push(AbiParam::new(param));
        }
        if let Some(ret_type) = ret {
            sig.returns.push(AbiParam::new(ret_type));
        }
        sig
    }

    pub fn create_signature_from_spec(&self, spec: SigSpec) -> Signature {
        let mut sig = self.module.make_signature();
        let ptr_type = self.pointer_type();
        for &param in spec.params {
            sig.params.push(AbiParam::new(param.ir_type(ptr_type)));
        }
        if let Some(ret) = spec.ret {
            sig.returns.push(AbiParam::new(ret.ir_type(ptr_type)));
        }
        sig
    }

    /// Declare a function in the module
    pub fn declare_function(&mut self, name: &str, sig: &Signature) -> CodegenResult<FuncId> {
        let func_id = self
            .module
            .declare_function(name, Linkage::Export, sig)
            .map_err(CodegenError::cranelift)?;
        tracing::debug!(name, ?func_id, "declared function");
        self.func_ids.insert(name.to_string(), func_id);
        Ok(func_id)
    }

    /// Import an external function. Repeated imports of the same name share
    /// one declaration.
    pub fn import_function(&mut self, name: &str, sig: &Signature) -> CodegenResult<FuncId> {
        if let Some(&func_id) = self.imported_func_ids.get(name) {
            return Ok(func_id);
        }
        if !self.has_symbol(name) {
            return Err(CodegenError::not_found("external symbol", name));
        }
        let func_id = self
            .module
            .declare_function(name, Linkage::Import, sig)
            .map_err(CodegenError::cranelift)?;
        self.imported_func_ids.insert(name.to_string(), func_id);
        Ok(func_id)
    }

    /// Define a function (after building IR)
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn define_function(&mut self, func_id: FuncId, name: &str) -> CodegenResult<()> {
        if self.dump_ir {
            tracing::debug!(name, ir = %self.ctx.func.display(), "lowered function IR");
        }

        // Enable disassembly if requested
        if self.disasm {
            self.ctx.set_disasm(true);
        }

        self.module
            .define_function(func_id, &mut self.ctx)
            .map_err(|e| CodegenError::internal_with_context("definition failed", format!("{name}: {e:?}")))?;

        // Capture disassembly if enabled
        if self.disasm
            && let Some(compiled) = self.ctx.compiled_code()
            && let Some(vcode) = &compiled.vcode
        {
            self.disasm_output.push((name.to_string(), vcode.clone()));
        }

        Ok(())
    }

    /// Get collected disassembly output
    pub fn get_disasm(&self) -> &[(String, String)] {
        &self.disasm_output
    }

    /// Finalize all functions so code pointers become available
    pub fn finalize(&mut self) -> CodegenResult<()> {
        self.module.finalize_definitions().map_err(|e| {
            CodegenError::internal_with_context("finalization error", format!("{:?}", e))
        })?;
        tracing::debug!(functions = self.func_ids.len(), "finalized JIT module");
        Ok(())
    }

    /// Get a function pointer by name
    pub fn get_function_ptr(&self, name: &str) -> Option<*const u8> {
        self.func_ids
            .get(name)
            .map(|&func_id| self.module.get_finalized_function(func_id))
    }

    /// Get a function pointer by FuncId
    pub fn get_function_ptr_by_id(&self, func_id: FuncId) -> *const u8 {
        self.module.get_finalized_function(func_id)
    }

    /// Clear the context for reuse
    pub fn clear(&mut self) {
        self.module.clear_context(&mut self.ctx);
    }

    /// Split into parts for compilation - allows FunctionBuilder and Cg to coexist.
    /// Returns disjoint mutable references: (func, module)
    pub fn split_for_compile(&mut self) -> (&mut cranelift_codegen::ir::Function, &mut JITModule) {
        (&mut self.ctx.func, &mut self.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_jit_context() {
        let jit = JitContext::new().unwrap();
        assert!(jit.pointer_type() == types::I64 || jit.pointer_type() == types::I32);
        assert!(jit.imported_func_ids.contains_key("shrew_alloc"));
        assert!(jit.imported_func_ids.contains_key("shrew_free"));
    }

    #[test]
    fn create_and_call_simple_function() {
        let mut jit = JitContext::new().unwrap();

        // Create a function that returns 42
        let sig = jit.create_signature(&[], Some(types::I64));
        let func_id = jit.declare_function("answer", &sig).unwrap();

        jit.ctx.func.signature = sig;

        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut jit.ctx.func, &mut builder_ctx);

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let forty_two = builder.ins().iconst(types::I64, 42);
        builder.ins().return_(&[forty_two]);

        builder.finalize();

        jit.define_function(func_id, "answer").unwrap();
        jit.finalize().expect("INTERNAL: JIT finalization failed");

        let fn_ptr = jit.get_function_ptr("answer").unwrap();
        let answer: extern "C" fn() -> i64 = unsafe { std::mem::transmute(fn_ptr) };
        assert_eq!(answer(), 42);
    }

    #[test]
    fn import_of_unregistered_symbol_is_not_found() {
        let mut jit = JitContext::new().unwrap();
        let sig = jit.create_signature(&[], None);
        let err = jit.import_function("nowhere_to_be_found", &sig).unwrap_err();
        assert_eq!(
            err,
            CodegenError::not_found("external symbol", "nowhere_to_be_found")
        );
    }

    #[test]
    fn registered_externals_are_linkable() {
        extern "C" fn seven() -> i64 {
            7
        }
        let externals = [ExternalSymbol::new("seven", seven as *const u8)];
        let mut jit = JitContext::with_symbols(JitOptions::debug(), &externals).unwrap();
        assert!(jit.has_symbol("seven"));
        assert!(jit.has_symbol("shrew_range_next"));

        let sig = jit.create_signature(&[], Some(types::I64));
        let first = jit.import_function("seven", &sig).unwrap();
        let second = jit.import_function("seven", &sig).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn options_from_env_lookup() {
        let opts = JitOptions::from_lookup(|name| match name {
            "SHREW_RELEASE" => Some("1".to_string()),
            "SHREW_DUMP_IR" => Some("0".to_string()),
            _ => None,
        });
        assert!(opts.release);
        assert!(!opts.dump_ir);
        assert!(!opts.disasm);

        let opts = JitOptions::from_lookup(|_| None);
        assert!(!opts.release);
    }

    #[test]
    fn presets() {
        assert!(JitOptions::release().release);
        assert!(JitOptions::disasm().disasm);
        assert!(!JitOptions::debug().release);
    }
}
