// src/codegen/compiler.rs
//
// Compilation unit for iterator entry points. Requests are validated and
// declared eagerly; bodies are lowered and the module finalized in `finish`.

use cranelift::prelude::{FunctionBuilder, FunctionBuilderContext};

use crate::compiled::CompiledIterators;
use crate::context::Cg;
use crate::errors::{CodegenError, CodegenResult};
use crate::external::symbol_uses;
use crate::function_registry::{FunctionRegistry, IterOp};
use crate::jit::{ExternalSymbol, JitContext, JitOptions};
use crate::layout::LayoutBuilder;
use crate::protocol::{self, EntryPoint};
use crate::types::{ExternalRole, ExternalType, IterKind, Ownership, ScalarKind};

pub struct IterCompiler {
    jit: JitContext,
    registry: FunctionRegistry,
    layouts: LayoutBuilder,
    /// First configuration failure; the unit refuses further work once set.
    failed: Option<CodegenError>,
}

impl IterCompiler {
    /// Compiler with options from the environment and only runtime symbols.
    pub fn new() -> CodegenResult<Self> {
        Self::with_externals(JitOptions::from_env(), &[])
    }

    /// Compiler that can also link `externals` (resume procedures, external
    /// iterator entry points).
    pub fn with_externals(
        options: JitOptions,
        externals: &[ExternalSymbol],
    ) -> CodegenResult<Self> {
        let jit = JitContext::with_symbols(options, externals)?;
        let mut registry = FunctionRegistry::new();
        // Memory primitives are imported by the context itself.
        for (name, &func_id) in &jit.imported_func_ids {
            let key = registry.intern_imported(name);
            registry.set_func_id(key, func_id);
        }
        let layouts = LayoutBuilder::new(jit.pointer_type());
        Ok(Self {
            jit,
            registry,
            layouts,
            failed: None,
        })
    }

    /// Request `getiter` for `kind` and everything needed to drive and release
    /// the iterator it returns.
    pub fn request_iterator(&mut self, kind: &IterKind) -> CodegenResult<()> {
        self.latched(|this| {
            this.prepare(kind)?;
            this.require(IterOp::GetIter, kind)?;
            let iter_kind = kind.iterator_kind();
            this.require(IterOp::IterNext, &iter_kind)?;
            if kind.getiter_ownership() == Ownership::Owned && iter_kind.needs_release() {
                this.require(IterOp::Release, &iter_kind)?;
            }
            Ok(())
        })
    }

    /// Request a constructor for the combinator `kind` taking arguments of
    /// `args` kinds, along with its `iternext` and release routine.
    pub fn request_constructor(&mut self, kind: &IterKind, args: &[ScalarKind]) -> CodegenResult<()> {
        self.latched(|this| {
            this.prepare(kind)?;
            protocol::protocol(kind).validate_construct(&kind.to_string(), args)?;
            this.require(IterOp::Construct(args.to_vec()), kind)?;
            this.require(IterOp::IterNext, kind)?;
            if kind.needs_release() {
                this.require(IterOp::Release, kind)?;
            }
            Ok(())
        })
    }

    /// Request the compiled loop driver over `kind`.
    pub fn request_for_each(&mut self, kind: &IterKind) -> CodegenResult<()> {
        self.latched(|this| {
            this.prepare(kind)?;
            this.require(IterOp::ForEach, kind)
        })
    }

    /// The configuration failure that stopped this unit, if any.
    pub fn failure(&self) -> Option<&CodegenError> {
        self.failed.as_ref()
    }

    /// Lower every requested body and finalize the module.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn finish(self) -> CodegenResult<CompiledIterators> {
        let Self {
            mut jit,
            registry,
            mut layouts,
            failed,
        } = self;
        if let Some(err) = failed {
            return Err(err);
        }

        let mut builder_ctx = FunctionBuilderContext::new();
        for (op, kind, func_id) in registry.lowered() {
            let name = op.symbol_name(kind);
            let func_id = func_id.ok_or_else(|| {
                CodegenError::internal_with_context("entry point was never declared", name.clone())
            })?;
            let sig = jit.create_signature_from_spec(op.signature());
            {
                let (func, module) = jit.split_for_compile();
                func.signature = sig;
                let builder = FunctionBuilder::new(func, &mut builder_ctx);
                let mut cg = Cg::new(builder, module, &registry, &mut layouts);
                protocol::lower_entry(&mut cg, op, kind)?;
                cg.finish();
            }
            jit.define_function(func_id, &name)?;
            jit.clear();
        }

        jit.finalize()?;
        Ok(CompiledIterators::new(jit, registry, layouts))
    }

    /// Run a request unless the unit has already failed, recording its error.
    /// A request that fails halfway may leave entries declared but not
    /// lowerable, so nothing after it is accepted.
    fn latched(
        &mut self,
        request: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let result = request(self);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "compilation unit failed");
            self.failed = Some(err.clone());
        }
        result
    }

    /// Check `kind` is well formed and import every symbol it refers to.
    fn prepare(&mut self, kind: &IterKind) -> CodegenResult<()> {
        check_kind(kind)?;
        if let Some(missing) = kind
            .external_symbols()
            .into_iter()
            .find(|name| !self.jit.has_symbol(name))
        {
            return Err(CodegenError::not_found("external symbol", missing));
        }
        for (name, shape) in symbol_uses(kind) {
            let sig = self.jit.create_signature_from_spec(shape);
            let func_id = self.jit.import_function(name, &sig)?;
            let key = self.registry.intern_imported(name);
            self.registry.set_func_id(key, func_id);
        }
        Ok(())
    }

    /// Make entry point `op` of `kind` available, declaring it and everything
    /// its body calls.
    fn require(&mut self, op: IterOp, kind: &IterKind) -> CodegenResult<()> {
        if self.registry.entry_key(&op, kind).is_some() {
            return Ok(());
        }
        match protocol::entry_point(&op, kind) {
            EntryPoint::Lowered => {
                let name = op.symbol_name(kind);
                let sig = self.jit.create_signature_from_spec(op.signature());
                let func_id = self.jit.declare_function(&name, &sig)?;
                let key = self.registry.intern_lowered(op.clone(), kind);
                self.registry.set_func_id(key, func_id);
                for (dep_op, dep_kind) in protocol::dependencies(&op, kind) {
                    self.require(dep_op, &dep_kind)?;
                }
            }
            EntryPoint::Imported(symbol) => {
                if self.registry.imported_key(&symbol).is_none() {
                    return Err(CodegenError::not_found("external symbol", symbol));
                }
                self.registry.bind_imported(op, kind, &symbol);
            }
            EntryPoint::Unsupported => {
                return Err(CodegenError::unsupported_with_context(
                    "iterator entry point",
                    op.symbol_name(kind),
                ));
            }
        }
        Ok(())
    }
}

fn check_kind(kind: &IterKind) -> CodegenResult<()> {
    match kind {
        IterKind::Enumerate(e) => check_kind(&e.source),
        IterKind::Zip(z) => z.sources.iter().try_for_each(check_kind),
        IterKind::Generator(_) => Ok(()),
        IterKind::External(ext) => check_external(ext),
    }
}

fn check_external(ext: &ExternalType) -> CodegenResult<()> {
    match &ext.role {
        ExternalRole::Iterator { .. } => Ok(()),
        ExternalRole::Iterable { iterator, .. } => match iterator.role {
            ExternalRole::Iterator { .. } => Ok(()),
            ExternalRole::Iterable { .. } => Err(CodegenError::type_mismatch(
                "getiter result",
                "iterator",
                iterator.name.clone(),
            )),
        },
    }
}
