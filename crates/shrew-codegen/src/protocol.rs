//! The generic iterator protocol.
//!
//! Every iterator kind implements [`IterProtocol`]; lowering dispatches with a
//! `match` over the closed [`IterKind`] variant, so no kind is ever chosen at
//! run time. The protocol has two operations:
//!
//! - `getiter(value) -> iterator`: identity (a borrowed alias) for values that
//!   are already iterators, a fresh owned iterator for everything else.
//! - `iternext(iterator, out) -> status`: writes one value at `out` and
//!   returns `STATUS_OK`, or returns `STATUS_STOP_ITERATION`, or forwards a
//!   failure status unchanged.

use cranelift::prelude::{InstBuilder, Value};

use crate::context::Cg;
use crate::errors::{CodegenError, CodegenResult};
use crate::function_registry::IterOp;
use crate::types::{IterKind, ScalarKind};

/// How a kind provides one protocol entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryPoint {
    /// A body generated by the lowering.
    Lowered,
    /// A runtime or registered external symbol.
    Imported(String),
    /// The kind has no such entry point.
    Unsupported,
}

pub(crate) trait IterProtocol {
    /// How `op` is provided for this kind. `GetIter` and `ForEach` are
    /// lowered generically and never reach this method.
    fn entry_point(&self, op: &IterOp) -> EntryPoint;

    /// Entry points of other kinds that a lowered `op` body calls.
    fn dependencies(&self, _op: &IterOp) -> Vec<(IterOp, IterKind)> {
        Vec::new()
    }

    /// Check constructor argument kinds before anything is lowered.
    fn validate_construct(&self, name: &str, _args: &[ScalarKind]) -> CodegenResult<()> {
        Err(CodegenError::unsupported_with_context(
            "constructor",
            name.to_string(),
        ))
    }

    /// Emit the body of `iternext(state, out)`. Every path must return.
    fn lower_iternext(&self, _cg: &mut Cg<'_, '_>, _state: Value, _out: Value) -> CodegenResult<()> {
        Err(CodegenError::internal("no iternext lowering for kind"))
    }

    /// Emit the release of `state`; the caller adds the return.
    fn lower_release(&self, _cg: &mut Cg<'_, '_>, _state: Value) -> CodegenResult<()> {
        Err(CodegenError::internal("no release lowering for kind"))
    }

    /// Emit construction from the argument record at `args`, returning the new value.
    fn lower_construct(
        &self,
        _cg: &mut Cg<'_, '_>,
        _args: Value,
        _arg_kinds: &[ScalarKind],
    ) -> CodegenResult<Value> {
        Err(CodegenError::internal("no constructor lowering for kind"))
    }
}

pub(crate) fn protocol(kind: &IterKind) -> &dyn IterProtocol {
    match kind {
        IterKind::Enumerate(enumerate) => enumerate,
        IterKind::Zip(zip) => zip,
        IterKind::Generator(generator) => generator,
        IterKind::External(external) => external,
    }
}

/// How `op` is provided for `kind`.
pub(crate) fn entry_point(op: &IterOp, kind: &IterKind) -> EntryPoint {
    match op {
        IterOp::GetIter | IterOp::ForEach => EntryPoint::Lowered,
        _ => protocol(kind).entry_point(op),
    }
}

/// Entry points a lowered `op` body for `kind` calls.
pub(crate) fn dependencies(op: &IterOp, kind: &IterKind) -> Vec<(IterOp, IterKind)> {
    match op {
        IterOp::GetIter => Vec::new(),
        IterOp::ForEach => crate::for_loop::for_each_dependencies(kind),
        _ => protocol(kind).dependencies(op),
    }
}

/// Emit the complete body of entry point `op` for `kind`.
pub(crate) fn lower_entry(cg: &mut Cg<'_, '_>, op: &IterOp, kind: &IterKind) -> CodegenResult<()> {
    let params = cg.entry_params();
    match op {
        IterOp::GetIter => {
            let (iter, ownership) = cg.getiter(kind, params[0])?;
            tracing::trace!(kind = %kind, ?ownership, "lowering getiter");
            cg.builder.ins().return_(&[iter]);
        }
        IterOp::IterNext => protocol(kind).lower_iternext(cg, params[0], params[1])?,
        IterOp::Release => {
            protocol(kind).lower_release(cg, params[0])?;
            cg.builder.ins().return_(&[]);
        }
        IterOp::Construct(arg_kinds) => {
            let value = protocol(kind).lower_construct(cg, params[0], arg_kinds)?;
            cg.builder.ins().return_(&[value]);
        }
        IterOp::ForEach => cg.lower_for_each(kind, params[0], params[1], params[2])?,
    }
    Ok(())
}

/// Release-routine dependency for a source of kind `source`, if its
/// iterator is owned and releasable.
pub(crate) fn source_release_dependency(source: &IterKind) -> Option<(IterOp, IterKind)> {
    let iter_kind = source.iterator_kind();
    (source.getiter_ownership() == crate::types::Ownership::Owned && iter_kind.needs_release())
        .then(|| (IterOp::Release, iter_kind))
}
