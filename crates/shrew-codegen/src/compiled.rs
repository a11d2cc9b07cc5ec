//! Host-side access to finalized iterator code.
//!
//! [`CompiledIterators`] owns the JIT module produced by
//! [`IterCompiler::finish`](crate::IterCompiler::finish) and hands out typed
//! wrappers around its entry points:
//!
//! - [`OwnedValue`]: a constructed combinator, released on drop.
//! - [`IterHandle`]: the result of `getiter`, released on drop only when owned.
//! - [`CompiledIterators::for_each`]: runs the compiled loop driver with a
//!   Rust closure as the sink.
//!
//! Compiled code dereferences the raw value pointers handed to `construct`,
//! `iter` and `for_each`, so those are `unsafe fn`s.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use shrew_runtime::{STATUS_ERROR, STATUS_OK, StatusClass, classify};

use crate::call_conv::IterationResult;
use crate::errors::{CodegenError, CodegenResult};
use crate::function_registry::{FunctionRegistry, IterOp};
use crate::jit::JitContext;
use crate::layout::{Layout, LayoutBuilder, YieldValue};
use crate::types::{IterKind, Ownership, ScalarKind};

type GetIterFn = extern "C" fn(*mut u8) -> *mut u8;
type IterNextFn = extern "C" fn(*mut u8, *mut u8) -> i32;
type ReleaseFn = extern "C" fn(*mut u8);
type ConstructFn = extern "C" fn(*const u8) -> *mut u8;
type ForEachFn = extern "C" fn(*mut u8, *const u8, *mut u8) -> i32;
type SinkFn = extern "C" fn(*mut u8, *const u8) -> i32;

/// How a loop over an iterator ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Exhausted,
    /// A propagated failure status, unchanged.
    Failed(i32),
}

impl LoopExit {
    fn from_status(status: i32) -> Self {
        match classify(status) {
            StatusClass::Ok | StatusClass::StopIteration => LoopExit::Exhausted,
            StatusClass::Error(code) => LoopExit::Failed(code),
        }
    }
}

pub struct CompiledIterators {
    jit: JitContext,
    registry: FunctionRegistry,
    layouts: RefCell<LayoutBuilder>,
}

impl CompiledIterators {
    pub(crate) fn new(jit: JitContext, registry: FunctionRegistry, layouts: LayoutBuilder) -> Self {
        Self {
            jit,
            registry,
            layouts: RefCell::new(layouts),
        }
    }

    /// Native address of entry point `op` for `kind`, lowered or imported.
    pub fn entry_ptr(&self, op: &IterOp, kind: &IterKind) -> CodegenResult<*const u8> {
        let key = self
            .registry
            .entry_key(op, kind)
            .ok_or_else(|| CodegenError::not_found("compiled entry point", op.symbol_name(kind)))?;
        if self.registry.is_imported(key) {
            let symbol = self.registry.display(key);
            return self
                .jit
                .symbol_address(&symbol)
                .ok_or_else(|| CodegenError::not_found("external symbol", symbol));
        }
        let func_id = self.registry.func_id(key).ok_or_else(|| {
            CodegenError::internal_with_context("entry point has no id", self.registry.display(key))
        })?;
        Ok(self.jit.get_function_ptr_by_id(func_id))
    }

    /// Disassembly captured when compiled with `JitOptions::disasm`.
    pub fn disasm(&self) -> &[(String, String)] {
        self.jit.get_disasm()
    }

    /// Layout of the values `kind` yields.
    pub fn yield_layout(&self, kind: &IterKind) -> Rc<Layout> {
        self.layouts.borrow_mut().yield_layout(kind)
    }

    /// Construct a combinator value of `kind` from `args`.
    ///
    /// # Safety
    ///
    /// Every [`ArgValue::Ptr`] must point to a live value of the source kind
    /// at that position, and that value must outlive the returned
    /// [`OwnedValue`] and every iterator obtained from it.
    pub unsafe fn construct(
        &self,
        kind: &IterKind,
        args: &[ArgValue],
    ) -> CodegenResult<OwnedValue<'_>> {
        let arg_kinds: Vec<ScalarKind> = args.iter().map(ArgValue::kind).collect();
        let layout = self
            .layouts
            .borrow()
            .args_layout(kind, &arg_kinds)
            .ok_or_else(|| CodegenError::unsupported_with_context("constructor", kind.to_string()))?;
        let pack = ArgPack::new(&layout, args)?;

        let construct_ptr = self.entry_ptr(&IterOp::Construct(arg_kinds), kind)?;
        let release = self.release_fn(kind)?;
        let construct: ConstructFn = unsafe { std::mem::transmute(construct_ptr) };
        let ptr = construct(pack.as_ptr());
        tracing::trace!(kind = %kind, ?ptr, "constructed iterator value");

        Ok(OwnedValue {
            ptr,
            release,
            _code: PhantomData,
        })
    }

    /// Call `getiter` for `kind` on `value`.
    ///
    /// # Safety
    ///
    /// `value` must point to a live value of `kind` (for a combinator, one
    /// returned by [`construct`](Self::construct)) that outlives the handle.
    pub unsafe fn iter(&self, kind: &IterKind, value: *mut u8) -> CodegenResult<IterHandle<'_>> {
        let iter_kind = kind.iterator_kind();
        let getiter: GetIterFn =
            unsafe { std::mem::transmute(self.entry_ptr(&IterOp::GetIter, kind)?) };
        let next: IterNextFn =
            unsafe { std::mem::transmute(self.entry_ptr(&IterOp::IterNext, &iter_kind)?) };
        let ownership = kind.getiter_ownership();
        let release = match ownership {
            Ownership::Owned => self.release_fn(&iter_kind)?,
            Ownership::Borrowed => None,
        };
        let layout = self.yield_layout(kind);
        let out = vec![0u64; (layout.size as usize).div_ceil(8).max(1)];

        Ok(IterHandle {
            iter: getiter(value),
            next,
            release,
            ownership,
            layout,
            out,
            _code: PhantomData,
        })
    }

    /// Run the compiled loop over `iterable`, handing every value to `sink`.
    ///
    /// A panic in `sink` stops the loop, lets the compiled code release its
    /// iterator, and is then resumed here.
    ///
    /// # Safety
    ///
    /// `iterable` must point to a live value of `kind`.
    pub unsafe fn for_each(
        &self,
        kind: &IterKind,
        iterable: *mut u8,
        mut sink: impl FnMut(YieldValue),
    ) -> CodegenResult<LoopExit> {
        let entry: ForEachFn =
            unsafe { std::mem::transmute(self.entry_ptr(&IterOp::ForEach, kind)?) };
        let layout = self.yield_layout(kind);
        let mut state = SinkState {
            layout: &layout,
            sink: &mut sink,
            panic: None,
        };
        let status = entry(
            iterable,
            sink_trampoline as SinkFn as *const u8,
            &mut state as *mut SinkState<'_> as *mut u8,
        );
        if let Some(payload) = state.panic.take() {
            panic::resume_unwind(payload);
        }
        Ok(LoopExit::from_status(status))
    }

    fn release_fn(&self, kind: &IterKind) -> CodegenResult<Option<ReleaseFn>> {
        if !kind.needs_release() {
            return Ok(None);
        }
        let ptr = self.entry_ptr(&IterOp::Release, kind)?;
        Ok(Some(unsafe { std::mem::transmute::<*const u8, ReleaseFn>(ptr) }))
    }
}

struct SinkState<'s> {
    layout: &'s Layout,
    sink: &'s mut dyn FnMut(YieldValue),
    /// Payload of a panic raised by `sink`, resumed once compiled code returns.
    panic: Option<Box<dyn Any + Send>>,
}

// Panics must not unwind through compiled frames.
extern "C" fn sink_trampoline(ctx: *mut u8, value: *const u8) -> i32 {
    let state = unsafe { &mut *(ctx as *mut SinkState<'_>) };
    let bytes = unsafe { std::slice::from_raw_parts(value, state.layout.size as usize) };
    let Some(decoded) = state.layout.read(bytes) else {
        return STATUS_ERROR;
    };
    let sink = &mut *state.sink;
    match panic::catch_unwind(AssertUnwindSafe(|| sink(decoded))) {
        Ok(()) => STATUS_OK,
        Err(payload) => {
            state.panic = Some(payload);
            STATUS_ERROR
        }
    }
}

/// A combinator value built by a compiled constructor.
pub struct OwnedValue<'c> {
    ptr: *mut u8,
    release: Option<ReleaseFn>,
    _code: PhantomData<&'c CompiledIterators>,
}

impl OwnedValue<'_> {
    pub fn as_raw(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for OwnedValue<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            release(self.ptr);
        }
    }
}

/// An iterator obtained through `getiter`.
pub struct IterHandle<'c> {
    iter: *mut u8,
    next: IterNextFn,
    release: Option<ReleaseFn>,
    ownership: Ownership,
    layout: Rc<Layout>,
    out: Vec<u64>,
    _code: PhantomData<&'c CompiledIterators>,
}

impl IterHandle<'_> {
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Advance by one step.
    pub fn step(&mut self) -> IterationResult<YieldValue> {
        let status = (self.next)(self.iter, self.out.as_mut_ptr() as *mut u8);
        IterationResult::from_status(status, || {
            let bytes: Vec<u8> = self.out.iter().flat_map(|w| w.to_ne_bytes()).collect();
            self.layout
                .read(&bytes)
                .expect("INTERNAL: iterator out buffer shorter than its yield layout")
        })
    }

    /// Advance until exhausted or failed, collecting every valid value.
    pub fn drain(&mut self) -> (Vec<YieldValue>, LoopExit) {
        let mut values = Vec::new();
        loop {
            match self.step() {
                IterationResult::Valid(value) => values.push(value),
                IterationResult::Exhausted => return (values, LoopExit::Exhausted),
                IterationResult::PropagatedFailure(code) => {
                    return (values, LoopExit::Failed(code));
                }
            }
        }
    }
}

impl Drop for IterHandle<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            release(self.iter);
        }
    }
}

/// A typed constructor argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    Ptr(*mut u8),
    I64(i64),
    I32(i32),
    Bool(bool),
    F64(f64),
}

impl ArgValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ArgValue::Ptr(_) => ScalarKind::Ptr,
            ArgValue::I64(_) => ScalarKind::I64,
            ArgValue::I32(_) => ScalarKind::I32,
            ArgValue::Bool(_) => ScalarKind::Bool,
            ArgValue::F64(_) => ScalarKind::F64,
        }
    }

    fn write(&self, out: &mut [u8]) {
        match *self {
            ArgValue::Ptr(p) => out.copy_from_slice(&(p as usize).to_ne_bytes()),
            ArgValue::I64(v) => out.copy_from_slice(&v.to_ne_bytes()),
            ArgValue::I32(v) => out.copy_from_slice(&v.to_ne_bytes()),
            ArgValue::Bool(v) => out[0] = u8::from(v),
            ArgValue::F64(v) => out.copy_from_slice(&v.to_ne_bytes()),
        }
    }
}

/// A packed constructor argument record, 8-byte aligned.
pub struct ArgPack {
    words: Vec<u64>,
}

impl ArgPack {
    pub fn new(layout: &Layout, args: &[ArgValue]) -> CodegenResult<Self> {
        if layout.fields().len() != args.len() {
            return Err(CodegenError::internal_with_context(
                "argument record does not match layout",
                format!("{} fields, {} arguments", layout.fields().len(), args.len()),
            ));
        }
        let mut bytes = vec![0u8; layout.size as usize];
        for (field, arg) in layout.fields().iter().zip(args) {
            if field.layout.scalar_kind() != Some(arg.kind()) {
                return Err(CodegenError::type_mismatch(
                    "constructor argument",
                    field.layout.scalar_kind().map_or("aggregate", ScalarKind::name),
                    arg.kind().name(),
                ));
            }
            let start = field.offset as usize;
            arg.write(&mut bytes[start..start + field.layout.size as usize]);
        }

        let mut words = vec![0u64; bytes.len().div_ceil(8).max(1)];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks(8)) {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            *word = u64::from_ne_bytes(raw);
        }
        Ok(Self { words })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_pack_places_fields_at_layout_offsets() {
        let layouts = LayoutBuilder::with_pointer_bytes(8);
        let layout = layouts.enumerate_args(&[ScalarKind::Ptr, ScalarKind::I32]);
        let pack = ArgPack::new(&layout, &[ArgValue::Ptr(0x1000 as *mut u8), ArgValue::I32(-4)])
            .unwrap();
        let bytes = pack.bytes();
        assert_eq!(&bytes[0..8], &0x1000usize.to_ne_bytes());
        assert_eq!(&bytes[8..12], &(-4i32).to_ne_bytes());
    }

    #[test]
    fn arg_pack_rejects_mismatched_kinds() {
        let layouts = LayoutBuilder::with_pointer_bytes(8);
        let layout = layouts.zip_args(&[ScalarKind::Ptr]);
        assert!(ArgPack::new(&layout, &[ArgValue::I64(3)]).is_err());
        assert!(ArgPack::new(&layout, &[]).is_err());
    }

    #[test]
    fn empty_record_still_has_an_address() {
        let layouts = LayoutBuilder::with_pointer_bytes(8);
        let pack = ArgPack::new(&layouts.zip_args(&[]), &[]).unwrap();
        assert!(!pack.as_ptr().is_null());
    }

    #[test]
    fn loop_exit_from_status() {
        assert_eq!(LoopExit::from_status(STATUS_OK), LoopExit::Exhausted);
        assert_eq!(
            LoopExit::from_status(shrew_runtime::STATUS_STOP_ITERATION),
            LoopExit::Exhausted
        );
        assert_eq!(LoopExit::from_status(-1), LoopExit::Failed(-1));
    }

    #[test]
    fn sink_panic_is_caught_and_reported_as_failure() {
        let layout = Layout::scalar(ScalarKind::I64, 8);
        let mut sink = |value: YieldValue| {
            if value == YieldValue::I64(3) {
                panic!("sink failed");
            }
        };
        let mut state = SinkState {
            layout: &layout,
            sink: &mut sink,
            panic: None,
        };
        let value = 3i64;
        let status = sink_trampoline(
            &mut state as *mut SinkState<'_> as *mut u8,
            &value as *const i64 as *const u8,
        );
        assert_eq!(status, STATUS_ERROR);
        assert!(state.panic.is_some());
    }

    #[test]
    fn sink_receives_decoded_values() {
        let layout = Layout::scalar(ScalarKind::I64, 8);
        let mut seen = Vec::new();
        let mut sink = |value: YieldValue| seen.push(value);
        let mut state = SinkState {
            layout: &layout,
            sink: &mut sink,
            panic: None,
        };
        let value = 12i64;
        let status = sink_trampoline(
            &mut state as *mut SinkState<'_> as *mut u8,
            &value as *const i64 as *const u8,
        );
        assert_eq!(status, STATUS_OK);
        drop(state);
        assert_eq!(seen, vec![YieldValue::I64(12)]);
    }
}
