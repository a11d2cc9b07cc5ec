//! Shrew code generation: Cranelift lowering of the iterator protocol.

mod call_conv;
mod compiled;
pub mod compiler;
mod context;
mod enumerate;
pub mod errors;
mod external;
mod for_loop;
mod function_registry;
mod generator;
pub mod jit;
pub mod layout;
mod protocol;
mod runtime_registry;
pub mod types;
mod zip;

pub use call_conv::IterationResult;
pub use compiled::{ArgPack, ArgValue, CompiledIterators, IterHandle, LoopExit, OwnedValue};
pub use compiler::IterCompiler;
pub use function_registry::{FunctionKey, FunctionRegistry, IterOp};
pub use jit::{ExternalSymbol, JitContext, JitOptions};
pub use layout::{Layout, LayoutBuilder, YieldValue};
pub use runtime_registry::RuntimeKey;
pub use types::{
    EnumerateType, ExternalRole, ExternalType, GeneratorType, IterKind, Ownership, ScalarKind,
    ValueType, ZipType,
};

// Error types
pub use errors::{CodegenError, CodegenErrorKind, CodegenResult};
