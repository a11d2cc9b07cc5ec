// src/codegen/types.rs
//
// Resolved type descriptors handed to the lowering by signature resolution.
// Every combinator instantiation arrives fully resolved: the variant is fixed
// here and never re-dispatched at run time.

use std::fmt;

use cranelift::prelude::{Type, types};

use crate::runtime_registry::RuntimeKey;

/// Scalar machine value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I32,
    I64,
    F64,
    Ptr,
}

impl ScalarKind {
    /// True for kinds accepted as an integer counter start.
    pub fn is_integer(self) -> bool {
        matches!(self, ScalarKind::Bool | ScalarKind::I32 | ScalarKind::I64)
    }

    /// Byte size, given the target pointer width in bytes.
    pub fn size(self, ptr_bytes: u32) -> u32 {
        match self {
            ScalarKind::Bool => 1,
            ScalarKind::I32 => 4,
            ScalarKind::I64 | ScalarKind::F64 => 8,
            ScalarKind::Ptr => ptr_bytes,
        }
    }

    /// Cranelift type used to hold this scalar in a register.
    pub fn ir_type(self, ptr_type: Type) -> Type {
        match self {
            ScalarKind::Bool => types::I8,
            ScalarKind::I32 => types::I32,
            ScalarKind::I64 => types::I64,
            ScalarKind::F64 => types::F64,
            ScalarKind::Ptr => ptr_type,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F64 => "f64",
            ScalarKind::Ptr => "ptr",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a value yielded by an iterator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Scalar(ScalarKind),
    /// Anonymous struct; the empty tuple is valid.
    Tuple(Vec<ValueType>),
}

impl ValueType {
    pub fn i64() -> Self {
        ValueType::Scalar(ScalarKind::I64)
    }

    pub fn f64() -> Self {
        ValueType::Scalar(ScalarKind::F64)
    }

    pub fn tuple(fields: Vec<ValueType>) -> Self {
        ValueType::Tuple(fields)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar(kind) => write!(f, "{kind}"),
            ValueType::Tuple(fields) => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Whether a value obtained through `getiter` is owned by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Freshly constructed; the receiver must release it exactly once.
    Owned,
    /// An alias of a value owned elsewhere; never released by the receiver.
    Borrowed,
}

/// The closed set of iterable kinds the lowering understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IterKind {
    Enumerate(EnumerateType),
    Zip(ZipType),
    Generator(GeneratorType),
    External(ExternalType),
}

/// Indexed iteration over one source iterable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumerateType {
    pub source: Box<IterKind>,
}

/// Lockstep iteration over N >= 0 source iterables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZipType {
    pub sources: Vec<IterKind>,
}

/// A resumable computation compiled elsewhere.
///
/// The resume procedure has the signature `(handle: ptr, out: ptr) -> i32`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratorType {
    pub name: String,
    pub yield_type: ValueType,
    pub resume_symbol: String,
}

/// An opaque iterable or iterator implemented outside the lowering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalType {
    pub name: String,
    pub yield_type: ValueType,
    pub role: ExternalRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalRole {
    /// Already an iterator: `next(iter: ptr, out: ptr) -> i32`, optional `release(iter: ptr)`.
    Iterator {
        next_symbol: String,
        release_symbol: Option<String>,
    },
    /// A container: `getiter(value: ptr) -> ptr` builds a fresh owned `iterator`.
    Iterable {
        getiter_symbol: String,
        iterator: Box<ExternalType>,
    },
}

impl IterKind {
    pub fn enumerate(source: IterKind) -> Self {
        IterKind::Enumerate(EnumerateType {
            source: Box::new(source),
        })
    }

    pub fn zip(sources: Vec<IterKind>) -> Self {
        IterKind::Zip(ZipType { sources })
    }

    pub fn generator(
        name: impl Into<String>,
        yield_type: ValueType,
        resume_symbol: impl Into<String>,
    ) -> Self {
        IterKind::Generator(GeneratorType {
            name: name.into(),
            yield_type,
            resume_symbol: resume_symbol.into(),
        })
    }

    /// Generator backed by the runtime's coroutine handle, yielding i64 words.
    pub fn coroutine_generator(name: impl Into<String>) -> Self {
        Self::generator(name, ValueType::i64(), RuntimeKey::GeneratorResume.name())
    }

    /// The runtime i64 array iterable.
    pub fn array_i64() -> Self {
        IterKind::External(ExternalType {
            name: "array_i64".to_string(),
            yield_type: ValueType::i64(),
            role: ExternalRole::Iterable {
                getiter_symbol: RuntimeKey::ArrayGetIter.name().to_string(),
                iterator: Box::new(ExternalType {
                    name: "array_i64.iter".to_string(),
                    yield_type: ValueType::i64(),
                    role: ExternalRole::Iterator {
                        next_symbol: RuntimeKey::ArrayIterNext.name().to_string(),
                        release_symbol: Some(RuntimeKey::ArrayIterRelease.name().to_string()),
                    },
                }),
            },
        })
    }

    /// The runtime i64 range iterator.
    pub fn range_i64() -> Self {
        IterKind::External(ExternalType {
            name: "range_i64".to_string(),
            yield_type: ValueType::i64(),
            role: ExternalRole::Iterator {
                next_symbol: RuntimeKey::RangeNext.name().to_string(),
                release_symbol: Some(RuntimeKey::RangeRelease.name().to_string()),
            },
        })
    }

    /// True when the value already satisfies the iterator capability.
    pub fn is_iterator(&self) -> bool {
        match self {
            IterKind::Enumerate(_) | IterKind::Zip(_) | IterKind::Generator(_) => true,
            IterKind::External(ext) => matches!(ext.role, ExternalRole::Iterator { .. }),
        }
    }

    /// Ownership of the value `getiter` returns for this kind.
    pub fn getiter_ownership(&self) -> Ownership {
        if self.is_iterator() {
            Ownership::Borrowed
        } else {
            Ownership::Owned
        }
    }

    /// The iterator kind `getiter` produces for this kind.
    pub fn iterator_kind(&self) -> IterKind {
        match self {
            IterKind::External(ExternalType {
                role: ExternalRole::Iterable { iterator, .. },
                ..
            }) => IterKind::External((**iterator).clone()),
            other => other.clone(),
        }
    }

    /// The symbol constructing a fresh iterator, for kinds that are not
    /// already iterators.
    pub fn getiter_symbol(&self) -> Option<&str> {
        match self {
            IterKind::External(ExternalType {
                role: ExternalRole::Iterable { getiter_symbol, .. },
                ..
            }) => Some(getiter_symbol),
            _ => None,
        }
    }

    /// The type of each yielded value.
    pub fn yield_type(&self) -> ValueType {
        match self {
            IterKind::Enumerate(e) => {
                ValueType::Tuple(vec![ValueType::i64(), e.source.yield_type()])
            }
            IterKind::Zip(z) => ValueType::Tuple(z.sources.iter().map(|s| s.yield_type()).collect()),
            IterKind::Generator(g) => g.yield_type.clone(),
            IterKind::External(ext) => match &ext.role {
                ExternalRole::Iterator { .. } => ext.yield_type.clone(),
                ExternalRole::Iterable { iterator, .. } => iterator.yield_type.clone(),
            },
        }
    }

    /// True when an owned value of this kind has a release routine.
    ///
    /// Generator handles are owned by generator-instance management, and an
    /// external iterator without a release symbol is never released here.
    pub fn needs_release(&self) -> bool {
        match self {
            IterKind::Enumerate(_) | IterKind::Zip(_) => true,
            IterKind::Generator(_) => false,
            IterKind::External(ext) => matches!(
                ext.role,
                ExternalRole::Iterator {
                    release_symbol: Some(_),
                    ..
                }
            ),
        }
    }

    /// Every external symbol this kind refers to, outermost first.
    pub fn external_symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            IterKind::Enumerate(e) => e.source.collect_symbols(out),
            IterKind::Zip(z) => {
                for source in &z.sources {
                    source.collect_symbols(out);
                }
            }
            IterKind::Generator(g) => out.push(&g.resume_symbol),
            IterKind::External(ext) => ext.collect_symbols(out),
        }
    }
}

impl ExternalType {
    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.role {
            ExternalRole::Iterator {
                next_symbol,
                release_symbol,
            } => {
                out.push(next_symbol);
                if let Some(release) = release_symbol {
                    out.push(release);
                }
            }
            ExternalRole::Iterable {
                getiter_symbol,
                iterator,
            } => {
                out.push(getiter_symbol);
                iterator.collect_symbols(out);
            }
        }
    }
}

/// Mangled name used for compiled entry points, e.g. `zip[array_i64,range_i64]`.
impl fmt::Display for IterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterKind::Enumerate(e) => write!(f, "enumerate[{}]", e.source),
            IterKind::Zip(z) => {
                f.write_str("zip[")?;
                for (i, source) in z.sources.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{source}")?;
                }
                f.write_str("]")
            }
            IterKind::Generator(g) => write!(f, "generator[{}]", g.name),
            IterKind::External(ext) => f.write_str(&ext.name),
        }
    }
}
