//! Typed runtime callable registry for iterator lowering.
//!
//! Single source of truth for the runtime symbols compiled iterator code may
//! call: their C names, their ABI signatures and the native addresses linked
//! into every JIT module.

use cranelift::prelude::{Type, types};

/// Typed key for a runtime callable exposed to codegen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKey {
    Alloc,
    Free,
    ArrayGetIter,
    ArrayIterNext,
    ArrayIterRelease,
    RangeNext,
    RangeRelease,
    GeneratorResume,
}

impl RuntimeKey {
    pub fn name(self) -> &'static str {
        for symbol in RUNTIME_SYMBOLS {
            if symbol.key == self {
                return symbol.c_name;
            }
        }
        panic!("missing runtime symbol name for key: {self:?}");
    }
}

/// Metadata for a runtime callable.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSymbol {
    pub key: RuntimeKey,
    pub c_name: &'static str,
    /// Imported eagerly into every module; the rest are imported on demand
    /// when an iterator kind names them.
    pub imported_eagerly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiTy {
    Ptr,
    I32,
    I64,
}

impl AbiTy {
    pub fn ir_type(self, ptr_type: Type) -> Type {
        match self {
            AbiTy::Ptr => ptr_type,
            AbiTy::I32 => types::I32,
            AbiTy::I64 => types::I64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SigSpec {
    pub params: &'static [AbiTy],
    pub ret: Option<AbiTy>,
}

const RUNTIME_SYMBOLS: &[RuntimeSymbol] = &[
    RuntimeSymbol {
        key: RuntimeKey::Alloc,
        c_name: "shrew_alloc",
        imported_eagerly: true,
    },
    RuntimeSymbol {
        key: RuntimeKey::Free,
        c_name: "shrew_free",
        imported_eagerly: true,
    },
    RuntimeSymbol {
        key: RuntimeKey::ArrayGetIter,
        c_name: "shrew_array_getiter",
        imported_eagerly: false,
    },
    RuntimeSymbol {
        key: RuntimeKey::ArrayIterNext,
        c_name: "shrew_array_iter_next",
        imported_eagerly: false,
    },
    RuntimeSymbol {
        key: RuntimeKey::ArrayIterRelease,
        c_name: "shrew_array_iter_release",
        imported_eagerly: false,
    },
    RuntimeSymbol {
        key: RuntimeKey::RangeNext,
        c_name: "shrew_range_next",
        imported_eagerly: false,
    },
    RuntimeSymbol {
        key: RuntimeKey::RangeRelease,
        c_name: "shrew_range_release",
        imported_eagerly: false,
    },
    RuntimeSymbol {
        key: RuntimeKey::GeneratorResume,
        c_name: "shrew_generator_resume",
        imported_eagerly: false,
    },
];

pub fn eager_symbols() -> impl Iterator<Item = &'static RuntimeSymbol> {
    RUNTIME_SYMBOLS.iter().filter(|symbol| symbol.imported_eagerly)
}

/// Signature shapes shared by every iterator entry point, runtime or external.
pub mod shapes {
    use super::{AbiTy, SigSpec};

    /// `getiter(value: ptr) -> ptr`
    pub const GETITER: SigSpec = SigSpec {
        params: &[AbiTy::Ptr],
        ret: Some(AbiTy::Ptr),
    };

    /// `iternext(iter: ptr, out: ptr) -> status`
    pub const ITERNEXT: SigSpec = SigSpec {
        params: &[AbiTy::Ptr, AbiTy::Ptr],
        ret: Some(AbiTy::I32),
    };

    /// `release(iter: ptr)`
    pub const RELEASE: SigSpec = SigSpec {
        params: &[AbiTy::Ptr],
        ret: None,
    };

    /// `new(args: ptr) -> ptr`
    pub const CONSTRUCT: SigSpec = SigSpec {
        params: &[AbiTy::Ptr],
        ret: Some(AbiTy::Ptr),
    };

    /// `for_each(iterable: ptr, sink: ptr, ctx: ptr) -> status`
    pub const FOR_EACH: SigSpec = SigSpec {
        params: &[AbiTy::Ptr, AbiTy::Ptr, AbiTy::Ptr],
        ret: Some(AbiTy::I32),
    };

    /// `sink(ctx: ptr, value: ptr) -> status`
    pub const SINK: SigSpec = SigSpec {
        params: &[AbiTy::Ptr, AbiTy::Ptr],
        ret: Some(AbiTy::I32),
    };
}

pub fn signature_for(key: RuntimeKey) -> SigSpec {
    match key {
        RuntimeKey::Alloc => SigSpec {
            params: &[AbiTy::I64, AbiTy::I64, AbiTy::I32],
            ret: Some(AbiTy::Ptr),
        },
        RuntimeKey::Free => SigSpec {
            params: &[AbiTy::Ptr, AbiTy::I64, AbiTy::I64, AbiTy::I32],
            ret: None,
        },
        RuntimeKey::ArrayGetIter => shapes::GETITER,
        RuntimeKey::ArrayIterNext | RuntimeKey::RangeNext | RuntimeKey::GeneratorResume => {
            shapes::ITERNEXT
        }
        RuntimeKey::ArrayIterRelease | RuntimeKey::RangeRelease => shapes::RELEASE,
    }
}

/// Runtime symbols that can be linked into JIT modules.
#[derive(Clone, Copy)]
pub struct LinkableRuntimeSymbol {
    pub c_name: &'static str,
    pub ptr: *const u8,
}

const LINKABLE_RUNTIME_SYMBOLS: &[LinkableRuntimeSymbol] = &[
    LinkableRuntimeSymbol {
        c_name: "shrew_alloc",
        ptr: shrew_runtime::memory::shrew_alloc as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_free",
        ptr: shrew_runtime::memory::shrew_free as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_array_getiter",
        ptr: shrew_runtime::array::shrew_array_getiter as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_array_iter_next",
        ptr: shrew_runtime::array::shrew_array_iter_next as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_array_iter_release",
        ptr: shrew_runtime::array::shrew_array_iter_release as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_range_next",
        ptr: shrew_runtime::range::shrew_range_next as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_range_release",
        ptr: shrew_runtime::range::shrew_range_release as *const u8,
    },
    LinkableRuntimeSymbol {
        c_name: "shrew_generator_resume",
        ptr: shrew_runtime::coroutine::shrew_generator_resume as *const u8,
    },
];

pub fn all_linkable_symbols() -> &'static [LinkableRuntimeSymbol] {
    LINKABLE_RUNTIME_SYMBOLS
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn every_symbol_name_resolves_to_its_key() {
        for symbol in RUNTIME_SYMBOLS {
            assert_eq!(symbol.key.name(), symbol.c_name);
        }
    }

    #[test]
    fn symbol_names_are_unique() {
        let mut seen = FxHashSet::default();
        for symbol in RUNTIME_SYMBOLS {
            assert!(seen.insert(symbol.c_name), "duplicate {}", symbol.c_name);
        }
    }

    #[test]
    fn every_symbol_is_linkable() {
        let linkable: FxHashSet<&str> = all_linkable_symbols()
            .iter()
            .map(|symbol| symbol.c_name)
            .collect();
        for symbol in RUNTIME_SYMBOLS {
            assert!(
                linkable.contains(symbol.c_name),
                "{} has no native address",
                symbol.c_name
            );
        }
        assert_eq!(linkable.len(), RUNTIME_SYMBOLS.len());
    }

    #[test]
    fn iternext_shaped_symbols_return_status() {
        for key in [
            RuntimeKey::ArrayIterNext,
            RuntimeKey::RangeNext,
            RuntimeKey::GeneratorResume,
        ] {
            let sig = signature_for(key);
            assert_eq!(sig.params, &[AbiTy::Ptr, AbiTy::Ptr]);
            assert_eq!(sig.ret, Some(AbiTy::I32));
        }
    }
}
