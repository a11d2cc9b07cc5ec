// src/codegen/function_registry.rs
//
// Opaque function identity registry for iterator lowering.

use cranelift_module::FuncId;
use rustc_hash::FxHashMap;

use crate::runtime_registry::{SigSpec, shapes};
use crate::types::{IterKind, ScalarKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionKey(u32);

/// Protocol entry point lowered for one iterator kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IterOp {
    GetIter,
    IterNext,
    Release,
    /// Constructor taking an argument record with these scalar kinds.
    Construct(Vec<ScalarKind>),
    ForEach,
}

impl IterOp {
    fn prefix(&self) -> &'static str {
        match self {
            IterOp::GetIter => "getiter",
            IterOp::IterNext => "iternext",
            IterOp::Release => "release",
            IterOp::Construct(_) => "new",
            IterOp::ForEach => "for_each",
        }
    }

    /// Signature every provider of this entry point shares.
    pub fn signature(&self) -> SigSpec {
        match self {
            IterOp::GetIter => shapes::GETITER,
            IterOp::IterNext => shapes::ITERNEXT,
            IterOp::Release => shapes::RELEASE,
            IterOp::Construct(_) => shapes::CONSTRUCT,
            IterOp::ForEach => shapes::FOR_EACH,
        }
    }

    /// Compiled symbol name, e.g. `iternext.zip[array_i64,range_i64]`.
    pub fn symbol_name(&self, kind: &IterKind) -> String {
        match self {
            IterOp::Construct(args) => {
                let args: Vec<&str> = args.iter().map(|arg| arg.name()).collect();
                format!("{}.{}({})", self.prefix(), kind, args.join(","))
            }
            _ => format!("{}.{}", self.prefix(), kind),
        }
    }
}

#[derive(Debug, Clone)]
enum FunctionName {
    /// Body generated by the lowering.
    Lowered { op: IterOp, kind: IterKind },
    /// Runtime or registered external symbol.
    Imported(String),
}

#[derive(Debug, Clone)]
struct FunctionEntry {
    name: FunctionName,
    func_id: Option<FuncId>,
}

#[derive(Default)]
pub struct FunctionRegistry {
    entries: Vec<FunctionEntry>,
    /// Protocol entry point -> function providing it (lowered or imported)
    entry_lookup: FxHashMap<(IterOp, IterKind), FunctionKey>,
    imported_lookup: FxHashMap<String, FunctionKey>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_lowered(&mut self, op: IterOp, kind: &IterKind) -> FunctionKey {
        let lookup = (op, kind.clone());
        if let Some(key) = self.entry_lookup.get(&lookup) {
            return *key;
        }
        let key = self.insert(FunctionName::Lowered {
            op: lookup.0.clone(),
            kind: lookup.1.clone(),
        });
        self.entry_lookup.insert(lookup, key);
        key
    }

    /// Bind an entry point to an imported symbol.
    pub fn bind_imported(&mut self, op: IterOp, kind: &IterKind, symbol: &str) -> FunctionKey {
        let key = self.intern_imported(symbol);
        self.entry_lookup.insert((op, kind.clone()), key);
        key
    }

    pub fn intern_imported(&mut self, symbol: &str) -> FunctionKey {
        if let Some(key) = self.imported_lookup.get(symbol) {
            return *key;
        }
        let key = self.insert(FunctionName::Imported(symbol.to_string()));
        self.imported_lookup.insert(symbol.to_string(), key);
        key
    }

    pub fn entry_key(&self, op: &IterOp, kind: &IterKind) -> Option<FunctionKey> {
        self.entry_lookup.get(&(op.clone(), kind.clone())).copied()
    }

    pub fn imported_key(&self, symbol: &str) -> Option<FunctionKey> {
        self.imported_lookup.get(symbol).copied()
    }

    pub fn set_func_id(&mut self, key: FunctionKey, func_id: FuncId) {
        if let Some(entry) = self.entries.get_mut(key.0 as usize) {
            entry.func_id = Some(func_id);
        }
    }

    pub fn func_id(&self, key: FunctionKey) -> Option<FuncId> {
        self.entries.get(key.0 as usize)?.func_id
    }

    pub fn display(&self, key: FunctionKey) -> String {
        match &self.entries[key.0 as usize].name {
            FunctionName::Lowered { op, kind } => op.symbol_name(kind),
            FunctionName::Imported(symbol) => symbol.clone(),
        }
    }

    pub fn is_imported(&self, key: FunctionKey) -> bool {
        matches!(
            self.entries[key.0 as usize].name,
            FunctionName::Imported(_)
        )
    }

    /// Lowered functions in interning order, with their declared ids.
    pub fn lowered(&self) -> impl Iterator<Item = (&IterOp, &IterKind, Option<FuncId>)> {
        self.entries.iter().filter_map(|entry| match &entry.name {
            FunctionName::Lowered { op, kind } => Some((op, kind, entry.func_id)),
            FunctionName::Imported(_) => None,
        })
    }

    fn insert(&mut self, name: FunctionName) -> FunctionKey {
        let key = FunctionKey(self.entries.len() as u32);
        self.entries.push(FunctionEntry {
            name,
            func_id: None,
        });
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut registry = FunctionRegistry::new();
        let kind = IterKind::zip(vec![IterKind::array_i64()]);
        let a = registry.intern_lowered(IterOp::IterNext, &kind);
        let b = registry.intern_lowered(IterOp::IterNext, &kind);
        let c = registry.intern_lowered(IterOp::Release, &kind);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.entry_key(&IterOp::IterNext, &kind), Some(a));
    }

    #[test]
    fn constructor_names_include_argument_kinds() {
        let kind = IterKind::enumerate(IterKind::range_i64());
        let op = IterOp::Construct(vec![ScalarKind::Ptr, ScalarKind::I32]);
        assert_eq!(op.symbol_name(&kind), "new.enumerate[range_i64](ptr,i32)");
        assert_eq!(
            IterOp::IterNext.symbol_name(&kind),
            "iternext.enumerate[range_i64]"
        );
    }

    #[test]
    fn imported_and_lowered_are_distinguished() {
        let mut registry = FunctionRegistry::new();
        let imported = registry.intern_imported("shrew_range_next");
        let lowered = registry.intern_lowered(IterOp::ForEach, &IterKind::range_i64());
        assert!(registry.is_imported(imported));
        assert!(!registry.is_imported(lowered));
        assert_eq!(registry.display(imported), "shrew_range_next");
        assert_eq!(registry.display(lowered), "for_each.range_i64");
        assert_eq!(registry.lowered().count(), 1);
    }

    #[test]
    fn entry_points_can_bind_to_imports() {
        let mut registry = FunctionRegistry::new();
        let kind = IterKind::range_i64();
        let key = registry.bind_imported(IterOp::IterNext, &kind, "shrew_range_next");
        assert_eq!(registry.entry_key(&IterOp::IterNext, &kind), Some(key));
        assert_eq!(registry.imported_key("shrew_range_next"), Some(key));
        assert!(registry.is_imported(key));
    }
}
