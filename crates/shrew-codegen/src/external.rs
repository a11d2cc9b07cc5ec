// src/codegen/external.rs
//
// Iterables and iterators implemented outside the lowering. Their entry
// points are imported symbols; nothing is lowered for them except the
// generic getiter and for_each.

use crate::function_registry::IterOp;
use crate::protocol::{EntryPoint, IterProtocol};
use crate::runtime_registry::{SigSpec, shapes};
use crate::types::{ExternalRole, ExternalType, IterKind};

impl IterProtocol for ExternalType {
    fn entry_point(&self, op: &IterOp) -> EntryPoint {
        match (&self.role, op) {
            (ExternalRole::Iterator { next_symbol, .. }, IterOp::IterNext) => {
                EntryPoint::Imported(next_symbol.clone())
            }
            (
                ExternalRole::Iterator {
                    release_symbol: Some(release),
                    ..
                },
                IterOp::Release,
            ) => EntryPoint::Imported(release.clone()),
            _ => EntryPoint::Unsupported,
        }
    }
}

/// Every symbol `kind` refers to, paired with the signature it is called with.
pub(crate) fn symbol_uses(kind: &IterKind) -> Vec<(&str, SigSpec)> {
    let mut out = Vec::new();
    collect_uses(kind, &mut out);
    out
}

fn collect_uses<'a>(kind: &'a IterKind, out: &mut Vec<(&'a str, SigSpec)>) {
    match kind {
        IterKind::Enumerate(e) => collect_uses(&e.source, out),
        IterKind::Zip(z) => {
            for source in &z.sources {
                collect_uses(source, out);
            }
        }
        IterKind::Generator(g) => out.push((&g.resume_symbol, shapes::ITERNEXT)),
        IterKind::External(ext) => collect_external_uses(ext, out),
    }
}

fn collect_external_uses<'a>(ext: &'a ExternalType, out: &mut Vec<(&'a str, SigSpec)>) {
    match &ext.role {
        ExternalRole::Iterator {
            next_symbol,
            release_symbol,
        } => {
            out.push((next_symbol, shapes::ITERNEXT));
            if let Some(release) = release_symbol {
                out.push((release, shapes::RELEASE));
            }
        }
        ExternalRole::Iterable {
            getiter_symbol,
            iterator,
        } => {
            out.push((getiter_symbol, shapes::GETITER));
            collect_external_uses(iterator, out);
        }
    }
}
