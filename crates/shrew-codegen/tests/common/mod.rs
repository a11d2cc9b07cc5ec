// Shared helpers for shrew-codegen integration tests.
#![allow(dead_code)]

use shrew_codegen::{
    CodegenResult, CompiledIterators, ExternalSymbol, IterCompiler, JitOptions, YieldValue,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Install a test-writer subscriber when `SHREW_LOG` is set.
pub fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_env("SHREW_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    }
}

pub fn compile(request: impl FnOnce(&mut IterCompiler) -> CodegenResult<()>) -> CompiledIterators {
    compile_with(&[], request)
}

pub fn compile_with(
    externals: &[ExternalSymbol],
    request: impl FnOnce(&mut IterCompiler) -> CodegenResult<()>,
) -> CompiledIterators {
    init_tracing();
    let mut compiler =
        IterCompiler::with_externals(JitOptions::debug(), externals).expect("create compiler");
    request(&mut compiler).expect("request entry points");
    compiler.finish().expect("finish compilation")
}

pub fn ints(values: &[YieldValue]) -> Vec<i64> {
    values
        .iter()
        .map(|v| v.as_i64().expect("i64 value"))
        .collect()
}

pub fn pairs(values: &[YieldValue]) -> Vec<(i64, i64)> {
    values
        .iter()
        .map(|v| {
            let items = v.as_tuple().expect("tuple value");
            (
                items[0].as_i64().expect("i64 first"),
                items[1].as_i64().expect("i64 second"),
            )
        })
        .collect()
}
