//! Smoke test: verify corosensei links and the generator handle drives through
//! its resume procedure exactly like compiled code would.

use corosensei::{Coroutine, CoroutineResult};
use shrew_runtime::coroutine::shrew_generator_resume;
use shrew_runtime::{GeneratorHandle, STATUS_OK, STATUS_STOP_ITERATION};

#[test]
fn coroutine_basic_yield() {
    let mut coro = Coroutine::new(|yielder, input: i32| {
        let next = yielder.suspend(input * 2);
        let next2 = yielder.suspend(next * 3);
        next2 + 1
    });

    match coro.resume(5) {
        CoroutineResult::Yield(val) => assert_eq!(val, 10),
        CoroutineResult::Return(_) => panic!("expected yield"),
    }

    match coro.resume(4) {
        CoroutineResult::Yield(val) => assert_eq!(val, 12),
        CoroutineResult::Return(_) => panic!("expected yield"),
    }

    match coro.resume(99) {
        CoroutineResult::Yield(_) => panic!("expected return"),
        CoroutineResult::Return(val) => assert_eq!(val, 100),
    }
}

#[test]
fn generator_handle_through_resume_procedure() {
    let mut generator = GeneratorHandle::new(|yielder| {
        let mut a = 0i64;
        let mut b = 1i64;
        for _ in 0..5 {
            yielder.suspend(a);
            (a, b) = (b, a + b);
        }
        Ok(())
    });
    let raw = generator.as_raw() as *mut GeneratorHandle;

    let mut seen = Vec::new();
    let mut out: i64 = 0;
    loop {
        let status = shrew_generator_resume(raw, &mut out as *mut i64 as *mut u8);
        if status == STATUS_STOP_ITERATION {
            break;
        }
        assert_eq!(status, STATUS_OK);
        seen.push(out);
    }
    assert_eq!(seen, vec![0, 1, 1, 2, 3]);
}
