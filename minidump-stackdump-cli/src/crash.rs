// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Intentional crashes, for exercising crash reporting.

use std::alloc::{handle_alloc_error, Layout};
use std::hint::black_box;
use std::ops::Deref;
use std::panic;
use std::sync::Arc;
use std::thread;

use clap::ValueEnum;
use tracing::{error, info};

/// The kinds of crash that can be triggered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CrashKind {
    /// Read through a null pointer.
    NullDereference,
    /// Recurse until the stack runs out.
    StackOverflow,
    /// Divide an integer by zero.
    DivideByZero,
    /// Fail an allocation.
    OutOfMemory,
    /// Abort the process.
    Abort,
}

/// Crash the process in the way described by `kind`.
pub fn trigger(kind: CrashKind) -> ! {
    info!("triggering crash: {:?}", kind);
    match kind {
        CrashKind::NullDereference => null_dereference(),
        CrashKind::StackOverflow => {
            let depth = recurse(black_box(0));
            unreachable!("recursion returned at depth {}", depth)
        }
        CrashKind::DivideByZero => {
            let quotient = black_box(1u32) / black_box(0u32);
            unreachable!("1 / 0 = {}", quotient)
        }
        CrashKind::OutOfMemory => {
            let layout = Layout::from_size_align(isize::MAX as usize, 1)
                .unwrap_or_else(|_| Layout::new::<u8>());
            handle_alloc_error(layout)
        }
        CrashKind::Abort => std::process::abort(),
    }
}

fn null_dereference() -> ! {
    let ptr: *const u32 = black_box(std::ptr::null());
    // SAFETY: none, this is the crash.
    let value = unsafe { std::ptr::read_volatile(ptr) };
    unreachable!("read {} through a null pointer", value)
}

#[allow(unconditional_recursion)]
fn recurse(depth: u64) -> u64 {
    let frame = black_box([depth; 64]);
    recurse(depth + 1) + frame[0]
}

type PanicHook = dyn Fn(&panic::PanicHookInfo<'_>) + Sync + Send + 'static;

/// Logs panics until dropped.
///
/// Installing chains onto whatever panic hook was already set. Dropping the
/// handler puts that hook back, unless the thread is already panicking.
pub struct CrashHandler {
    previous: Arc<PanicHook>,
}

impl CrashHandler {
    pub fn install() -> CrashHandler {
        let previous: Arc<PanicHook> = Arc::from(panic::take_hook());
        let chained = Arc::clone(&previous);
        panic::set_hook(Box::new(move |panic_info| {
            let (filename, line) = panic_info
                .location()
                .map(|loc| (loc.file(), loc.line()))
                .unwrap_or(("<unknown>", 0));
            let cause = panic_info
                .payload()
                .downcast_ref::<String>()
                .map(String::deref)
                .unwrap_or_else(|| {
                    panic_info
                        .payload()
                        .downcast_ref::<&str>()
                        .copied()
                        .unwrap_or("<cause unknown>")
                });
            error!("Panic - A panic occurred at {}:{}: {}", filename, line, cause);
            chained(panic_info);
        }));
        CrashHandler { previous }
    }
}

impl Drop for CrashHandler {
    fn drop(&mut self) {
        // The panic hook can't be changed while unwinding.
        if thread::panicking() {
            return;
        }
        let previous = Arc::clone(&self.previous);
        panic::set_hook(Box::new(move |panic_info| previous(panic_info)));
    }
}
