use std::sync::atomic::{AtomicI32, Ordering};

static DELIVERED: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    DELIVERED.store(signo, Ordering::SeqCst);
}

/// Installs SIGINT/SIGTERM handlers that record the signal instead of
/// killing the process. Poll loops check `delivered()` and unwind through
/// the normal error path so the cleanup guard still runs.
pub fn install() {
    let handler = record_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

pub fn delivered() -> Option<i32> {
    match DELIVERED.load(Ordering::SeqCst) {
        0 => None,
        signo => Some(signo),
    }
}

/// Shell convention for a signal-driven exit.
pub fn exit_code(signal: i32) -> i32 {
    128 + signal
}

#[cfg(test)]
pub(crate) fn clear() {
    DELIVERED.store(0, Ordering::SeqCst);
}
