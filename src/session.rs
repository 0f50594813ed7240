//! # Session — signal flags and the periodic checkpoint timer
//!
//! Two monotone flags, set only by async-signal-safe handlers and cleared
//! only by the checkpoint operation: `checkpoint_alarm` (periodic or
//! virtual-time alarm fired; checkpoint and continue) and
//! `checkpoint_and_end` (interrupt or hangup received; checkpoint and
//! exit). A third flag records that an unexpected signal reached the
//! handler, which the driver treats as fatal.
//!
//! **Grounding**: this crate has no direct teacher analogue (the teacher's
//! searches are cooperative only via `CoordinationClient::is_stop_requested`
//! polling an HTTP/Postgres coordinator, never OS signals), so this module
//! is grounded on the re-architecture note in spec.md §9: "process-wide
//! mutable statics ... encapsulate as a single long-lived session object
//! owned by the driver. Signal handlers receive only the address of the
//! flags sub-object." Because `sigaction` handlers in this process model
//! take no context pointer, the flags object is leaked once at setup and
//! its address stored in a module-private atomic pointer, set exactly once
//! and never mutated again — the one exception to "no process-wide statics"
//! the signal ABI forces on any implementation.

use libc::{c_int, itimerval, timeval};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

/// Shared signal state. Handlers only ever call `store`/`fetch_add` on these
/// atomics — no allocation, no locks, no big-integer work.
#[derive(Default)]
pub struct SignalFlags {
    pub checkpoint_alarm: AtomicU32,
    pub checkpoint_and_end: AtomicU32,
    pub unexpected_signal: AtomicBool,
}

impl SignalFlags {
    pub fn checkpoint_alarm_set(&self) -> bool {
        self.checkpoint_alarm.load(Ordering::SeqCst) != 0
    }

    pub fn checkpoint_and_end_set(&self) -> bool {
        self.checkpoint_and_end.load(Ordering::SeqCst) != 0
    }

    pub fn clear_checkpoint_alarm(&self) {
        self.checkpoint_alarm.store(0, Ordering::SeqCst);
    }
}

static FLAGS_PTR: AtomicPtr<SignalFlags> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn handle_signal(signum: c_int) {
    let ptr = FLAGS_PTR.load(Ordering::SeqCst);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was set exactly once in `install`, points at a leaked
    // (hence 'static, never-freed) `SignalFlags`, and is never mutated
    // again — reading through it from a signal handler is sound.
    let flags = unsafe { &*ptr };
    match signum {
        libc::SIGALRM | libc::SIGVTALRM => {
            flags.checkpoint_alarm.store(1, Ordering::SeqCst);
        }
        libc::SIGINT | libc::SIGHUP => {
            flags.checkpoint_and_end.store(1, Ordering::SeqCst);
        }
        _ => {
            flags.unexpected_signal.store(true, Ordering::SeqCst);
        }
    }
}

/// Install handlers for `{SIGALRM, SIGVTALRM, SIGINT, SIGHUP}` and return a
/// `'static` reference to the flags they mutate. Must be called exactly
/// once per process.
pub fn install() -> &'static SignalFlags {
    let flags: &'static SignalFlags = Box::leak(Box::new(SignalFlags::default()));
    FLAGS_PTR.store(flags as *const _ as *mut _, Ordering::SeqCst);

    for &sig in &[libc::SIGALRM, libc::SIGVTALRM, libc::SIGINT, libc::SIGHUP] {
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handle_signal as usize;
            libc::sigemptyset(&mut sa.sa_mask);
            sa.sa_flags = 0;
            libc::sigaction(sig, &sa, std::ptr::null_mut());
        }
    }

    flags
}

/// Arm (or disarm) the virtual-time interval timer per spec.md §4.4:
/// `chkpt_secs > 0` arms a periodic `SIGVTALRM` every `chkpt_secs` seconds;
/// `chkpt_secs <= 0` disarms it (checkpointing every term, or only
/// on-demand, is handled by the driver's index-based predicate instead).
pub fn arm_virtual_timer(chkpt_secs: i64) {
    if chkpt_secs <= 0 {
        disarm_virtual_timer();
        return;
    }
    let interval = timeval {
        tv_sec: chkpt_secs,
        tv_usec: 0,
    };
    let it = itimerval {
        it_interval: interval,
        it_value: interval,
    };
    unsafe {
        libc::setitimer(libc::ITIMER_VIRTUAL, &it, std::ptr::null_mut());
    }
}

pub fn disarm_virtual_timer() {
    let zero = timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let it = itimerval {
        it_interval: zero,
        it_value: zero,
    };
    unsafe {
        libc::setitimer(libc::ITIMER_VIRTUAL, &it, std::ptr::null_mut());
    }
}
