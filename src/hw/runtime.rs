//! Process-wide hardware runtime state.
//!
//! Backend libraries want exactly one global initialization and one global
//! teardown no matter how many stage instances come and go. Every stage that
//! enables hardware holds an [`HwRuntimeGuard`]: the first acquire performs
//! initialization, each release decrements the use-count, and the last
//! release tears down.

use lazy_static::lazy_static;
use parking_lot::Mutex;

struct RuntimeState {
    users: u32,
}

lazy_static! {
    static ref STATE: Mutex<RuntimeState> = Mutex::new(RuntimeState { users: 0 });
}

/// Keeps the hardware runtime alive while held. Obtained from [`acquire`];
/// dropping the guard releases one use.
#[derive(Debug)]
pub struct HwRuntimeGuard {
    _priv: (),
}

/// Acquire one use of the hardware runtime.
pub fn acquire() -> HwRuntimeGuard {
    let mut state = STATE.lock();
    state.users += 1;
    if state.users == 1 {
        log::debug!("hardware runtime initialized");
    }
    HwRuntimeGuard { _priv: () }
}

/// Number of live runtime users.
pub fn active_users() -> u32 {
    STATE.lock().users
}

impl Drop for HwRuntimeGuard {
    fn drop(&mut self) {
        let mut state = STATE.lock();
        state.users -= 1;
        if state.users == 0 {
            log::debug!("hardware runtime torn down");
        }
    }
}
