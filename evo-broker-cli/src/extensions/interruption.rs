//! Interruption handler.

#[cfg(test)]
#[path = "../../tests/unit/extensions/interruption_test.rs"]
mod interruption_test;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

type StopFlags = Mutex<Vec<Weak<AtomicBool>>>;

static STOP_FLAGS: OnceLock<Result<Arc<StopFlags>, String>> = OnceLock::new();

/// Registers a cooperative stop flag which is raised on interruption signal. The handler is installed
/// once per process, flags dropped by their owners are forgotten.
pub fn register_interruption_flag(flag: &Arc<AtomicBool>) -> Result<(), String> {
    let flags = get_stop_flags()?;
    let mut flags = flags.lock().map_err(|_| "cannot access interruption flags".to_string())?;

    flags.retain(|flag| flag.strong_count() > 0);
    flags.push(Arc::downgrade(flag));

    Ok(())
}

fn get_stop_flags() -> Result<Arc<StopFlags>, String> {
    STOP_FLAGS
        .get_or_init(|| {
            let flags = Arc::new(StopFlags::default());

            ctrlc::set_handler({
                let flags = flags.clone();
                move || raise_flags(flags.as_ref())
            })
            .map(|_| flags)
            .map_err(|err| format!("cannot set interruption handler: '{err}'"))
        })
        .clone()
}

fn raise_flags(flags: &StopFlags) {
    if let Ok(flags) = flags.lock() {
        flags.iter().filter_map(Weak::upgrade).for_each(|flag| flag.store(true, Ordering::Release));
    }
}
