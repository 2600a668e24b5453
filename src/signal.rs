use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Installs the Ctrl-C handler. Raising the returned flag cancels every
/// job created with it.
pub fn setup_shutdown_signal() -> anyhow::Result<Arc<AtomicBool>> {
    let shutdown_signal = Arc::new(AtomicBool::new(false));
    let signal_clone = Arc::clone(&shutdown_signal);

    ctrlc::set_handler(move || {
        signal_clone.store(true, Ordering::SeqCst);
        warn!("Interrupt received, cancelling running jobs");
    })?;

    Ok(shutdown_signal)
}

/// Returns whether an interrupt arrived, and re-arms the flag for the next task.
pub fn take_shutdown_signal(shutdown_signal: &AtomicBool) -> bool {
    shutdown_signal.swap(false, Ordering::SeqCst)
}
