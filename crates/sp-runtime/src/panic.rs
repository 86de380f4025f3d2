//! Grounded on `kumo-server-common::panic`, minus the `SIGQUIT`
//! core-dump request and `backtrace` crate use — this pipeline's binaries
//! are supervised by a restart loop (spec §4.7, §9) rather than expected
//! to leave a core behind for offline debugging, and `backtrace` is not
//! part of the teacher's stack carried into this workspace.

/// Installs a panic hook that logs the panic through `tracing` (so it
/// reaches the configured log file/filter) before running the default
/// hook, which still prints to stderr and preserves normal unwind
/// behavior.
pub fn register_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic payload>");

        match info.location() {
            Some(loc) => {
                tracing::error!(
                    "panic at {}:{}:{} - {}",
                    loc.file(),
                    loc.line(),
                    loc.column(),
                    payload
                );
            }
            None => tracing::error!("panic - {}", payload),
        }

        default_hook(info);
    }));
}
