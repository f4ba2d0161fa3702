use std::{
    any::Any,
    backtrace::Backtrace,
    panic::{PanicHookInfo, take_hook},
};

/// Installs a global panic hook that routes panics through `tracing`, so they
/// land in the daily log file next to the job that caused them.
///
/// Job panics are caught by the worker, which only sees the payload; the hook
/// adds the location and (with `RUST_BACKTRACE` set) a backtrace.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let location = panic_info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_else(|| "<unknown>".to_string());

            tracing::error!(
                target: "queued_local::panic",
                location = %location,
                "panic: {}\n{}",
                payload_message(panic_info.payload()),
                Backtrace::capture()
            );
        }));

        previous_hook(panic_info);
    }));
}

/// Text of a panic payload, for the two payload types `panic!` produces.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "<non-string panic payload>".to_string()
}
