pub mod token_counter;

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::Usage;

/// Initialize the tracing subscriber with the configured log level
/// (SPEC_FULL §0.2). `"disabled"` installs no subscriber at all.
pub fn init_tracing(log_level: &str) {
    if log_level.eq_ignore_ascii_case("disabled") {
        return;
    }

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log token usage and duration for a completed request.
pub fn log_request_complete(model: &str, usage: &Usage, start_time: Instant) {
    token_counter::log_request_usage(model, usage, start_time.elapsed());
}
