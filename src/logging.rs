//! Opt-in tracing subscriber setup for host applications.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install a file-backed subscriber filtered by `RUST_LOG`.
///
/// Returns the guard that flushes the non-blocking writer; keep it alive for
/// the life of the process. Returns `None` when a subscriber is already
/// installed, so embedding applications keep their own setup.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
  let appender = tracing_appender::rolling::daily(log_dir, "bistro.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let installed = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .is_ok();

  installed.then_some(guard)
}
