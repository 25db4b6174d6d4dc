//! Logging prelude and subscriber setup.
//!
//! Re-exports the common tracing macros so modules can write
//! `use crate::logging::*;` and log without repeating the `tracing::`
//! prefix.
//!
//! The default filter keeps the operation layer at `info` while silencing
//! the chatty storage internals (page fan-out, per-statement metadata
//! calls) unless explicitly requested:
//!
//! ```bash
//! RUST_LOG=debug                                  # everything
//! RUST_LOG=tierfs::tiering=trace                  # placement decisions
//! RUST_LOG=tierfs::metadata=debug,tierfs=info     # transaction lifecycle
//! ```

pub use tracing::{debug, error, info, trace, warn};

/// Filter applied when `RUST_LOG` is unset: operations and tier movement
/// at `info`, page and metadata internals only when something is wrong.
const DEFAULT_DIRECTIVES: &str = "info,tierfs::pages=warn,tierfs::metadata=warn";

/// Initialize the stderr subscriber with the crate's default directives.
///
/// `RUST_LOG` takes precedence when set. Safe to call more than once;
/// later calls are no-ops, which keeps test binaries that share a process
/// from panicking on double initialization.
pub fn init_tracing() {
	init_tracing_with(DEFAULT_DIRECTIVES);
}

/// Initialize with explicit fallback directives instead of the default.
pub fn init_tracing_with(directives: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init()
		.ok();
}


// vim: ts=4
