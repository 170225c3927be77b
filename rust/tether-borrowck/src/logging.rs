//! Logging setup for the borrow checker.
//!
//! The pass only emits through the `log` facade; embedders pick a backend.
//! These helpers wire up `env_logger` for binaries, benches and tests.
//!
//! - `debug!` - one line per function analysed and per diagnostic recorded
//! - `trace!` - scope entry/exit, borrow creation/release, branch merges, loop passes
//! - `warn!` - malformed input the pass tolerates (unbalanced scopes, unknown names)
//!
//! ```bash
//! RUST_LOG=tether_borrowck=debug cargo test
//! RUST_LOG=tether_borrowck::compiler::lifetimes=trace cargo bench
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize with the default level (Warn). Later calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize from `RUST_LOG`, falling back to `warn`.
pub fn init_from_env() {
    INIT.call_once(|| {
        Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Test-friendly logger: captured by the harness, quiet unless `RUST_LOG` is set.
pub fn init_test() {
    let _ = env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}
