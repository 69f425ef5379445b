//! Logging initializer for this crate's own unit tests.
//!
//! The library itself only ever calls the `log` facade macros (`log::debug!`, …) — it never
//! installs a logger; a library silently installing a global logger on another crate's
//! behalf is the kind of surprise the `log` crate's own documentation warns against. This
//! module exists only under `cfg(test)`, since `env_logger` is a dev-dependency; each unit
//! test module calls [`init`] as its first statement so `RUST_LOG` works when running a
//! single test. `tests/common/mod.rs` calls `env_logger::try_init()` directly the same way,
//! since the integration suite is a separate crate and can't reach this private module.
pub fn init() {
    let _ = env_logger::try_init();
}
