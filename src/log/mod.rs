//! Logging for the kernel and the modules it hosts.
//!
//! Everything logs through the `log` facade, so the usual macros are re-exported here:
//!
//! ```rust
//! use nucleus::info;
//!
//! pub fn grow_population() {
//!     info!("Adding entities.");
//! }
//! ```
//!
//! Nothing is printed until a level is chosen. A runner picks it up from `--log-level`, and
//! `--log-filter <module>=<level>` (repeatable) overrides the level for one module path, so a
//! noisy run can keep the scheduler quiet while tracing a single module:
//!
//! ```text
//! model --log-level info --log-filter nucleus::context=warn --log-filter nucleus::properties=trace
//! ```
//!
//! The same settings are available in code through [`set_log_level`] and [`set_module_filters`].
#[cfg(all(not(target_arch = "wasm32"), feature = "logging"))]
mod standard_logger;

#[cfg(any(target_arch = "wasm32", not(feature = "logging")))]
mod null_logger;

pub use log::{debug, error, info, trace, warn, LevelFilter};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, MutexGuard};

#[cfg(all(not(target_arch = "wasm32"), feature = "logging"))]
use log4rs::Handle;

/// The scheduler traces every plan it runs; keep that out of the way unless asked for.
const SCHEDULER_FILTER: (&str, LevelFilter) = ("nucleus::context", LevelFilter::Debug);

static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// A level override for every target under one module path, written `module=level`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleFilter {
    pub module: String,
    pub level: LevelFilter,
}

impl ModuleFilter {
    pub fn new(module: impl Into<String>, level: LevelFilter) -> ModuleFilter {
        ModuleFilter {
            module: module.into(),
            level,
        }
    }
}

impl FromStr for ModuleFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<ModuleFilter, String> {
        let (module, level) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <module>=<level>, got {s:?}"))?;
        let module = module.trim();
        if module.is_empty() {
            return Err(format!("missing module path in {s:?}"));
        }
        let level = LevelFilter::from_str(level.trim())
            .map_err(|_| format!("invalid log level in {s:?}"))?;
        Ok(ModuleFilter::new(module, level))
    }
}

impl fmt::Display for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.module, self.level)
    }
}

/// The installed logging state. There is one per process, reached through the free functions
/// below.
#[derive(Debug)]
pub(in crate::log) struct LogConfiguration {
    /// Level for targets without a module filter. `Off` silences everything.
    pub(in crate::log) level: LevelFilter,
    /// Module path to level, ordered so the built logger config is stable.
    pub(in crate::log) module_levels: BTreeMap<String, LevelFilter>,

    #[cfg(all(not(target_arch = "wasm32"), feature = "logging"))]
    root_handle: Option<Handle>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        let (module, level) = SCHEDULER_FILTER;
        Self {
            level: LevelFilter::Off,
            module_levels: BTreeMap::from([(module.to_string(), level)]),

            #[cfg(all(not(target_arch = "wasm32"), feature = "logging"))]
            root_handle: None,
        }
    }
}

impl LogConfiguration {
    fn set_level(&mut self, level: LevelFilter) {
        if self.level != level {
            self.level = level;
            self.set_config();
        }
    }

    fn apply_filters(&mut self, filters: &[ModuleFilter]) {
        let mut changed = false;
        for filter in filters {
            let previous = self.module_levels.insert(filter.module.clone(), filter.level);
            changed |= previous != Some(filter.level);
        }
        if changed {
            self.set_config();
        }
    }
}

/// Sets the level for every target without a module filter. `LevelFilter::Off` disables logging.
pub fn set_log_level(level: LevelFilter) {
    log_configuration().set_level(level);
}

/// Installs the given module filters, replacing any earlier filter for the same module path.
/// The logger is rebuilt at most once per call.
pub fn set_module_filters(filters: &[ModuleFilter]) {
    log_configuration().apply_filters(filters);
}

fn log_configuration() -> MutexGuard<'static, LogConfiguration> {
    // The configuration stays consistent even if a holder panicked.
    LOG_CONFIGURATION
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// The level currently configured for `module`, if it has a filter of its own.
#[cfg(test)]
pub(crate) fn module_level(module: &str) -> Option<LevelFilter> {
    log_configuration().module_levels.get(module).copied()
}

/// Serializes tests that touch the process-wide logger.
#[cfg(test)]
pub(crate) static LOG_TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(Mutex::default);
