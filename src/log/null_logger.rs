//! Used when the `logging` feature is off or on wasm: nothing is printed, but the facade still
//! honors the configured level.

use crate::log::LogConfiguration;

impl LogConfiguration {
    pub(in crate::log) fn set_config(&mut self) {
        log::set_max_level(self.level);
    }
}
