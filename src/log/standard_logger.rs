use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Config;

use crate::log::LogConfiguration;

/// ISO 8601 timestamp, colored level, then the emitting module.
const LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%SZ)} {h({l})} {t} - {m}{n}";

impl LogConfiguration {
    /// Builds a console logger from the current levels and installs it, or swaps it into the
    /// logger installed earlier.
    pub(in crate::log) fn set_config(&mut self) {
        let console = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build();
        let loggers = self
            .module_levels
            .iter()
            .map(|(module, &level)| Logger::builder().build(module.clone(), level));
        let config = Config::builder()
            .appender(Appender::builder().build("console", Box::new(console)))
            .loggers(loggers)
            .build(Root::builder().appender("console").build(self.level));
        let config = match config {
            Ok(config) => config,
            Err(errors) => {
                eprintln!("invalid logger configuration: {errors}");
                log::set_max_level(self.level);
                return;
            }
        };

        if let Some(handle) = &self.root_handle {
            handle.set_config(config);
            return;
        }
        match log4rs::init_config(config) {
            Ok(handle) => self.root_handle = Some(handle),
            // Another logger was installed first; it stays in charge.
            Err(e) => {
                eprintln!("could not install the kernel logger: {e}");
                log::set_max_level(self.level);
            }
        }
    }
}
