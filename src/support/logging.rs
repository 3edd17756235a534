//-
// Copyright (c) 2024, the arcfilter authors
//
// This file is part of arcfilter.
//
// arcfilter is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// arcfilter is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// arcfilter. If not, see <http://www.gnu.org/licenses/>.

//! Selection of the logging backend.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// A log4rs configuration that writes everything at `level` or above to
/// standard error.
pub fn stderr_config(level: LevelFilter) -> Result<Config, String> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();

    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| e.to_string())
}

/// Sets up logging for a process whose configuration lives in `config_dir`.
///
/// Interactive runs log to standard error. Otherwise `logging.toml` in
/// `config_dir` is used if it exists, and syslog if not.
pub fn init(config_dir: &Path) -> Result<(), String> {
    if Ok(true) == nix::unistd::isatty(2) {
        return log4rs::init_config(stderr_config(LevelFilter::Info)?)
            .map(|_| ())
            .map_err(|e| e.to_string());
    }

    // log4rs has no usable syslog appender, so it's one or the other.
    let log_config_file = config_dir.join("logging.toml");
    if log_config_file.is_file() {
        log4rs::init_file(
            &log_config_file,
            log4rs::config::Deserializers::new(),
        )
        .map_err(|e| format!("{}: {e}", log_config_file.display()))
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = syslog::unix(formatter)
            .map_err(|e| format!("Failed to connect to syslog: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stderr_config_builds() {
        let config = stderr_config(LevelFilter::Warn).unwrap();
        assert_eq!(LevelFilter::Warn, config.root().level());
        assert_eq!(1, config.appenders().len());
    }
}
