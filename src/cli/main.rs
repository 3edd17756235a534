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

use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::filter::Filter;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Check the configuration file and load the keys it names.
    ///
    /// Exits successfully if the filter could start with this configuration.
    CheckConfig(ConfigOptions),
    Process(ProcessSubcommand),
}

#[derive(StructOpt)]
pub(super) struct ConfigOptions {
    /// Path to the configuration file.
    #[structopt(
        short,
        long,
        parse(from_os_str),
        default_value = "/etc/arcfilter/arcfilter.toml"
    )]
    pub(super) config: PathBuf,
}

/// Run a single message through the filter.
///
/// The message is read from the given file or standard input. The header
/// fields the mail server should prepend are printed to standard output,
/// topmost first. If the message is rejected, the reason is printed to
/// standard error and the exit status is EX_DATAERR.
///
/// Bare LF line endings in the input are converted to CRLF.
#[derive(StructOpt)]
pub(super) struct ProcessSubcommand {
    #[structopt(flatten)]
    pub(super) common: ConfigOptions,

    /// The IP address of the SMTP client the message came from. Omit for
    /// locally submitted mail.
    #[structopt(long)]
    pub(super) peer: Option<std::net::IpAddr>,

    /// The queue ID the mail server assigned to the message.
    #[structopt(long)]
    pub(super) queue_id: Option<String>,

    /// The message to process. "-" reads from standard input.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) message: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::CheckConfig(options) => {
            init_logging(&options.config);
            let filter = load_filter(&options.config);
            println!(
                "{}: OK (authserv-id {})",
                options.config.display(),
                filter.config().authserv_id,
            );
        },
        Command::Process(cmd) => {
            init_logging(&cmd.common.config);
            let filter = load_filter(&cmd.common.config);
            super::process::process(&filter, cmd);
        },
    }
}

/// Sets up logging before anything is loaded, so that warnings about the
/// configuration and keys are not lost.
fn init_logging(config_path: &Path) {
    if let Err(e) = crate::support::logging::init(config_dir(config_path)) {
        die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
    }
}

/// The directory searched for `logging.toml`.
fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn load_filter(path: &Path) -> Filter {
    let config = match SystemConfig::load(path) {
        Ok(config) => config,
        Err(e) => die!(EX_CONFIG, "{}", e),
    };

    match Filter::from_config(config) {
        Ok(filter) => filter,
        Err(e) => die!(EX_CONFIG, "{}", e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn logging_config_next_to_config_file() {
        assert_eq!(
            Path::new("/etc/arcfilter"),
            config_dir(Path::new("/etc/arcfilter/arcfilter.toml")),
        );
        assert_eq!(Path::new("."), config_dir(Path::new("arcfilter.toml")));
    }

    #[test]
    fn parse_process_command() {
        let cmd = Command::from_iter_safe(&[
            "arcfilter",
            "process",
            "-c",
            "/tmp/arcfilter.toml",
            "--peer",
            "192.0.2.1",
            "--queue-id",
            "4BQ1x2",
        ])
        .unwrap();
        let Command::Process(cmd) = cmd else {
            panic!("expected process command");
        };
        assert_eq!(Path::new("/tmp/arcfilter.toml"), cmd.common.config);
        assert_eq!(Some("192.0.2.1".parse().unwrap()), cmd.peer);
        assert_eq!(Some("4BQ1x2".to_owned()), cmd.queue_id);
        assert_eq!(Path::new("-"), cmd.message);

        assert!(Command::from_iter_safe(&[
            "arcfilter",
            "process",
            "--peer",
            "not-an-ip",
        ])
        .is_err());
    }
}
