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

use std::fs;
use std::io::{self, Read, Write};

use chrono::prelude::*;
use log::error;

use super::main::ProcessSubcommand;
use crate::filter::{Connection, Disposition, Filter};
use crate::mime::header::{fix_crlf, parse_header_block, split_message};
use crate::support::sysexits::*;

pub(super) fn process(filter: &Filter, cmd: ProcessSubcommand) {
    let mut message = Vec::new();
    let read = if "-" == cmd.message.as_os_str() {
        io::stdin().lock().read_to_end(&mut message)
    } else {
        fs::File::open(&cmd.message)
            .and_then(|mut f| f.read_to_end(&mut message))
    };
    if let Err(e) = read {
        die!(EX_NOINPUT, "Failed to read {}: {}", cmd.message.display(), e);
    }

    let message = fix_crlf(&message);
    let (header_block, body) = split_message(&message);

    let mut session = filter.session(Connection {
        peer: cmd.peer,
        queue_id: cmd.queue_id,
    });
    for field in parse_header_block(header_block) {
        if let Err(e) = session.header(&field.name, &field.value) {
            die!(EX_DATAERR, "Message rejected: {}", e);
        }
    }
    if let Err(e) = session.write_all(body) {
        die!(EX_IOERR, "Failed to process message body: {}", e);
    }

    match session.finish(Utc::now()) {
        Ok(Disposition::Accept(prepend)) => {
            let mut stdout = io::stdout().lock();
            for field in prepend.iter().rev() {
                if let Err(e) =
                    writeln!(stdout, "{}: {}", field.name, field.value)
                {
                    die!(EX_IOERR, "Failed to write output: {}", e);
                }
            }
        },
        Ok(Disposition::Skip) => (),
        Ok(Disposition::Reject(reason)) => {
            die!(EX_DATAERR, "Message rejected: {}", reason)
        },
        Err(e) => {
            error!("Failed to process message: {}", e);
            die!(EX_SOFTWARE, "Failed to process message: {}", e)
        },
    }
}
