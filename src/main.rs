//! vodr, the command-line VPN-over-DNS reassembler.

#![warn(deprecated_in_future)]
#![warn(future_incompatible)]
#![warn(missing_copy_implementations)]
#![warn(missing_docs)]
#![warn(nonstandard_style)]
#![warn(rust_2018_compatibility)]
#![warn(rust_2018_idioms)]
#![warn(single_use_lifetimes)]
#![warn(trivial_casts, trivial_numeric_casts)]
#![warn(unused)]

#![deny(unsafe_code)]


use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process::exit;

use log::*;

use tunnel::{DnsRecord, DumpError, TicketDatabase};

mod colours;
mod output;
mod table;

mod options;
use self::options::*;


/// Configures logging, parses the command-line options, and handles any
/// errors before handing control over to the conversion itself.
fn main() {
    configure_logger();

    match Options::getopts(env::args_os().skip(1)) {
        OptionsResult::Ok(options) => {
            info!("Running with options -> {:#?}", options);
            exit(run(options));
        }

        OptionsResult::Help(help_reason) => {
            print!("{}", USAGE);

            if help_reason == HelpReason::NoSource {
                exit(exits::OPTIONS_ERROR);
            }
            else {
                exit(exits::SUCCESS);
            }
        }

        OptionsResult::Version => {
            println!("vodr {}", env!("CARGO_PKG_VERSION"));
            exit(exits::SUCCESS);
        }

        OptionsResult::InvalidOptionsFormat(oe) => {
            eprintln!("Invalid options: {}", oe);
            exit(exits::OPTIONS_ERROR);
        }

        OptionsResult::InvalidOptions(why) => {
            eprintln!("{}", why);
            exit(exits::OPTIONS_ERROR);
        }
    }
}


/// Checks the `VODR_DEBUG` environment variable, enabling debug logging
/// if it’s non-empty.
fn configure_logger() {
    let present = match env::var_os("VODR_DEBUG") {
        Some(debug)  => ! debug.is_empty(),
        None         => false,
    };

    let mut logs = env_logger::Builder::new();
    if present {
        let _ = logs.filter(None, log::LevelFilter::Debug);
    }
    else {
        let _ = logs.filter(None, log::LevelFilter::Off);
    }

    logs.init();
}


/// Reads records from the source, builds the ticket database, and writes
/// it to the destination in the chosen format.
fn run(options: Options) -> i32 {
    let Options { source, dest, suffix, incomplete, format } = options;

    let mut records = Vec::new();
    let loaded = match &source {
        Source::Stdin => {
            info!("Reading DNS records from standard input");
            load_records(io::stdin().lock(), &mut records)
        }
        Source::File(path) => {
            info!("Reading DNS records from {:?}", path);
            match File::open(path) {
                Ok(file) => load_records(BufReader::new(file), &mut records),
                Err(e) => {
                    eprintln!("vodr: Error opening {}: {}", path.display(), e);
                    return exits::DATA_ERROR;
                }
            }
        }
    };

    if loaded.is_err() {
        eprintln!("vodr: Error reading {}", source);
        return exits::DATA_ERROR;
    }

    debug!("Loaded {} records", records.len());

    let mut db = match &suffix {
        Some(suffix) => TicketDatabase::with_suffix(suffix),
        None         => TicketDatabase::new(),
    };

    if let Err(e) = db.build_from_records(records) {
        eprintln!("vodr: {}", output::build_error_message(&e));
        return exits::DATA_ERROR;
    }

    info!("Reassembled {} tickets", db.len());

    let written = match &dest {
        Dest::Stdout => {
            let stdout = io::stdout();
            format.write(&db, incomplete, &mut stdout.lock())
        }
        Dest::File(path) => {
            match File::create(path) {
                Ok(mut file) => format.write(&db, incomplete, &mut file),
                Err(e) => {
                    eprintln!("vodr: Error creating {}: {}", path.display(), e);
                    return exits::DATA_ERROR;
                }
            }
        }
    };

    if let Err(e) = written {
        eprintln!("vodr: Error writing {}: {}", dest, e);
        return exits::DATA_ERROR;
    }

    exits::SUCCESS
}


/// Drains the dump into `records`, skipping lines that do not hold a
/// record and stopping only on IO failure.
fn load_records<R: io::BufRead>(source: R, records: &mut Vec<DnsRecord>) -> Result<(), DumpError> {
    for result in tunnel::read_dump(source) {
        match result {
            Ok(record) => {
                records.push(record);
            }
            Err(DumpError::BadLine { number }) => {
                warn!("Skipping malformed dump line {}", number);
            }
            Err(e @ DumpError::Io) => {
                return Err(e);
            }
        }
    }

    Ok(())
}


static USAGE: &str = "\
Usage:
  vodr [options] SOURCE [DEST]

Reassembles the ticket exchanges a VPN-over-DNS client smuggled through
the queries in a DNS dump. SOURCE is a text dump of `FQDN CLASS TYPE
VALUE` lines; pass `-` to read standard input. DEST defaults to `-`,
standard output.

Input options:
      --src-type TYPE    Type of the source data (auto, dns-dump)
      --suffix DOMAIN    Tunnel domain the queries hide under

Output options:
      --dest-type TYPE   Type of the destination data (auto, json, summary)
  -J, --json             Shorthand for '--dest-type json'
      --incomplete       Include partially reassembled buffers in the output
      --colour WHEN      When to use terminal colours (always, auto, never)

Meta options:
  -V, --version          Print version information
  -?, --help             Print list of command-line options
";


mod exits {

    /// Exit code for when everything turns out OK.
    pub const SUCCESS: i32 = 0;

    /// Exit code for when the source could not be read, did not survive
    /// reassembly, or the destination could not be written.
    pub const DATA_ERROR: i32 = 1;

    /// Exit code for when the command-line options are invalid.
    pub const OPTIONS_ERROR: i32 = 3;
}
