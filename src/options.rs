//! Command-line option parsing.

use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;

use log::*;

use crate::output::{OutputFormat, UseColours};


/// The command-line options used when running vodr.
#[derive(PartialEq, Debug)]
pub struct Options {

    /// Where the DNS dump is read from.
    pub source: Source,

    /// Where the reassembled database is written to.
    pub dest: Dest,

    /// Tunnel domain to watch for instead of the well-known one.
    pub suffix: Option<String>,

    /// Whether to include partially reassembled buffers in the output.
    pub incomplete: bool,

    /// How to format the output data.
    pub format: OutputFormat,
}

impl Options {

    /// Parses and interprets a set of options from the user’s
    /// command-line arguments.
    ///
    /// This returns an `Ok` set of options if successful and running
    /// normally, a `Help` or `Version` variant if one of those options is
    /// specified, or an error variant if there’s an invalid option or
    /// inconsistency within the options after they were parsed.
    #[allow(unused_results)]
    pub fn getopts<C>(args: C) -> OptionsResult
    where C: IntoIterator,
          C::Item: AsRef<OsStr>,
    {
        let mut opts = getopts::Options::new();

        // Input options
        opts.optopt ("",  "src-type",   "Type of the source data (auto, dns-dump)", "TYPE");
        opts.optopt ("",  "suffix",     "Tunnel domain the queries hide under", "DOMAIN");

        // Output options
        opts.optopt ("",  "dest-type",  "Type of the destination data (auto, json, summary)", "TYPE");
        opts.optflag("J", "json",       "Shorthand for '--dest-type json'");
        opts.optflag("",  "incomplete", "Include partially reassembled buffers in the output");
        opts.optopt ("",  "color",      "When to use terminal colors",  "WHEN");
        opts.optopt ("",  "colour",     "When to use terminal colours", "WHEN");

        // Meta options
        opts.optflag("V", "version",    "Print version information");
        opts.optflag("?", "help",       "Print list of command-line options");

        let matches = match opts.parse(args) {
            Ok(m)  => m,
            Err(e) => return OptionsResult::InvalidOptionsFormat(e),
        };

        if matches.opt_present("version") {
            OptionsResult::Version
        }
        else if matches.opt_present("help") {
            OptionsResult::Help(HelpReason::Flag)
        }
        else if matches.free.is_empty() {
            OptionsResult::Help(HelpReason::NoSource)
        }
        else {
            match Self::deduce(&matches) {
                Ok(opts) => OptionsResult::Ok(opts),
                Err(e)   => OptionsResult::InvalidOptions(e),
            }
        }
    }

    fn deduce(matches: &getopts::Matches) -> Result<Self, OptionsError> {
        if matches.free.len() > 2 {
            return Err(OptionsError::TooManyArguments(matches.free[2].clone()));
        }

        let source = Source::deduce(&matches.free[0]);
        let dest = Dest::deduce(matches.free.get(1).map_or("-", String::as_str));

        // The source type is deduced for interface parity: a DNS dump is
        // the only kind of source there is so far.
        let _ = SourceType::deduce(matches)?;

        let suffix = matches.opt_str("suffix");
        let incomplete = matches.opt_present("incomplete");
        let format = OutputFormat::deduce(matches, &dest)?;

        Ok(Self { source, dest, suffix, incomplete, format })
    }
}


/// Where the DNS dump is read from.
#[derive(PartialEq, Debug, Clone)]
pub enum Source {

    /// Standard input, spelt `-` on the command line.
    Stdin,

    /// A file on disk.
    File(PathBuf),
}

impl Source {
    fn deduce(argument: &str) -> Self {
        if argument == "-" {
            Self::Stdin
        }
        else {
            Self::File(PathBuf::from(argument))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin      => write!(f, "standard input"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}


/// Where the reassembled database is written to.
#[derive(PartialEq, Debug, Clone)]
pub enum Dest {

    /// Standard output, spelt `-` on the command line or left out
    /// entirely.
    Stdout,

    /// A file on disk.
    File(PathBuf),
}

impl Dest {
    fn deduce(argument: &str) -> Self {
        if argument == "-" {
            Self::Stdout
        }
        else {
            Self::File(PathBuf::from(argument))
        }
    }
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout     => write!(f, "standard output"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}


/// The format the source data is in.
#[derive(PartialEq, Debug, Copy, Clone)]
enum SourceType {

    /// A text dump of DNS records.
    DnsDump,
}

impl SourceType {
    fn deduce(matches: &getopts::Matches) -> Result<Self, OptionsError> {
        match matches.opt_str("src-type").as_deref() {
            Some("auto") | Some("dns-dump") | None => Ok(Self::DnsDump),
            Some(otherwise) => {
                warn!("Invalid source type {:?}", otherwise);
                Err(OptionsError::InvalidSourceType(otherwise.into()))
            }
        }
    }
}


impl OutputFormat {
    fn deduce(matches: &getopts::Matches, dest: &Dest) -> Result<Self, OptionsError> {
        let use_colours = UseColours::deduce(matches)?;

        if matches.opt_present("json") {
            return Ok(Self::JSON);
        }

        match matches.opt_str("dest-type").as_deref() {
            Some("json")    => Ok(Self::JSON),
            Some("summary") => Ok(Self::Summary(use_colours)),

            // A file gets the machine-readable database; a terminal gets
            // the human one.
            Some("auto") | None => {
                match dest {
                    Dest::File(_) => Ok(Self::JSON),
                    Dest::Stdout  => Ok(Self::Summary(use_colours)),
                }
            }

            Some(otherwise) => {
                warn!("Invalid destination type {:?}", otherwise);
                Err(OptionsError::InvalidDestType(otherwise.into()))
            }
        }
    }
}


impl UseColours {
    fn deduce(matches: &getopts::Matches) -> Result<Self, OptionsError> {
        match matches.opt_str("color").or_else(|| matches.opt_str("colour")).as_deref() {
            Some("always")          => Ok(Self::Always),
            Some("auto") | None     => Ok(Self::Automatic),
            Some("never")           => Ok(Self::Never),
            Some(otherwise) => {
                warn!("Invalid colour setting {:?}", otherwise);
                Err(OptionsError::InvalidColourSetting(otherwise.into()))
            }
        }
    }
}


/// The result of the `Options::getopts` function.
#[derive(PartialEq, Debug)]
pub enum OptionsResult {

    /// The options were parsed successfully.
    Ok(Options),

    /// There was an error (from `getopts`) parsing the arguments.
    InvalidOptionsFormat(getopts::Fail),

    /// There was an error with the combination of options the user
    /// selected.
    InvalidOptions(OptionsError),

    /// One of the arguments was `--help`, or no source was given, so the
    /// help text should be printed out.
    Help(HelpReason),

    /// One of the arguments was `--version`, so the version numbers
    /// should be printed out.
    Version,
}

/// The reason that help is being displayed. If it’s for the `--help`
/// flag, then we shouldn’t return an error exit status.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum HelpReason {

    /// Help was requested with the `--help` flag.
    Flag,

    /// No source was given, so displaying help seems more useful than an
    /// error message.
    NoSource,
}

/// Something wrong with the combination of options the user has picked.
#[derive(PartialEq, Debug)]
pub enum OptionsError {

    /// More free arguments than a source and a destination were given.
    TooManyArguments(String),

    /// An unsupported source type was given.
    InvalidSourceType(String),

    /// An unsupported destination type was given.
    InvalidDestType(String),

    /// An invalid colour setting was given.
    InvalidColourSetting(String),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyArguments(arg)     => write!(f, "Unexpected extra argument {:?}", arg),
            Self::InvalidSourceType(sort)   => write!(f, "Invalid source type {:?}", sort),
            Self::InvalidDestType(sort)     => write!(f, "Invalid destination type {:?}", sort),
            Self::InvalidColourSetting(when)=> write!(f, "Invalid colour setting {:?}", when),
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> OptionsResult {
        Options::getopts(args)
    }

    #[test]
    fn no_arguments() {
        assert_eq!(parse(&[]), OptionsResult::Help(HelpReason::NoSource));
    }

    #[test]
    fn just_a_source() {
        match parse(&[ "capture.dump" ]) {
            OptionsResult::Ok(options) => {
                assert_eq!(options.source, Source::File(PathBuf::from("capture.dump")));
                assert_eq!(options.dest, Dest::Stdout);
                assert_eq!(options.format, OutputFormat::Summary(UseColours::Automatic));
                assert!(! options.incomplete);
            }
            otherwise => panic!("unexpected result {:?}", otherwise),
        }
    }

    #[test]
    fn source_and_dest() {
        match parse(&[ "-", "tickets.json" ]) {
            OptionsResult::Ok(options) => {
                assert_eq!(options.source, Source::Stdin);
                assert_eq!(options.dest, Dest::File(PathBuf::from("tickets.json")));
                assert_eq!(options.format, OutputFormat::JSON);
            }
            otherwise => panic!("unexpected result {:?}", otherwise),
        }
    }

    #[test]
    fn forced_summary_to_file() {
        match parse(&[ "capture.dump", "tickets.txt", "--dest-type", "summary", "--colour", "never" ]) {
            OptionsResult::Ok(options) => {
                assert_eq!(options.format, OutputFormat::Summary(UseColours::Never));
            }
            otherwise => panic!("unexpected result {:?}", otherwise),
        }
    }

    #[test]
    fn json_shorthand() {
        match parse(&[ "capture.dump", "-J" ]) {
            OptionsResult::Ok(options) => {
                assert_eq!(options.format, OutputFormat::JSON);
            }
            otherwise => panic!("unexpected result {:?}", otherwise),
        }
    }

    #[test]
    fn custom_suffix() {
        match parse(&[ "capture.dump", "--suffix", "t.example.net" ]) {
            OptionsResult::Ok(options) => {
                assert_eq!(options.suffix, Some("t.example.net".into()));
            }
            otherwise => panic!("unexpected result {:?}", otherwise),
        }
    }

    #[test]
    fn too_many_arguments() {
        assert_eq!(parse(&[ "one", "two", "three" ]),
                   OptionsResult::InvalidOptions(OptionsError::TooManyArguments("three".into())));
    }

    #[test]
    fn invalid_source_type() {
        assert_eq!(parse(&[ "capture.dump", "--src-type", "pcap" ]),
                   OptionsResult::InvalidOptions(OptionsError::InvalidSourceType("pcap".into())));
    }

    #[test]
    fn invalid_dest_type() {
        assert_eq!(parse(&[ "capture.dump", "--dest-type", "pickle" ]),
                   OptionsResult::InvalidOptions(OptionsError::InvalidDestType("pickle".into())));
    }

    #[test]
    fn invalid_colour_setting() {
        assert_eq!(parse(&[ "capture.dump", "--colour", "sometimes" ]),
                   OptionsResult::InvalidOptions(OptionsError::InvalidColourSetting("sometimes".into())));
    }

    #[test]
    fn help_beats_everything() {
        assert_eq!(parse(&[ "--help", "capture.dump" ]),
                   OptionsResult::Help(HelpReason::Flag));
    }

    #[test]
    fn version() {
        assert_eq!(parse(&[ "--version" ]), OptionsResult::Version);
    }
}
