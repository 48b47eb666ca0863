//! Text and JSON output.

use std::env;
use std::io::{self, Write};

use json::{object, JsonValue};

use tunnel::{AssembleError, BuildError, Ticket, TicketDatabase};

use crate::colours::Colours;
use crate::table::Table;


/// How to format the output data.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum OutputFormat {

    /// Render a summary table of the tickets, optionally adding ANSI
    /// colours.
    Summary(UseColours),

    /// Serialize the whole database as JSON.
    JSON,
}

/// When to use colours in the output.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum UseColours {

    /// Always use colours.
    Always,

    /// Use colours if output is to a terminal; otherwise, do not.
    Automatic,

    /// Never use colours.
    Never,
}

impl UseColours {

    /// Whether we should use colours or not. This checks whether the user
    /// has overridden the colour setting, and if not, whether output is
    /// to a terminal.
    pub fn should_use_colours(self) -> bool {
        self == Self::Always || (atty::is(atty::Stream::Stdout) && env::var("NO_COLOR").is_err() && self != Self::Never)
    }

    /// Creates a palette of colours depending on the user’s wishes or
    /// whether output is to a terminal.
    pub fn palette(self) -> Colours {
        if self.should_use_colours() {
            Colours::pretty()
        }
        else {
            Colours::plain()
        }
    }
}


impl OutputFormat {

    /// Writes the database to the given writer, formatted according to
    /// the settings. With `incomplete`, partially reassembled buffers are
    /// included where the complete ones are not available yet.
    pub fn write<W: Write>(self, db: &TicketDatabase, incomplete: bool, w: &mut W) -> io::Result<()> {
        match self {
            Self::Summary(uc) => {
                let mut table = Table::new(uc.palette());
                for ticket in db {
                    table.add_row(ticket);
                }

                table.write(w)
            }

            Self::JSON => {
                let tickets = db.iter()
                                .map(|t| json_ticket(t, incomplete))
                                .collect::<Vec<_>>();

                let object = object! {
                    "tickets": tickets,
                };

                writeln!(w, "{}", object.pretty(2))
            }
        }
    }
}


/// Serializes one ticket projection, rendering reassembled bytes as
/// lowercase hex.
fn json_ticket(ticket: &Ticket, incomplete: bool) -> JsonValue {
    let request_data = ticket.request_data()
                             .or_else(|| if incomplete { ticket.partial_request_data() } else { None });
    let response_data = ticket.response_data()
                              .or_else(|| if incomplete { ticket.partial_response_data() } else { None });

    object! {
        "ticket_id": ticket.ticket_id(),
        "collision": ticket.collision(),
        "random_number": ticket.random_number(),
        "request_length": ticket.request_length(),
        "request_complete": ticket.request_data().is_some(),
        "request_data": request_data.map(hex::encode),
        "response_length": ticket.response_length(),
        "response_complete": ticket.response_data().is_some(),
        "raw_response_data": response_data.map(hex::encode),
        "is_binary": ticket.is_binary(),
    }
}


/// The message to display for an error that stopped a database build.
pub fn build_error_message(error: &BuildError) -> String {
    match error {
        BuildError::UnknownVersion { version } => {
            format!("Capture speaks unknown protocol version {:?}", version)
        }
        BuildError::Assemble(assemble) => {
            format!("Capture is not a usable DNS dump: {}", assemble_error_message(assemble))
        }
    }
}

fn assemble_error_message(error: &AssembleError) -> String {
    match error {
        AssembleError::MisalignedOffset { offset, alignment } => {
            format!("chunk offset {} is not a multiple of {}", offset, alignment)
        }
        AssembleError::EmptyChunk { offset } => {
            format!("empty chunk at offset {}", offset)
        }
        AssembleError::OversizedChunk { length, alignment } => {
            format!("{}-byte chunk exceeds the {}-byte alignment", length, alignment)
        }
        AssembleError::WrongChunkLength { length, expected } => {
            format!("{}-byte chunk where {} bytes were expected", length, expected)
        }
        AssembleError::PastEnd { offset, length } => {
            format!("chunk at offset {} lies past the {}-byte end", offset, length)
        }
        AssembleError::Collision { offset } => {
            format!("conflicting chunk at offset {}", offset)
        }
        AssembleError::LengthConflict { current, proposed } => {
            format!("length {} declared where {} was already known", proposed, current)
        }
        AssembleError::Incomplete => {
            String::from("stream is incomplete")
        }
    }
}
