//! Rendering tables of reassembled tickets.

use std::io::{self, Write};

use ansi_term::ANSIString;

use tunnel::Ticket;

use crate::colours::Colours;


/// A **table** sums up a ticket database for human eyes, one ticket per
/// row in first-sighting order.
#[derive(Debug)]
pub struct Table {
    colours: Colours,
    rows: Vec<Row>,
}

/// A row of the table, holding the rendered cells of one ticket.
#[derive(Debug)]
struct Row {
    ticket_id: ANSIString<'static>,
    random_number: String,
    request: ANSIString<'static>,
    response: ANSIString<'static>,
    kind: ANSIString<'static>,
    flags: ANSIString<'static>,
}


impl Table {

    /// Create a new table with no rows.
    pub fn new(colours: Colours) -> Self {
        Self { colours, rows: Vec::new() }
    }

    /// Adds a row rendering the given ticket.
    pub fn add_row(&mut self, ticket: &Ticket) {
        let ticket_id = self.colours.ticket_id.paint(format!("{:08}", ticket.ticket_id()));

        let random_number = match ticket.random_number() {
            Some(rn) => format!("{:08}", rn),
            None     => String::from("-"),
        };

        let request = self.stream_cell(ticket.request_data().is_some(),
                                       ticket.partial_request_data().is_some(),
                                       ticket.request_length());
        let response = self.stream_cell(ticket.response_data().is_some(),
                                        ticket.partial_response_data().is_some(),
                                        ticket.response_length());

        let kind = match ticket.is_binary() {
            Some(true)  => self.colours.binary.paint("binary"),
            Some(false) => self.colours.text.paint("text"),
            None        => self.colours.missing.paint("-"),
        };

        let flags = if ticket.collision() {
            self.colours.collision.paint("collision")
        }
        else {
            self.colours.missing.paint("")
        };

        self.rows.push(Row { ticket_id, random_number, request, response, kind, flags });
    }

    /// Renders one side of an exchange: how many bytes, and how sure we
    /// are about them.
    fn stream_cell(&self, complete: bool, seen: bool, length: Option<usize>) -> ANSIString<'static> {
        if complete {
            match length {
                Some(length) => self.colours.complete.paint(format!("{}", length)),
                None         => self.colours.complete.paint("?"),
            }
        }
        else if let Some(length) = length {
            // The length is declared or deduced, but some bytes are
            // still missing.
            self.colours.partial.paint(format!("{}?", length))
        }
        else if seen {
            self.colours.partial.paint("?")
        }
        else {
            self.colours.missing.paint("-")
        }
    }

    /// Writes the formatted table, with every column padded to its
    /// widest cell.
    pub fn write<W: Write>(self, w: &mut W) -> io::Result<()> {
        if self.rows.is_empty() {
            return writeln!(w, "No tickets");
        }

        let id_len       = self.max_len(|r| &r.ticket_id);
        let random_len   = self.rows.iter().map(|r| r.random_number.len()).max().unwrap_or(0);
        let request_len  = self.max_len(|r| &r.request);
        let response_len = self.max_len(|r| &r.response);
        let kind_len     = self.max_len(|r| &r.kind);

        for r in &self.rows {
            write!(w, "{}", r.ticket_id)?;
            pad(w, id_len - r.ticket_id.len() + 1)?;

            write!(w, "rn:{}", r.random_number)?;
            pad(w, random_len - r.random_number.len() + 1)?;

            write!(w, "req:{}", r.request)?;
            pad(w, request_len - r.request.len() + 1)?;

            write!(w, "resp:{}", r.response)?;
            pad(w, response_len - r.response.len() + 1)?;

            write!(w, "{}", r.kind)?;
            pad(w, kind_len - r.kind.len() + 1)?;

            writeln!(w, "{}", r.flags)?;
        }

        Ok(())
    }

    fn max_len(&self, cell: impl Fn(&Row) -> &ANSIString<'static>) -> usize {
        self.rows.iter().map(|r| cell(r).len()).max().unwrap_or(0)
    }
}


fn pad<W: Write>(w: &mut W, spaces: usize) -> io::Result<()> {
    for _ in 0 .. spaces {
        write!(w, " ")?;
    }

    Ok(())
}
