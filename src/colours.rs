//! Colours, colour schemes, and terminal styling.

use ansi_term::Style;
use ansi_term::Color::*;


/// The **colours** are used to paint the ticket summaries.
#[derive(Debug, Default)]
pub struct Colours {
    pub ticket_id: Style,

    pub complete: Style,
    pub partial: Style,
    pub missing: Style,

    pub binary: Style,
    pub text: Style,

    pub collision: Style,
}

impl Colours {

    /// Create a new colour palette that has a variety of different styles
    /// defined. This is used by default.
    pub fn pretty() -> Self {
        Self {
            ticket_id: Blue.bold(),

            complete: Green.normal(),
            partial: Yellow.normal(),
            missing: Style::default(),

            binary: Purple.normal(),
            text: Cyan.normal(),

            collision: White.on(Red),
        }
    }

    /// Create a new colour palette where no styles are defined, causing
    /// output to be rendered as plain text without any formatting.
    /// This is used when output is not to a terminal.
    pub fn plain() -> Self {
        Self::default()
    }
}
