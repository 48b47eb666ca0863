//! Parsing and encoding the tunnel's query names.

use log::*;
use regex::Regex;

use crate::chunk;
use crate::message::{Message, ParseError};
use crate::record::DnsRecord;


/// The domain the known client hides its queries under.
pub const DEFAULT_SUFFIX: &str = "tun.vpnoverdns.com.";


/// Parses query names into messages and renders messages back into dump
/// records.
///
/// A tunnel name is a run of labels — bare boolean flags and
/// `variable-value` pairs — followed by a version label and the tunnel
/// domain:
///
/// ```text
/// sz-00000061.rn-12345678.id-00000001.v0.tun.vpnoverdns.com.
/// ```
///
/// The grammar is compiled into a regex once per codec and shared
/// read-only by every parse call. Matching is anchored and the suffix is
/// matched case-sensitively.
#[derive(Debug, Clone)]
pub struct NameCodec {
    suffix: String,
    pattern: Regex,
}

impl NameCodec {

    /// Creates a codec for the well-known tunnel domain.
    pub fn new() -> Self {
        Self::with_suffix(DEFAULT_SUFFIX)
    }

    /// Creates a codec for a custom tunnel domain. The suffix is
    /// normalised by stripping a leading dot and ensuring a trailing one,
    /// so `.example.org` and `example.org.` name the same domain.
    pub fn with_suffix(suffix: &str) -> Self {
        let mut suffix = suffix.strip_prefix('.').unwrap_or(suffix).to_owned();
        if ! suffix.ends_with('.') {
            suffix.push('.');
        }

        let grammar = format!(r"^(?P<labels>(?:\w+(?:-\w+)?\.)+)v(?P<version>\w+)\.{}$",
                              regex::escape(&suffix));
        let pattern = Regex::new(&grammar).expect("the name grammar is a valid regex");

        Self { suffix, pattern }
    }

    /// The normalised suffix this codec matches against.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Decodes one dump record into a classified message.
    ///
    /// Flag labels become boolean variables and `variable-value` labels
    /// become typed ones, with the last occurrence of a repeated label
    /// winning. The record's answer value becomes the payload chunk.
    pub fn parse(&self, record: &DnsRecord) -> Result<Message, ParseError> {
        let captures = match self.pattern.captures(&record.fqdn) {
            Some(captures) => captures,
            None => {
                debug!("Name {:?} does not match the tunnel grammar", record.fqdn);
                return Err(ParseError::MalformedName { fqdn: record.fqdn.clone() });
            }
        };

        let mut labels = Vec::new();
        for label in captures["labels"].split('.').filter(|label| ! label.is_empty()) {
            match label.split_once('-') {
                Some((variable, value)) => labels.push((variable.to_owned(), Some(value.to_owned()))),
                None                    => labels.push((label.to_owned(), None)),
            }
        }

        // At least one variable-value label is mandatory; a run of bare
        // flags alone is not a tunnel name.
        if labels.iter().all(|(_, value)| value.is_none()) {
            debug!("Name {:?} carries no variable labels", record.fqdn);
            return Err(ParseError::MalformedName { fqdn: record.fqdn.clone() });
        }

        let payload = chunk::ipv4_to_chunk(&record.value)?;
        Message::assemble(&captures["version"], labels, payload)
    }

    /// Renders a message as the A-record dump line it travels as. This is
    /// the exact inverse of `parse`: labels are emitted in a fixed order,
    /// so the rendering is deterministic.
    pub fn encode(&self, message: &Message) -> Result<DnsRecord, chunk::ChunkError> {
        let mut fqdn = String::new();
        for label in message.wire_labels() {
            fqdn.push_str(&label);
            fqdn.push('.');
        }

        fqdn.push('v');
        fqdn.push_str(message.version());
        fqdn.push('.');
        fqdn.push_str(&self.suffix);

        let value = chunk::chunk_to_ipv4(message.payload())?;

        Ok(DnsRecord {
            fqdn,
            class: String::from("IN"),
            rtype: String::from("A"),
            value,
        })
    }
}

impl Default for NameCodec {
    fn default() -> Self {
        Self::new()
    }
}
