//! Reading resource records from DNS dump text.

use std::io::{self, BufRead};

use log::*;


/// One resource record from a dump: a whitespace-separated
/// `FQDN CLASS TYPE VALUE` line.
///
/// The class and type are carried along unexamined. The value must be a
/// dotted IPv4 literal for the A records the tunnel speaks through; other
/// values fail later, at answer decoding time.
#[derive(PartialEq, Debug, Clone)]
pub struct DnsRecord {

    /// The fully qualified domain name that was queried.
    pub fqdn: String,

    /// The record class, usually `IN`.
    pub class: String,

    /// The record type, usually `A`.
    pub rtype: String,

    /// The answer value.
    pub value: String,
}

impl DnsRecord {

    /// Splits one dump line into a record, requiring exactly four fields.
    pub fn from_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();

        let record = Self {
            fqdn:  fields.next()?.to_owned(),
            class: fields.next()?.to_owned(),
            rtype: fields.next()?.to_owned(),
            value: fields.next()?.to_owned(),
        };

        match fields.next() {
            Some(extra) => {
                debug!("Trailing field {:?} after record", extra);
                None
            }
            None => Some(record),
        }
    }
}


/// Iterates over the records of a DNS dump, skipping blank lines.
pub fn read_dump<R: BufRead>(source: R) -> Dump<R> {
    Dump {
        lines: source.lines(),
        number: 0,
    }
}


/// An iterator over the records of a dump. Use [`read_dump`] to get one.
#[derive(Debug)]
pub struct Dump<R> {
    lines: io::Lines<R>,
    number: usize,
}

impl<R: BufRead> Iterator for Dump<R> {
    type Item = Result<DnsRecord, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line)   => line,
                Err(error) => return Some(Err(error.into())),
            };

            self.number += 1;
            if line.trim().is_empty() {
                continue;
            }

            return Some(match DnsRecord::from_line(&line) {
                Some(record) => Ok(record),
                None         => Err(DumpError::BadLine { number: self.number }),
            });
        }
    }
}


/// Something that can go wrong reading a dump.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum DumpError {

    /// There was an IO error reading from the source.
    Io,
    // (io::Error is not PartialEq so we don’t propagate it)

    /// A line did not hold exactly the four record fields.
    BadLine {

        /// One-based number of the offending line.
        number: usize,
    },
}

impl From<io::Error> for DumpError {
    fn from(ioe: io::Error) -> Self {
        error!("IO error -> {:?}", ioe);
        Self::Io
    }
}
