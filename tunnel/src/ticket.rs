//! Ticket records and the database that reassembles them.

use std::collections::HashMap;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use log::*;

use crate::assembler::{AssembleError, DataAssembler};
use crate::message::{Message, ParseError, Verb};
use crate::name::NameCodec;
use crate::record::DnsRecord;


/// Request bytes travel in 30-byte windows, hex-encoded in the name.
const REQUEST_ALIGNMENT: usize = 30;

/// Response bytes travel in three-byte chunks carried by answers.
const RESPONSE_ALIGNMENT: usize = 3;

/// Responses are fetched in segments of this many bytes; a shorter
/// segment is the final one.
const SEGMENT_LENGTH: usize = 48;


/// Everything reassembled so far about one request/response exchange.
///
/// Tickets are created and mutated by their owning [`TicketDatabase`];
/// consumers only ever see them through shared references.
#[derive(PartialEq, Debug, Clone)]
pub struct Ticket {
    id: u32,
    collision: bool,
    random_number: Option<u32>,
    request_length: Option<usize>,
    request: Option<DataAssembler>,
    response_length: Option<usize>,
    response: Option<DataAssembler>,
}

impl Ticket {

    fn new(id: u32) -> Self {
        Self {
            id,
            collision: false,
            random_number: None,
            request_length: None,
            request: None,
            response_length: None,
            response: None,
        }
    }

    /// The exchange's identifier.
    pub fn ticket_id(&self) -> u32 {
        self.id
    }

    /// Whether conflicting observations were ever made for this ticket.
    /// Sticky: once set, it stays set for the ticket's lifetime.
    pub fn collision(&self) -> bool {
        self.collision
    }

    /// The random number declared when the ticket was opened.
    pub fn random_number(&self) -> Option<u32> {
        self.random_number
    }

    /// The request length: the value declared at open time, or failing
    /// that whatever the request assembler deduced from its short final
    /// window.
    pub fn request_length(&self) -> Option<usize> {
        self.request_length
            .or_else(|| self.request.as_ref().and_then(DataAssembler::length))
    }

    /// The fully reassembled request, once every window has arrived.
    pub fn request_data(&self) -> Option<Vec<u8>> {
        self.request.as_ref().and_then(|assembler| assembler.bytes().ok())
    }

    /// The request as reassembled so far, with missing windows as zero
    /// bytes. `None` when no request bytes have been seen at all.
    pub fn partial_request_data(&self) -> Option<Vec<u8>> {
        self.request.as_ref().map(DataAssembler::partial_bytes)
    }

    /// The response length: the value learnt from a length marker or a
    /// short final segment, or failing that whatever the response
    /// assembler deduced.
    pub fn response_length(&self) -> Option<usize> {
        self.response_length
            .or_else(|| self.response.as_ref().and_then(DataAssembler::length))
    }

    /// The fully reassembled response, once every chunk has arrived. The
    /// bytes are surfaced exactly as carried — the known client compresses
    /// them, and inflating is the consumer's business.
    pub fn response_data(&self) -> Option<Vec<u8>> {
        self.response.as_ref().and_then(|assembler| assembler.bytes().ok())
    }

    /// The response as reassembled so far, with missing chunks as zero
    /// bytes. `None` when no response bytes have been seen at all.
    pub fn partial_response_data(&self) -> Option<Vec<u8>> {
        self.response.as_ref().map(DataAssembler::partial_bytes)
    }

    /// Whether the exchange looks like binary traffic. The client marks a
    /// text exchange with a zero first request byte; anything non-zero
    /// means binary. Unknowable until the request is complete.
    pub fn is_binary(&self) -> Option<bool> {
        let data = self.request_data()?;
        data.first().map(|&byte| byte != 0)
    }

    /// Folds one message into this ticket. Conflicting observations set
    /// the collision flag and drop the message; structurally impossible
    /// chunks bubble up to the caller.
    fn update(&mut self, message: &Message) -> Result<(), AssembleError> {
        match message.verb() {
            Verb::OpenTicket => {
                if let Some(rn) = message.int_variable("rn") {
                    self.collision |= conflicts(self.id, "random number", &mut self.random_number, rn);
                }

                if let Some(sz) = message.int_variable("sz") {
                    self.collision |= conflicts(self.id, "request length", &mut self.request_length, sz as usize);
                }
            }

            Verb::RequestData => {
                let (data, offset) = match (message.bytes_variable("bf"), message.int_variable("wr")) {
                    (Some(data), Some(offset)) => (data, offset as usize),
                    _ => return Ok(()),
                };

                let known = self.request_length;
                let assembler = self.request.get_or_insert_with(|| match known {
                    Some(length) => DataAssembler::with_length(REQUEST_ALIGNMENT, length),
                    None         => DataAssembler::new(REQUEST_ALIGNMENT),
                });

                match assembler.add(data, offset) {
                    Ok(()) => {}
                    Err(error) if error.is_conflict() => {
                        warn!("Ticket {}: conflicting request window at offset {} -> {:?}",
                              self.id, offset, error);
                        self.collision = true;
                        return Ok(());
                    }
                    Err(error) => return Err(error),
                }

                let deduced = assembler.length();
                if let Some(length) = deduced {
                    self.collision |= conflicts(self.id, "request length", &mut self.request_length, length);
                }
            }

            Verb::CheckRequest => {
                // A completed request is answered with an `L` marker whose
                // remaining three bytes carry the response length.
                let payload = &message.payload().data;
                if payload.len() == 4 && payload[0] == b'L' {
                    let length = BigEndian::read_u24(&payload[1 ..]) as usize;
                    self.collision |= conflicts(self.id, "response length", &mut self.response_length, length);
                }
            }

            Verb::FetchResponse => {
                let (segment_length, segment_offset) = match (message.int_variable("ln"), message.int_variable("rd")) {
                    (Some(length), Some(offset)) => (length as usize, offset as usize),
                    _ => return Ok(()),
                };

                let chunk = message.payload();

                let known = self.response_length;
                let assembler = self.response.get_or_insert_with(|| match known {
                    Some(length) => DataAssembler::with_length(RESPONSE_ALIGNMENT, length),
                    None         => DataAssembler::new(RESPONSE_ALIGNMENT),
                });

                // Chunk offsets are relative to their segment. Segments
                // are a multiple of the chunk alignment, so one assembler
                // covers the whole stream at absolute offsets.
                let offset = segment_offset + chunk.offset;
                match assembler.add(&chunk.data, offset) {
                    Ok(()) => {}
                    Err(error) if error.is_conflict() => {
                        warn!("Ticket {}: conflicting response chunk at offset {} -> {:?}",
                              self.id, offset, error);
                        self.collision = true;
                        return Ok(());
                    }
                    Err(error) => return Err(error),
                }

                if segment_length < SEGMENT_LENGTH {
                    // A short segment is the final one, so its end is the
                    // stream's total length.
                    if let Err(error) = assembler.set_length(segment_offset + segment_length) {
                        warn!("Ticket {}: conflicting response length -> {:?}", self.id, error);
                        self.collision = true;
                    }
                }

                let deduced = assembler.length();
                if let Some(length) = deduced {
                    self.collision |= conflicts(self.id, "response length", &mut self.response_length, length);
                }
            }

            Verb::CloseTicket | Verb::Unknown => {
                // Neither carries anything the reassembly cares about.
            }
        }

        Ok(())
    }
}


/// Applies a set-or-verify observation: an unset field takes the value, a
/// matching value is a no-op, and a divergent value is reported as a
/// conflict without overwriting the first observation.
fn conflicts<T>(ticket_id: u32, what: &str, field: &mut Option<T>, value: T) -> bool
where T: PartialEq + fmt::Debug
{
    match field {
        None => {
            *field = Some(value);
            false
        }
        Some(current) if *current == value => {
            false
        }
        Some(current) => {
            warn!("Ticket {}: {} observed as {:?} but was already {:?}",
                  ticket_id, what, value, current);
            true
        }
    }
}


/// Every ticket reconstructed from a capture, keyed by ticket id and
/// iterated in the order each ticket was first seen.
///
/// The database is append-only: tickets are created on first sighting and
/// mutated by later messages, never destroyed.
#[derive(Debug, Clone, Default)]
pub struct TicketDatabase {
    suffix: Option<String>,
    strict_fetch_errors: bool,
    tickets: Vec<Ticket>,
    index: HashMap<u32, usize>,
}

impl TicketDatabase {

    /// Creates an empty database listening for the well-known tunnel
    /// domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty database for a custom tunnel domain.
    pub fn with_suffix(suffix: &str) -> Self {
        Self {
            suffix: Some(suffix.to_owned()),
            .. Self::default()
        }
    }

    /// Makes the engine honour `E`-sentinel error payloads on
    /// FetchResponse messages too.
    ///
    /// Off by default: those payloads are opaque three-byte windows, and
    /// a window that happens to start with `E` would be thrown away as a
    /// false positive.
    pub fn set_strict_fetch_errors(&mut self, strict: bool) {
        self.strict_fetch_errors = strict;
    }

    /// How many tickets have been seen.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether no tickets have been seen at all.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Whether a ticket with the given id has been seen.
    pub fn contains(&self, ticket_id: u32) -> bool {
        self.index.contains_key(&ticket_id)
    }

    /// Borrows the ticket with the given id.
    pub fn get(&self, ticket_id: u32) -> Option<&Ticket> {
        self.index.get(&ticket_id).map(|&at| &self.tickets[at])
    }

    /// Iterates over the tickets in the order they were first seen.
    pub fn iter(&self) -> std::slice::Iter<'_, Ticket> {
        self.tickets.iter()
    }

    /// Feeds a stream of dump records into the database, in order.
    ///
    /// Records whose name or answer does not decode, whose payload
    /// carries a non-zero error code, or which cannot be pinned to any
    /// ticket are skipped. Conflicting observations mark the affected
    /// ticket instead of failing the build. Only two things stop it: a
    /// version label this crate does not speak, and structurally
    /// impossible chunk geometry, which means the input is not what it
    /// claims to be.
    pub fn build_from_records<I>(&mut self, records: I) -> Result<(), BuildError>
    where I: IntoIterator<Item = DnsRecord>
    {
        let codec = match &self.suffix {
            Some(suffix) => NameCodec::with_suffix(suffix),
            None         => NameCodec::new(),
        };

        for record in records {
            let message = match codec.parse(&record) {
                Ok(message) => message,
                Err(ParseError::UnknownVersion { version }) => {
                    return Err(BuildError::UnknownVersion { version });
                }
                Err(error) => {
                    debug!("Skipping unparseable record {:?} -> {:?}", record.fqdn, error);
                    continue;
                }
            };

            if self.strict_fetch_errors || message.verb() != Verb::FetchResponse {
                if let Some(code) = message.error() {
                    if code != 0 {
                        debug!("Skipping message with error code {:#04x}", code);
                        continue;
                    }
                }
            }

            let ticket_id = if message.has_variable("rn") {
                // The answer to an OpenTicket carries the newly assigned
                // ticket id in its payload bytes, big-endian.
                message.payload().data.iter().fold(0_u32, |id, &byte| (id << 8) | u32::from(byte))
            }
            else if let Some(id) = message.int_variable("id") {
                id
            }
            else {
                debug!("Skipping message that names no ticket");
                continue;
            };

            self.get_or_create(ticket_id).update(&message)?;
        }

        Ok(())
    }

    fn get_or_create(&mut self, ticket_id: u32) -> &mut Ticket {
        let at = match self.index.get(&ticket_id) {
            Some(&at) => at,
            None => {
                debug!("First sighting of ticket {}", ticket_id);
                self.index.insert(ticket_id, self.tickets.len());
                self.tickets.push(Ticket::new(ticket_id));
                self.tickets.len() - 1
            }
        };

        &mut self.tickets[at]
    }
}

impl<'db> IntoIterator for &'db TicketDatabase {
    type Item = &'db Ticket;
    type IntoIter = std::slice::Iter<'db, Ticket>;

    fn into_iter(self) -> Self::IntoIter {
        self.tickets.iter()
    }
}


/// Something that stops a database build outright, rather than being
/// recovered from by skipping the record.
#[derive(PartialEq, Debug, Clone)]
pub enum BuildError {

    /// A record spoke a protocol revision this crate does not know.
    UnknownVersion {

        /// The version token found in the record's name.
        version: String,
    },

    /// A record carried structurally impossible chunk geometry — the
    /// data source is not the kind of dump it claims to be.
    Assemble(AssembleError),
}

impl From<AssembleError> for BuildError {
    fn from(error: AssembleError) -> Self {
        Self::Assemble(error)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::DataChunk;
    use crate::message::Value;
    use std::collections::BTreeMap;
    use pretty_assertions::assert_eq;

    fn message(entries: &[(&str, Value)], payload: DataChunk) -> Message {
        let variables: BTreeMap<String, Value> =
            entries.iter()
                   .map(|(name, value)| ((*name).to_owned(), value.clone()))
                   .collect();
        Message::create("0", variables, payload)
    }

    fn open_ticket(sz: u32, rn: u32) -> Message {
        message(&[ ("sz", Value::Int(sz)), ("rn", Value::Int(rn)), ("id", Value::Int(1)) ],
                DataChunk::new(vec![ 0xb2, 0x73, 0xd6 ], 0))
    }

    #[test]
    fn open_ticket_sets_fields() {
        let mut ticket = Ticket::new(0xb2_73d6);
        ticket.update(&open_ticket(61, 12_345_678)).unwrap();

        assert_eq!(ticket.random_number(), Some(12_345_678));
        assert_eq!(ticket.request_length(), Some(61));
        assert!(! ticket.collision());
    }

    #[test]
    fn repeated_open_ticket_is_idempotent() {
        let mut ticket = Ticket::new(0xb2_73d6);
        ticket.update(&open_ticket(61, 12_345_678)).unwrap();
        ticket.update(&open_ticket(61, 12_345_678)).unwrap();

        assert!(! ticket.collision());
    }

    #[test]
    fn diverging_open_ticket_collides() {
        let mut ticket = Ticket::new(0xb2_73d6);
        ticket.update(&open_ticket(61, 12_345_678)).unwrap();
        ticket.update(&open_ticket(61, 87_654_321)).unwrap();

        assert!(ticket.collision());

        // The first observation is kept.
        assert_eq!(ticket.random_number(), Some(12_345_678));
        assert_eq!(ticket.request_length(), Some(61));
    }

    #[test]
    fn request_windows_assemble() {
        let mut ticket = Ticket::new(7);
        let data = (0 .. 61_u32).map(|i| (i + 1) as u8).collect::<Vec<_>>();

        for (i, window) in data.chunks(30).enumerate() {
            ticket.update(&message(&[ ("bf", Value::Bytes(window.to_vec())),
                                      ("wr", Value::Int((i * 30) as u32)),
                                      ("id", Value::Int(7)) ],
                                   DataChunk::new(vec![ b'E', 0x00 ], 0))).unwrap();
        }

        assert_eq!(ticket.request_length(), Some(61));
        assert_eq!(ticket.request_data(), Some(data));
        assert_eq!(ticket.is_binary(), Some(true));
        assert!(! ticket.collision());
    }

    #[test]
    fn conflicting_request_window_collides() {
        let mut ticket = Ticket::new(7);
        let window = |fill: u8| message(&[ ("bf", Value::Bytes(vec![ fill; 30 ])),
                                           ("wr", Value::Int(0)),
                                           ("id", Value::Int(7)) ],
                                        DataChunk::new(vec![ b'E', 0x00 ], 0));

        ticket.update(&window(0xaa)).unwrap();
        ticket.update(&window(0xaa)).unwrap();
        assert!(! ticket.collision());

        ticket.update(&window(0xbb)).unwrap();
        assert!(ticket.collision());

        // The stored bytes survive the conflict.
        assert_eq!(ticket.partial_request_data(), Some(vec![ 0xaa; 30 ]));
    }

    #[test]
    fn zero_first_byte_reads_as_text() {
        let mut ticket = Ticket::new(7);

        // The declared request length lets the single short window
        // complete the request.
        ticket.update(&open_ticket(3, 42)).unwrap();
        ticket.update(&message(&[ ("bf", Value::Bytes(vec![ 0x00, 0x68, 0x69 ])),
                                  ("wr", Value::Int(0)),
                                  ("id", Value::Int(7)) ],
                               DataChunk::new(vec![ b'E', 0x00 ], 0))).unwrap();

        assert_eq!(ticket.is_binary(), Some(false));
    }

    #[test]
    fn check_request_length_marker() {
        let mut ticket = Ticket::new(7);
        ticket.update(&message(&[ ("ck", Value::Int(1)), ("id", Value::Int(7)) ],
                               DataChunk::new(vec![ b'L', 0x00, 0x01, 0x2c ], 0))).unwrap();

        assert_eq!(ticket.response_length(), Some(300));

        // A non-marker payload is ignored.
        let mut other = Ticket::new(8);
        other.update(&message(&[ ("ck", Value::Int(1)), ("id", Value::Int(8)) ],
                              DataChunk::new(vec![ 0x01, 0x02, 0x03 ], 0))).unwrap();
        assert_eq!(other.response_length(), None);
    }

    #[test]
    fn fetch_response_short_segment_pins_length() {
        let mut ticket = Ticket::new(7);

        // One four-byte final segment at offset 96.
        let vars = [ ("ln", Value::Int(4)), ("rd", Value::Int(96)), ("id", Value::Int(7)) ];
        ticket.update(&message(&vars, DataChunk::new(vec![ 0x01, 0x02, 0x03 ], 0))).unwrap();
        ticket.update(&message(&vars, DataChunk::new(vec![ 0x04 ], 3))).unwrap();

        assert_eq!(ticket.response_length(), Some(100));
        assert!(! ticket.collision());
    }

    #[test]
    fn incomplete_reads_come_back_padded() {
        let mut ticket = Ticket::new(7);
        ticket.update(&message(&[ ("ln", Value::Int(4)), ("rd", Value::Int(96)), ("id", Value::Int(7)) ],
                               DataChunk::new(vec![ 0x04 ], 3))).unwrap();

        assert_eq!(ticket.response_data(), None);
        assert_eq!(ticket.partial_response_data().map(|data| data.len()), Some(100));
    }

    #[test]
    fn structural_failures_bubble_up() {
        let mut ticket = Ticket::new(7);
        let result = ticket.update(&message(&[ ("bf", Value::Bytes(vec![ 0x00; 31 ])),
                                               ("wr", Value::Int(0)),
                                               ("id", Value::Int(7)) ],
                                            DataChunk::new(vec![ b'E', 0x00 ], 0)));

        assert_eq!(result, Err(AssembleError::OversizedChunk { length: 31, alignment: 30 }));
        assert!(! ticket.collision());
    }

    #[test]
    fn close_ticket_changes_nothing() {
        let mut ticket = Ticket::new(7);
        ticket.update(&open_ticket(61, 12_345_678)).unwrap();
        let before = ticket.clone();

        ticket.update(&message(&[ ("ac", Value::Flag(true)), ("id", Value::Int(7)) ],
                               DataChunk::new(vec![ b'E', 0x00 ], 0))).unwrap();
        assert_eq!(ticket, before);
    }
}
