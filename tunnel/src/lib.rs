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

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::redundant_else)]
#![allow(clippy::wildcard_imports)]

#![deny(clippy::cast_lossless)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]
#![deny(unsafe_code)]


//! The tunnel crate is the ‘library’ part of vodr. It decodes the covert
//! VPN-over-DNS protocol — query names carrying control variables and
//! hex-encoded payload, A-record answers carrying three-byte payload
//! chunks — and reassembles the request and response byte streams of every
//! ticket exchange found in a capture.


mod chunk;
pub use self::chunk::{chunk_to_ipv4, ipv4_to_bytes, ipv4_to_chunk, ChunkError, DataChunk};

mod name;
pub use self::name::{NameCodec, DEFAULT_SUFFIX};

mod message;
pub use self::message::{Message, ParseError, Value, Verb};

mod assembler;
pub use self::assembler::{AssembleError, DataAssembler};

mod ticket;
pub use self::ticket::{BuildError, Ticket, TicketDatabase};

mod record;
pub use self::record::{read_dump, DnsRecord, Dump, DumpError};
