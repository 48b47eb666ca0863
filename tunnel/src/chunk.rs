//! Translating IPv4 answer values to and from payload chunks.

use log::*;


/// A contiguous run of payload bytes together with the absolute offset of
/// its first byte within the stream being carried.
///
/// The tunnel client smuggles payload through the answer section of
/// A-record lookups. The first octet of the IPv4 address holds the chunk
/// geometry — a two-bit byte count and a six-bit offset in units of three
/// bytes — and the remaining octets hold up to three payload bytes.
#[derive(PartialEq, Debug, Clone)]
pub struct DataChunk {

    /// The payload bytes carried by this chunk.
    pub data: Vec<u8>,

    /// Offset of the first byte within the complete stream.
    pub offset: usize,
}

impl DataChunk {

    /// Creates a chunk from its parts.
    pub fn new(data: impl Into<Vec<u8>>, offset: usize) -> Self {
        Self { data: data.into(), offset }
    }
}


/// Decodes a dotted IPv4 answer value into the chunk it carries.
///
/// The top two bits of the first octet are the payload byte count (0 to 3)
/// and its low six bits are the offset divided by three. The next `count`
/// octets are payload; any remaining octets are padding and get ignored.
pub fn ipv4_to_chunk(addr: &str) -> Result<DataChunk, ChunkError> {
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 {
        warn!("Answer value {:?} has {} octets, not four", addr, octets.len());
        return Err(ChunkError::WrongOctetCount { count: octets.len() });
    }

    let mut values = [0_u8; 4];
    for (i, text) in octets.iter().enumerate() {
        values[i] = match text.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Octet {} of answer value {:?} is not within [0,255]", i + 1, addr);
                return Err(ChunkError::OctetOutOfRange { index: i + 1, octet: (*text).to_owned() });
            }
        };
    }

    let count = usize::from((values[0] >> 6) & 0b_11);
    let offset = usize::from(values[0] & 0b_11_1111) * 3;
    let data = values[1 .. 1 + count].to_vec();
    trace!("Decoded {:?} -> {} payload bytes at offset {}", addr, count, offset);

    Ok(DataChunk { data, offset })
}


/// Decodes a dotted IPv4 answer value, keeping the payload bytes and
/// discarding the offset.
pub fn ipv4_to_bytes(addr: &str) -> Result<Vec<u8>, ChunkError> {
    ipv4_to_chunk(addr).map(|chunk| chunk.data)
}


/// Encodes a chunk as the dotted IPv4 answer value that carries it.
///
/// This is the exact inverse of `ipv4_to_chunk` for every chunk it
/// accepts: one to three payload bytes at an offset that is a multiple of
/// three and fits in the six offset bits. Unused trailing octets are
/// emitted as 255.
pub fn chunk_to_ipv4(chunk: &DataChunk) -> Result<String, ChunkError> {
    let count_bits = match chunk.data.len() {
        1 => 0b_0100_0000_u8,
        2 => 0b_1000_0000,
        3 => 0b_1100_0000,
        length => return Err(ChunkError::UnencodablePayload { length }),
    };

    if chunk.offset % 3 != 0 {
        return Err(ChunkError::MisalignedOffset { offset: chunk.offset });
    }

    let slot = match u8::try_from(chunk.offset / 3) {
        Ok(slot) if slot < 0b_11_1111 => slot,
        _ => return Err(ChunkError::OffsetOutOfRange { offset: chunk.offset }),
    };

    let mut octets = [0xff_u8; 4];
    octets[0] = count_bits | slot;
    octets[1 .. 1 + chunk.data.len()].copy_from_slice(&chunk.data);

    Ok(format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]))
}


/// Something that can go wrong deciphering or building an answer value.
#[derive(PartialEq, Debug, Clone)]
pub enum ChunkError {

    /// The answer value did not have exactly four dot-separated octets.
    WrongOctetCount {

        /// How many octets it did have.
        count: usize,
    },

    /// An octet was not a decimal integer within `[0,255]`.
    OctetOutOfRange {

        /// One-based position of the offending octet.
        index: usize,

        /// The text that failed to parse.
        octet: String,
    },

    /// Only one to three payload bytes fit in an answer value.
    UnencodablePayload {

        /// How many bytes were offered.
        length: usize,
    },

    /// Chunk offsets are carried in units of three bytes.
    MisalignedOffset {

        /// The offending offset.
        offset: usize,
    },

    /// The offset does not fit in the six offset bits of the first octet.
    OffsetOutOfRange {

        /// The offending offset.
        offset: usize,
    },
}


#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn three_byte_chunk() {
        // 192 == 11000000: three payload bytes at offset 0
        assert_eq!(ipv4_to_chunk("192.168.0.0"),
                   Ok(DataChunk::new(vec![ 0xa8, 0x00, 0x00 ], 0)));
    }

    #[test]
    fn two_byte_chunk() {
        // 129 == 10000001: two payload bytes at offset 3, last octet ignored
        assert_eq!(ipv4_to_chunk("129.63.3.8"),
                   Ok(DataChunk::new(vec![ 0x3f, 0x03 ], 3)));
    }

    #[test]
    fn one_byte_chunk() {
        // 66 == 01000010: one payload byte at offset 6, last two octets ignored
        assert_eq!(ipv4_to_chunk("66.91.9.70"),
                   Ok(DataChunk::new(vec![ 0x5b ], 6)));
    }

    #[test]
    fn bytes_only() {
        assert_eq!(ipv4_to_bytes("192.168.0.0"), Ok(vec![ 0xa8, 0x00, 0x00 ]));
        assert_eq!(ipv4_to_bytes("129.63.3.8"),  Ok(vec![ 0x3f, 0x03 ]));
        assert_eq!(ipv4_to_bytes("66.91.9.70"),  Ok(vec![ 0x5b ]));
    }

    #[test]
    fn empty_chunk() {
        // 63 == 00111111: no payload bytes, offset 189
        assert_eq!(ipv4_to_chunk("63.1.2.3"),
                   Ok(DataChunk::new(vec![], 189)));
    }

    #[test]
    fn too_few_octets() {
        assert_eq!(ipv4_to_chunk("1.2.3"),
                   Err(ChunkError::WrongOctetCount { count: 3 }));
    }

    #[test]
    fn too_many_octets() {
        assert_eq!(ipv4_to_chunk("1.2.3.4.5"),
                   Err(ChunkError::WrongOctetCount { count: 5 }));
    }

    #[test]
    fn empty_string() {
        assert_eq!(ipv4_to_chunk(""),
                   Err(ChunkError::WrongOctetCount { count: 1 }));
    }

    #[test]
    fn octet_too_big() {
        assert_eq!(ipv4_to_chunk("127.256.0.1"),
                   Err(ChunkError::OctetOutOfRange { index: 2, octet: "256".into() }));
    }

    #[test]
    fn octet_negative() {
        assert_eq!(ipv4_to_chunk("-1.128.0.1"),
                   Err(ChunkError::OctetOutOfRange { index: 1, octet: "-1".into() }));
    }

    #[test]
    fn octet_way_too_big() {
        assert_eq!(ipv4_to_chunk("1.128.300.1"),
                   Err(ChunkError::OctetOutOfRange { index: 3, octet: "300".into() }));
        assert_eq!(ipv4_to_chunk("1.128.64.1999"),
                   Err(ChunkError::OctetOutOfRange { index: 4, octet: "1999".into() }));
    }

    #[test]
    fn encodes_with_padding() {
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 0xa8, 0x00, 0x00 ], 0)).unwrap(),
                   "192.168.0.0");
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 0x3f, 0x03 ], 3)).unwrap(),
                   "129.63.3.255");
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 0x5b ], 6)).unwrap(),
                   "66.91.255.255");
    }

    #[test]
    fn unencodable_chunks() {
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![], 0)),
                   Err(ChunkError::UnencodablePayload { length: 0 }));
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 0; 4 ], 0)),
                   Err(ChunkError::UnencodablePayload { length: 4 }));
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 1 ], 4)),
                   Err(ChunkError::MisalignedOffset { offset: 4 }));
        assert_eq!(chunk_to_ipv4(&DataChunk::new(vec![ 1 ], 189)),
                   Err(ChunkError::OffsetOutOfRange { offset: 189 }));
    }

    #[test]
    fn round_trips() {
        // Every encodable chunk survives the round trip: one to three
        // payload bytes at every offset the six bits can carry.
        for count in 1 ..= 3 {
            for slot in 0 .. 63 {
                let data = (0 .. count).map(|i| (slot ^ (i * 85)) as u8).collect::<Vec<_>>();
                let chunk = DataChunk::new(data, slot * 3);
                let addr = chunk_to_ipv4(&chunk).unwrap();
                assert_eq!(ipv4_to_chunk(&addr), Ok(chunk));
            }
        }
    }
}
