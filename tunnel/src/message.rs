//! The message model: classifying and normalising parsed queries.

use std::collections::BTreeMap;

use log::*;

use crate::chunk::{ChunkError, DataChunk};


/// The protocol verbs, deduced from the set of variables a query carries.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum Verb {

    /// Opens an exchange, declaring the request length and a random
    /// number. The answer payload carries the freshly assigned ticket id.
    OpenTicket,

    /// Uploads one 30-byte window of request bytes, hex-encoded in the
    /// name itself.
    RequestData,

    /// Polls whether the server has finished handling the request.
    CheckRequest,

    /// Downloads one three-byte chunk of a 48-byte response segment.
    FetchResponse,

    /// Ends the exchange.
    CloseTicket,

    /// A name that parses but carries none of the known variable sets.
    Unknown,
}


/// A variable's value after normalisation.
#[derive(PartialEq, Debug, Clone)]
pub enum Value {

    /// The unsigned integer variables: `id`, `sz`, `rn`, `wr`, `ck`,
    /// `ln`, `rd`, and `retry`.
    Int(u32),

    /// Raw bytes, hex-decoded from the name: `bf`.
    Bytes(Vec<u8>),

    /// A boolean carried by the bare presence of a flag label, such as
    /// `ac`.
    Flag(bool),

    /// Any other variable keeps the text it arrived as.
    Text(String),
}

impl Value {

    /// The integer carried by this value, if it is one.
    pub fn as_int(&self) -> Option<u32> {
        match self {
            Self::Int(number) => Some(*number),
            _                 => None,
        }
    }

    /// The bytes carried by this value, if it holds any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            _                 => None,
        }
    }
}


/// One parsed and classified tunnel query, together with the payload
/// chunk decoded from its answer.
#[derive(PartialEq, Debug, Clone)]
pub struct Message {
    version: String,
    verb: Verb,
    variables: BTreeMap<String, Value>,
    payload: DataChunk,
}


/// The variables that normalise to unsigned integers.
const INT_VARIABLES: &[&str] = &[ "id", "sz", "rn", "wr", "ck", "ln", "rd", "retry" ];

/// The order labels are emitted in on encode, so that a message has
/// exactly one wire rendering.
const ENCODE_ORDER: &[&str] = &[ "retry", "sz", "rn", "bf", "wr", "ck", "ln", "rd", "ac", "id" ];

/// The only protocol revision this crate speaks.
const KNOWN_VERSION: &str = "0";


impl Message {

    /// Builds a message from raw name labels: flag labels carry no value,
    /// variable labels carry their textual one. Values are normalised to
    /// their semantic types exactly once, here, and the verb is
    /// classified from the resulting key set.
    pub fn assemble(version: &str,
                    labels: Vec<(String, Option<String>)>,
                    payload: DataChunk)
        -> Result<Self, ParseError>
    {
        if version != KNOWN_VERSION {
            return Err(ParseError::UnknownVersion { version: version.to_owned() });
        }

        let mut variables = BTreeMap::new();
        for (name, value) in labels {
            let value = match value {
                Some(text) => normalise(&name, text)?,
                None       => Value::Flag(true),
            };

            variables.insert(name, value);
        }

        Ok(Self::create(version, variables, payload))
    }

    /// Builds a message from already-typed variables, classifying the
    /// verb from the key set. The caller provides the version token.
    pub fn create(version: &str, variables: BTreeMap<String, Value>, payload: DataChunk) -> Self {
        let verb = classify(&variables);
        trace!("Classified key set as {:?}", verb);

        Self {
            version: version.to_owned(),
            verb,
            variables,
            payload,
        }
    }

    /// The version token from the name's version label.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The classified verb.
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// The normalised variable map.
    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Looks up one variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Whether a variable of the given name is present at all.
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// The integer value of the given variable, if present and numeric.
    pub fn int_variable(&self, name: &str) -> Option<u32> {
        self.variables.get(name).and_then(Value::as_int)
    }

    /// The byte value of the given variable, if present and byte-typed.
    pub fn bytes_variable(&self, name: &str) -> Option<&[u8]> {
        self.variables.get(name).and_then(Value::as_bytes)
    }

    /// The payload chunk decoded from the answer.
    pub fn payload(&self) -> &DataChunk {
        &self.payload
    }

    /// The error code carried by a two-byte `E`-sentinel payload, if the
    /// payload is one. Code 0 is the success marker.
    ///
    /// FetchResponse payloads are opaque byte windows that may begin with
    /// `E` by coincidence, so callers looking at that verb must expect
    /// false positives; the ticket engine ignores the sentinel there
    /// unless configured otherwise.
    pub fn error(&self) -> Option<u8> {
        if self.payload.data.len() == 2 && self.payload.data[0] == b'E' {
            Some(self.payload.data[1])
        }
        else {
            None
        }
    }

    /// The name labels of this message in wire order.
    pub(crate) fn wire_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();

        for &name in ENCODE_ORDER {
            let value = match self.variables.get(name) {
                Some(value) => value,
                None        => continue,
            };

            labels.push(match value {
                Value::Flag(_)                      => name.to_owned(),
                Value::Int(number) if name == "retry" => format!("retry-{}", number),
                Value::Int(number)                  => format!("{}-{:08}", name, number),
                Value::Bytes(data)                  => format!("{}-{}", name, hex::encode(data)),
                Value::Text(text)                   => format!("{}-{}", name, text),
            });
        }

        labels
    }
}


/// Coerces one textual variable value to its semantic type.
fn normalise(name: &str, text: String) -> Result<Value, ParseError> {
    if INT_VARIABLES.contains(&name) {
        match text.parse() {
            Ok(number) => Ok(Value::Int(number)),
            Err(_) => {
                debug!("Variable {:?} has non-numeric value {:?}", name, text);
                Err(ParseError::InvalidValue { variable: name.to_owned(), value: text })
            }
        }
    }
    else if name == "bf" {
        match hex::decode(&text) {
            Ok(data) => Ok(Value::Bytes(data)),
            Err(_) => {
                debug!("Variable bf has non-hex value {:?}", text);
                Err(ParseError::InvalidValue { variable: name.to_owned(), value: text })
            }
        }
    }
    else {
        Ok(Value::Text(text))
    }
}


/// Deduces the verb from the variable key set. `retry` is informational
/// and never takes part.
fn classify(variables: &BTreeMap<String, Value>) -> Verb {
    let keys: Vec<&str> = variables.keys()
                                   .map(String::as_str)
                                   .filter(|&key| key != "retry")
                                   .collect();

    // The map iterates its keys in sorted order, so each verb's key set
    // has exactly one spelling here.
    match keys.as_slice() {
        [ "id", "rn", "sz" ] => Verb::OpenTicket,
        [ "bf", "id", "wr" ] => Verb::RequestData,
        [ "ck", "id" ]       => Verb::CheckRequest,
        [ "id", "ln", "rd" ] => Verb::FetchResponse,
        [ "ac", "id" ]       => Verb::CloseTicket,
        _                    => Verb::Unknown,
    }
}


/// Something that can go wrong turning a DNS record into a message.
#[derive(PartialEq, Debug, Clone)]
pub enum ParseError {

    /// The query name does not match the tunnel grammar.
    MalformedName {

        /// The name that failed to match.
        fqdn: String,
    },

    /// The answer value is not a well-formed IPv4 address.
    Answer(ChunkError),

    /// The version label names a protocol revision this crate does not
    /// speak.
    UnknownVersion {

        /// The version token found in the name.
        version: String,
    },

    /// A variable's value does not parse as its expected type.
    InvalidValue {

        /// The variable whose value was unusable.
        variable: String,

        /// The text that failed to parse.
        value: String,
    },
}

impl From<ChunkError> for ParseError {
    fn from(error: ChunkError) -> Self {
        Self::Answer(error)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries.iter()
               .map(|(name, value)| ((*name).to_owned(), value.clone()))
               .collect()
    }

    fn labelled(entries: &[(&str, Option<&str>)]) -> Vec<(String, Option<String>)> {
        entries.iter()
               .map(|(name, value)| ((*name).to_owned(), value.map(str::to_owned)))
               .collect()
    }

    #[test]
    fn classifies_open_ticket() {
        let labels = labelled(&[ ("sz", Some("44")),
                                 ("rn", Some("12345678")),
                                 ("id", Some("00000001")),
                                 ("retry", Some("1")) ]);
        let message = Message::assemble("0", labels, DataChunk::new(vec![ 0x01 ], 0)).unwrap();

        assert_eq!(message.verb(), Verb::OpenTicket);
        assert_eq!(message.int_variable("sz"), Some(44));
        assert_eq!(message.int_variable("retry"), Some(1));
    }

    #[test]
    fn classifies_close_ticket() {
        let labels = labelled(&[ ("ac", None),
                                 ("id", Some("98765432")),
                                 ("retry", Some("1")) ]);
        let message = Message::assemble("0", labels, DataChunk::new(vec![ 0x01 ], 0)).unwrap();

        assert_eq!(message.verb(), Verb::CloseTicket);
        assert_eq!(message.variable("ac"), Some(&Value::Flag(true)));
    }

    #[test]
    fn classifies_request_data() {
        let labels = labelled(&[ ("bf", Some("cafe")),
                                 ("wr", Some("00000030")),
                                 ("id", Some("11695062")) ]);
        let message = Message::assemble("0", labels, DataChunk::new(vec![ b'E', 0x00 ], 0)).unwrap();

        assert_eq!(message.verb(), Verb::RequestData);
        assert_eq!(message.bytes_variable("bf"), Some(&[ 0xca, 0xfe ][..]));
        assert_eq!(message.int_variable("wr"), Some(30));
    }

    #[test]
    fn classifies_check_and_fetch() {
        let check = Message::assemble("0",
                                      labelled(&[ ("ck", Some("1")), ("id", Some("7")) ]),
                                      DataChunk::new(vec![ 0x01 ], 0)).unwrap();
        assert_eq!(check.verb(), Verb::CheckRequest);

        let fetch = Message::assemble("0",
                                      labelled(&[ ("ln", Some("48")), ("rd", Some("96")), ("id", Some("7")) ]),
                                      DataChunk::new(vec![ 0x01, 0x02, 0x03 ], 3)).unwrap();
        assert_eq!(fetch.verb(), Verb::FetchResponse);
    }

    #[test]
    fn unknown_key_sets() {
        let message = Message::assemble("0",
                                        labelled(&[ ("zz", Some("1")), ("id", Some("7")) ]),
                                        DataChunk::new(vec![ 0x01 ], 0)).unwrap();
        assert_eq!(message.verb(), Verb::Unknown);
        assert_eq!(message.variable("zz"), Some(&Value::Text("1".into())));

        // An unexpected extra variable spoils an otherwise known set.
        let message = Message::assemble("0",
                                        labelled(&[ ("ck", Some("1")), ("id", Some("7")), ("zz", Some("1")) ]),
                                        DataChunk::new(vec![ 0x01 ], 0)).unwrap();
        assert_eq!(message.verb(), Verb::Unknown);
    }

    #[test]
    fn retry_never_classifies() {
        let with = Message::create("0",
                                   vars(&[ ("ck", Value::Int(1)), ("id", Value::Int(7)),
                                           ("retry", Value::Int(3)) ]),
                                   DataChunk::new(vec![ 0x01 ], 0));
        let without = Message::create("0",
                                      vars(&[ ("ck", Value::Int(1)), ("id", Value::Int(7)) ]),
                                      DataChunk::new(vec![ 0x01 ], 0));

        assert_eq!(with.verb(), Verb::CheckRequest);
        assert_eq!(with.verb(), without.verb());
    }

    #[test]
    fn unknown_version() {
        assert_eq!(Message::assemble("1", labelled(&[ ("id", Some("7")) ]),
                                     DataChunk::new(vec![ 0x01 ], 0)),
                   Err(ParseError::UnknownVersion { version: "1".into() }));
    }

    #[test]
    fn invalid_values() {
        assert_eq!(Message::assemble("0", labelled(&[ ("id", Some("seven")) ]),
                                     DataChunk::new(vec![ 0x01 ], 0)),
                   Err(ParseError::InvalidValue { variable: "id".into(), value: "seven".into() }));

        assert_eq!(Message::assemble("0", labelled(&[ ("bf", Some("xyz")), ("wr", Some("0")), ("id", Some("7")) ]),
                                     DataChunk::new(vec![ 0x01 ], 0)),
                   Err(ParseError::InvalidValue { variable: "bf".into(), value: "xyz".into() }));
    }

    #[test]
    fn error_sentinels() {
        let errored = Message::create("0", BTreeMap::new(), DataChunk::new(vec![ b'E', 0x10 ], 0));
        assert_eq!(errored.error(), Some(0x10));

        let success = Message::create("0", BTreeMap::new(), DataChunk::new(vec![ b'E', 0x00 ], 0));
        assert_eq!(success.error(), Some(0x00));

        // Only exactly-two-byte payloads are sentinels.
        let opaque = Message::create("0", BTreeMap::new(), DataChunk::new(vec![ b'E', 0x10, 0x20 ], 0));
        assert_eq!(opaque.error(), None);

        let other = Message::create("0", BTreeMap::new(), DataChunk::new(vec![ 0x45 ], 0));
        assert_eq!(other.error(), None);
    }
}
