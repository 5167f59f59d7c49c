//! FastCGI record framing
//!
//! Every byte exchanged with a FastCGI application travels inside a record: an 8-byte header,
//! up to 65535 bytes of content, and up to 255 bytes of padding.
//!
//! Stream record types (`FCGI_PARAMS`, `FCGI_STDIN`, `FCGI_STDOUT`, ...) may carry more content
//! than fits in one record. Such payloads are split over several records and the end of the
//! stream is signalled with an empty record of the same type.

mod begin_request;
mod end_request;
pub mod pairs;
mod protocol_status;
mod role;

use crate::error::Error;
pub(crate) use begin_request::BeginRequest;
pub use end_request::EndRequest;
pub use protocol_status::ProtocolStatus;
pub(crate) use role::Role;

pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;
pub const MAX_PADDING_LEN: usize = u8::MAX as usize;

/// The type of a FastCGI record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
    /// A type byte this crate has no name for. Records of this type are skipped on read.
    Unrecognized(u8),
}

impl RecordType {
    pub fn id(&self) -> u8 {
        match self {
            Self::BeginRequest => 1,
            Self::AbortRequest => 2,
            Self::EndRequest => 3,
            Self::Params => 4,
            Self::Stdin => 5,
            Self::Stdout => 6,
            Self::Stderr => 7,
            Self::Data => 8,
            Self::GetValues => 9,
            Self::GetValuesResult => 10,
            Self::UnknownType => 11,
            Self::Unrecognized(id) => *id,
        }
    }

    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            other => Self::Unrecognized(other),
        }
    }
}

/// The fixed-size header that precedes every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

/// Serializes a record header.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if either length does not fit its header field.
pub fn encode_header(
    record_type: RecordType,
    request_id: u16,
    content_length: usize,
    padding_length: usize,
) -> Result<[u8; HEADER_LEN], Error> {
    let content_length = u16::try_from(content_length).map_err(|_| {
        Error::Encoding(format!(
            "content length {content_length} exceeds {MAX_CONTENT_LEN}"
        ))
    })?;
    let padding_length = u8::try_from(padding_length).map_err(|_| {
        Error::Encoding(format!(
            "padding length {padding_length} exceeds {MAX_PADDING_LEN}"
        ))
    })?;

    let [id_1, id_0] = request_id.to_be_bytes();
    let [len_1, len_0] = content_length.to_be_bytes();

    Ok([
        VERSION,
        record_type.id(),
        id_1,
        id_0,
        len_1,
        len_0,
        padding_length,
        0,
    ])
}

/// Parses a record header.
///
/// # Errors
///
/// Returns [`Error::Decoding`] if the header announces a protocol version other than 1.
pub fn decode_header(bytes: [u8; HEADER_LEN]) -> Result<Header, Error> {
    let [version, type_id, id_1, id_0, len_1, len_0, padding_length, _] = bytes;

    if version != VERSION {
        return Err(Error::Decoding(format!(
            "unsupported FastCGI version '{version}'"
        )));
    }

    Ok(Header {
        record_type: RecordType::from_id(type_id),
        request_id: u16::from_be_bytes([id_1, id_0]),
        content_length: u16::from_be_bytes([len_1, len_0]),
        padding_length,
    })
}

/// Returns how much padding a record carrying `content_len` bytes gets.
///
/// Records are padded so that header + content + padding is a multiple of 8.
pub fn padding_for(content_len: usize) -> usize {
    let unpadded_len = HEADER_LEN + content_len;
    let padded_len = unpadded_len.div_ceil(8) * 8;
    padded_len - unpadded_len
}

/// Appends a single record holding `content` to `out`
///
/// # Errors
///
/// Returns [`Error::Encoding`] if `content` is longer than [`MAX_CONTENT_LEN`]. Use
/// [`encode_stream`] for payloads that may be larger.
pub fn encode_record(
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), Error> {
    let padding = padding_for(content.len());
    let header = encode_header(record_type, request_id, content.len(), padding)?;

    out.reserve(HEADER_LEN + content.len() + padding);
    out.extend_from_slice(&header);
    out.extend_from_slice(content);
    out.resize(out.len() + padding, 0);
    Ok(())
}

/// Appends `content` to `out` as a record stream.
///
/// The content is split into as many records as needed, and is always followed by an empty
/// record which marks the end of the stream.
pub fn encode_stream(
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), Error> {
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        encode_record(record_type, request_id, chunk, out)?;
    }
    encode_record(record_type, request_id, &[], out)
}

/// A single record, as received from the wire
///
/// The padding is not kept around. Its content is meaningless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Vec<u8>,
}

impl Record {
    /// Parses the first record in `bytes`.
    ///
    /// Returns the record and the number of bytes it occupied (padding included), or `None` if
    /// `bytes` does not hold a complete record yet.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Record, usize)>, Error> {
        let Some(header) = bytes.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };
        let header = decode_header(*header)?;

        let content_end = HEADER_LEN + header.content_length as usize;
        let record_end = content_end + header.padding_length as usize;

        if bytes.len() < record_end {
            return Ok(None);
        }

        let record = Record {
            record_type: header.record_type,
            request_id: header.request_id,
            content: bytes[HEADER_LEN..content_end].to_vec(),
        };

        Ok(Some((record, record_end)))
    }
}
