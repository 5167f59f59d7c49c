//! Name-value pair encoding, used by `FCGI_PARAMS` records
use crate::error::Error;
use std::io::{Cursor, Read};

/// Decoded name-value pairs, in the order they appeared on the wire
pub type Pairs = Vec<(Vec<u8>, Vec<u8>)>;

// Lengths above this need the four byte encoding, which has 31 usable bits
const MAX_PAIR_LEN: usize = 0x7fff_ffff;

// The high-order bit of the first byte of a length indicates the length's encoding. A high-order
// zero implies a one-byte encoding, a one a four-byte encoding.
fn read_pair_len<R: Read>(reader: &mut R) -> Result<usize, Error> {
    let mut sentinel = [0u8; 1];

    reader
        .read_exact(&mut sentinel)
        .map_err(|_| Error::Decoding("truncated name-value pair length".into()))?;

    if sentinel[0] <= 127 {
        return Ok(sentinel[0] as usize);
    }

    let mut len_bytes = [sentinel[0] & 0b0111_1111, 0, 0, 0];
    reader
        .read_exact(&mut len_bytes[1..])
        .map_err(|_| Error::Decoding("truncated four byte name-value pair length".into()))?;

    Ok(u32::from_be_bytes(len_bytes) as usize)
}

fn write_pair_len(len: usize, out: &mut Vec<u8>) -> Result<(), Error> {
    if len <= 127 {
        out.push(len as u8);
        return Ok(());
    }

    if len > MAX_PAIR_LEN {
        return Err(Error::Encoding(format!(
            "name-value pair field of {len} bytes is too long"
        )));
    }

    let mut len_bytes = (len as u32).to_be_bytes();
    len_bytes[0] |= 0b1000_0000;
    out.extend_from_slice(&len_bytes);
    Ok(())
}

// FastCGI transmits a name-value pair as the length of the name, followed by the length of the
// value, followed by the name, followed by the value. Lengths of 127 bytes and less can be
// encoded in one byte, while longer lengths are always encoded in four bytes.
pub fn encode<I, K, V>(pairs: I) -> Result<Vec<u8>, Error>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut out = vec![];

    for (name, value) in pairs {
        let (name, value) = (name.as_ref(), value.as_ref());
        write_pair_len(name.len(), &mut out)?;
        write_pair_len(value.len(), &mut out)?;
        out.extend_from_slice(name);
        out.extend_from_slice(value);
    }

    Ok(out)
}

/// Decodes the concatenated content of a `FCGI_PARAMS` stream.
///
/// # Errors
///
/// Returns [`Error::Decoding`] if any declared length runs past the end of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Pairs, Error> {
    let len = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes);
    let mut pairs = vec![];

    while cursor.position() < len {
        let name_len = read_pair_len(&mut cursor)?;
        let value_len = read_pair_len(&mut cursor)?;

        let remaining = len - cursor.position();
        if (name_len as u64 + value_len as u64) > remaining {
            return Err(Error::Decoding(format!(
                "name-value pair of {name_len}+{value_len} bytes overruns the {remaining} bytes left"
            )));
        }

        let mut name = vec![0u8; name_len];
        let mut value = vec![0u8; value_len];

        cursor
            .read_exact(&mut name)
            .and_then(|_| cursor.read_exact(&mut value))
            .map_err(|_| Error::Decoding("truncated name-value pair".into()))?;

        pairs.push((name, value));
    }

    Ok(pairs)
}
