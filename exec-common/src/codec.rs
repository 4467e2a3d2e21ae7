//! The on-disk record encoding used by `WorkStorage` implementations: each
//! record is a little-endian 32-bit length prefix followed by that many bytes
//! of a `bincode`-serialised message. Concatenated records decode in order.
//! See `DESIGN.md` for why this crate uses `bincode` for the payload.

use std::io;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Maximum encoded message size the decoder will accept.
pub const DECODER_BUF_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("reading length prefix: {0}")]
    ReadLength(#[source] io::Error),
    #[error("message of {0} bytes exceeds the {DECODER_BUF_SIZE}-byte decoder buffer")]
    ShortBuffer(u32),
    #[error("reading message body: {0}")]
    ReadBody(#[source] io::Error),
    #[error("decoding message: {0}")]
    Decode(#[from] bincode::Error),
}

/// Serialize `message`, prefixed with its encoded size as a little-endian u32.
pub fn marshal_with_size<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(message)?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a sequence of length-prefixed records from a synchronous reader.
/// It is the caller's responsibility to treat an `io::ErrorKind::UnexpectedEof`
/// surfaced on the length-prefix read as a clean end of stream.
pub struct Decoder<R> {
    src: R,
    buf: Vec<u8>,
}

impl<R: io::Read> Decoder<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            buf: vec![0u8; DECODER_BUF_SIZE],
        }
    }

    /// Decode the next message, or `Ok(None)` on a clean end of stream.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        let mut lenbuf = [0u8; 4];
        match read_exact_or_eof(&mut self.src, &mut lenbuf) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(CodecError::ReadLength(e)),
        }

        let size = u32::from_le_bytes(lenbuf);
        if size as usize > DECODER_BUF_SIZE {
            return Err(CodecError::ShortBuffer(size));
        }

        let dst = &mut self.buf[..size as usize];
        self.src.read_exact(dst).map_err(CodecError::ReadBody)?;

        let message = bincode::deserialize(dst)?;
        Ok(Some(message))
    }
}

/// Like `Read::read_exact`, but returns `Ok(false)` instead of an error when
/// zero bytes could be read before EOF (a clean stream end), and still errors
/// on a partial read (a truncated record).
fn read_exact_or_eof<R: io::Read>(src: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match src.read(&mut buf[read..]) {
            Ok(0) => {
                if read == 0 {
                    return Ok(false);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated record",
                ));
            }
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_a_single_record() {
        let sample = Sample {
            a: 42,
            b: "hello".to_owned(),
        };
        let encoded = marshal_with_size(&sample).unwrap();

        let mut decoder = Decoder::new(encoded.as_slice());
        let decoded: Sample = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded, sample);

        assert!(decoder.decode::<Sample>().unwrap().is_none());
    }

    #[test]
    fn concatenated_records_decode_in_order() {
        let mut bytes = Vec::new();
        let samples = vec![
            Sample { a: 1, b: "one".into() },
            Sample { a: 2, b: "two".into() },
            Sample { a: 3, b: "three".into() },
        ];
        for sample in &samples {
            bytes.extend(marshal_with_size(sample).unwrap());
        }

        let mut decoder = Decoder::new(bytes.as_slice());
        for expected in &samples {
            let got: Sample = decoder.decode().unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert!(decoder.decode::<Sample>().unwrap().is_none());
    }

    #[test]
    fn oversize_message_is_a_short_buffer_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&((DECODER_BUF_SIZE as u32) + 1).to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(DECODER_BUF_SIZE + 1));

        let mut decoder = Decoder::new(bytes.as_slice());
        let err = decoder.decode::<Sample>().unwrap_err();
        assert!(matches!(err, CodecError::ShortBuffer(_)));
    }
}
