//! Postcard wire encoding for envelopes.
//!
//! [`encode`]/[`decode`] are what the in-process transport uses; the
//! length-delimited [`EnvelopeCodec`] serves byte-stream transports.

use std::{fmt, io};

use bytes::{Bytes, BytesMut};
use error_stack::Report;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::messages::Envelope;

/// Error from envelope serialize/deserialize.
#[derive(Debug)]
pub struct WireError;

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("envelope encoding failed")
    }
}

impl std::error::Error for WireError {}

/// Serialize an envelope to its postcard wire form.
///
/// # Errors
///
/// Returns [`WireError`] if postcard serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, Report<WireError>> {
    let bytes = postcard::to_allocvec(envelope)
        .map_err(|e| Report::new(WireError).attach(e.to_string()))?;
    Ok(Bytes::from(bytes))
}

/// Deserialize an envelope from its postcard wire form.
///
/// # Errors
///
/// Returns [`WireError`] if the bytes are not a valid envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, Report<WireError>> {
    postcard::from_bytes(bytes).map_err(|e| Report::new(WireError).attach(e.to_string()))
}

fn new_length_delimited_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(16 * 1024 * 1024)
        .new_codec()
}

/// Length-delimited framing with postcard serialization of [`Envelope`]s,
/// for transports that speak byte streams.
#[derive(Debug)]
pub struct EnvelopeCodec {
    inner: LengthDelimitedCodec,
}

impl Clone for EnvelopeCodec {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Max frame length: 16 MB.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: new_length_delimited_codec(),
        }
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let envelope = postcard::from_bytes(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = postcard::to_allocvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(bytes), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::{Accepted, Ballot};
    use crate::messages::{Payload, Role};

    fn sample() -> Envelope {
        Envelope::new(
            7,
            Role::ToLeader,
            Payload::Promise {
                ballot: Ballot {
                    number: 3,
                    pid: "p2".into(),
                },
                accepted: Accepted {
                    value: Some(Bytes::from_static(b"cmd")),
                    ballot: Ballot {
                        number: 1,
                        pid: "p1".into(),
                    },
                },
            },
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        let envelope = sample();
        let wire = encode(&envelope).unwrap();
        assert_eq!(decode(&wire).unwrap(), envelope);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn framed_round_trip() {
        let envelope = sample();
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope.clone(), &mut buf).unwrap();
        codec
            .encode(
                Envelope::new(
                    8,
                    Role::ToLearners,
                    Payload::Decide {
                        value: Bytes::from_static(b"x"),
                    },
                ),
                &mut buf,
            )
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(envelope));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.instance, 8);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame_yields_none() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
    }
}
