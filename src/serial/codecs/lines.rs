use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::serial::{error::SerialPortError, SerialMessageBytes};

/// This codec has a configurable delimiter character for reading.
///
/// When the delimiter is `\n`, a `\r` right before it is dropped as well,
/// so devices sending `\r\n` produce the same lines as devices sending `\n`.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
        }
    }

    fn trim_carriage_return(&self, mut line: SerialMessageBytes) -> SerialMessageBytes {
        if self.read_delimiter == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
        }
        line
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = SerialMessageBytes;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(self.trim_carriage_return(line.to_vec())))
        } else {
            // We did not find a full frame.
            // The next call gets the same buffer, possibly with more data,
            // so there is no need to look at these bytes again.
            self.cursor = read_to;

            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        self.cursor = 0;

        if src.is_empty() {
            Ok(None)
        } else {
            // The device went away mid-line. Hand out what we have.
            let line = src.split_to(src.len());
            Ok(Some(self.trim_carriage_return(line.to_vec())))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_line_waits_for_delimiter() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"hel"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"lo\nwor");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ld\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"world".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn carriage_return_is_stripped() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"OK\r\n\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"OK".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![]));
    }

    #[test]
    fn custom_delimiter_keeps_carriage_return() {
        let mut codec = LinesCodec::new(b';');
        let mut buf = BytesMut::from(&b"a\r;b;"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"a\r".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn eof_flushes_remainder() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"one\ntwo"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(b"one".to_vec()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(b"two".to_vec()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
