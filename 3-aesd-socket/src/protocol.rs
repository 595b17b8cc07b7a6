use std::io;

use aesd_char::SeekTo;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;
use tracing::debug;

/// Records starting with this tag reposition the echo instead of being stored.
pub const SEEK_COMMAND_PREFIX: &[u8] = b"AESDCHAR_IOCSEEKTO:";

/// Upper bound on one record, terminator included.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024 * 1024;

const TERMINATOR: u8 = b'\n';
const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record exceeds {max} bytes without a terminator")]
    TooLong { max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Splits a byte stream into newline-terminated records.
///
/// The terminator stays part of the record. Every terminator in a chunk ends a
/// record, so several records arriving in one read are yielded one by one.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    // Bytes before this index were already searched for a terminator.
    next_index: usize,
    max_length: usize,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_RECORD_LEN)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for RecordCodec {
    type Item = Bytes;
    type Error = RecordError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, RecordError> {
        let found = buf[self.next_index..]
            .iter()
            .position(|&byte| byte == TERMINATOR);

        match found {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                if end > self.max_length {
                    return Err(RecordError::TooLong {
                        max: self.max_length,
                    });
                }
                Ok(Some(buf.split_to(end).freeze()))
            }
            None if buf.len() > self.max_length => Err(RecordError::TooLong {
                max: self.max_length,
            }),
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, RecordError> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        if !buf.is_empty() {
            debug!(len = buf.len(), "discarding unterminated record at end of stream");
            buf.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

/// What a connection asks for with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Store the record and echo the whole log.
    Append(Bytes),
    /// Echo the log from a command index and offset onwards.
    Seek(SeekTo),
    /// A seek command whose arguments do not parse.
    Ignored,
}

impl Request {
    pub fn parse(record: Bytes) -> Self {
        if !record.starts_with(SEEK_COMMAND_PREFIX) {
            return Request::Append(record);
        }

        match parse_seek_args(&record[SEEK_COMMAND_PREFIX.len()..]) {
            Some(seek) => Request::Seek(seek),
            None => Request::Ignored,
        }
    }
}

fn parse_seek_args(args: &[u8]) -> Option<SeekTo> {
    let args = std::str::from_utf8(args).ok()?;
    let (write_cmd, write_cmd_offset) = args.trim_end_matches(LINE_ENDINGS).split_once(',')?;
    Some(SeekTo::new(
        parse_index(write_cmd)?,
        parse_index(write_cmd_offset)?,
    ))
}

// Digits only: `u32::from_str` would also take a leading `+`.
fn parse_index(field: &str) -> Option<u32> {
    let field = field.trim();
    if field.is_empty() || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(b"lo\n");
        let record = codec.decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(&record[..], b"hello\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_splits_on_every_terminator() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::from(&b"a\nbb\nccc"[..]);

        let first = codec.decode(&mut buf).expect("decode").expect("first");
        let second = codec.decode(&mut buf).expect("decode").expect("second");
        assert_eq!(&first[..], b"a\n");
        assert_eq!(&second[..], b"bb\n");
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert_eq!(&buf[..], b"ccc");
    }

    #[test]
    fn empty_record_is_just_the_terminator() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::from(&b"\n"[..]);
        let record = codec.decode(&mut buf).expect("decode").expect("record");
        assert_eq!(&record[..], b"\n");
    }

    #[test]
    fn decode_rejects_oversized_records() {
        let mut codec = RecordCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcde"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RecordError::TooLong { max: 4 })
        ));

        let mut codec = RecordCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcd\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RecordError::TooLong { max: 4 })
        ));
    }

    #[test]
    fn decode_eof_drops_partial_record() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::from(&b"no newline"[..]);
        assert!(codec.decode_eof(&mut buf).expect("decode_eof").is_none());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn framed_read_reassembles_records_across_chunks() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut records = FramedRead::new(reader, RecordCodec::new());

        writer.write_all(b"first ").await.expect("write");
        writer.write_all(b"record\nsecond\n").await.expect("write");
        writer.write_all(b"dangling").await.expect("write");
        drop(writer);

        let first = records.next().await.expect("first").expect("decode");
        let second = records.next().await.expect("second").expect("decode");
        assert_eq!(&first[..], b"first record\n");
        assert_eq!(&second[..], b"second\n");
        assert!(records.next().await.is_none());
    }

    #[test]
    fn parse_plain_record_is_append() {
        let record = Bytes::from_static(b"hello\n");
        assert_eq!(Request::parse(record.clone()), Request::Append(record));
    }

    #[test]
    fn parse_seek_command() {
        let request = Request::parse(Bytes::from_static(b"AESDCHAR_IOCSEEKTO:1,1\n"));
        assert_eq!(request, Request::Seek(SeekTo::new(1, 1)));

        let request = Request::parse(Bytes::from_static(b"AESDCHAR_IOCSEEKTO:12, 7\r\n"));
        assert_eq!(request, Request::Seek(SeekTo::new(12, 7)));
    }

    #[test]
    fn malformed_seek_command_is_ignored() {
        for record in [
            &b"AESDCHAR_IOCSEEKTO:\n"[..],
            b"AESDCHAR_IOCSEEKTO:1\n",
            b"AESDCHAR_IOCSEEKTO:-1,0\n",
            b"AESDCHAR_IOCSEEKTO:+1,0\n",
            b"AESDCHAR_IOCSEEKTO:1,+0\n",
            b"AESDCHAR_IOCSEEKTO:1,\n",
            b"AESDCHAR_IOCSEEKTO:4294967296,0\n",
            b"AESDCHAR_IOCSEEKTO:a,b\n",
            b"AESDCHAR_IOCSEEKTO:1,2,3\n",
            b"AESDCHAR_IOCSEEKTO:\xff,0\n",
        ] {
            assert_eq!(
                Request::parse(Bytes::copy_from_slice(record)),
                Request::Ignored,
                "{:?}",
                String::from_utf8_lossy(record)
            );
        }
    }

    #[test]
    fn tag_must_lead_the_record() {
        let record = Bytes::from_static(b"say AESDCHAR_IOCSEEKTO:1,1\n");
        assert_eq!(Request::parse(record.clone()), Request::Append(record));
    }
}
