use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Transport(String),
    InvalidPayload,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// A type for reading server-sent events from a byte stream.
///
/// Only the `data` field is surfaced. Comments and other fields are
/// skipped, and multiple `data` lines of one event are joined with `\n`.
pub struct Sse {
    buf: String,
    // Trailing bytes of an UTF-8 sequence split across two chunks.
    undecoded: Vec<u8>,
    chunks: ByteStream,
}

impl Sse {
    #[inline]
    pub fn new(chunks: ByteStream) -> Self {
        Self {
            buf: String::new(),
            undecoded: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain complete events from the buffer before reading more.
            if let Some(data) = self.try_parse_event() {
                return Ok(Some(data));
            }

            let Some(chunk) = self.chunks.next().await.transpose()? else {
                // An unterminated trailing event is dropped.
                return Ok(None);
            };
            self.push_bytes(&chunk)?;
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.undecoded.extend_from_slice(bytes);
        let valid_up_to = match str::from_utf8(&self.undecoded) {
            Ok(s) => s.len(),
            // The chunk ends in the middle of a character.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let rest = self.undecoded.split_off(valid_up_to);
        let decoded = String::from_utf8(std::mem::replace(
            &mut self.undecoded,
            rest,
        ))
        .map_err(|_| Error::InvalidPayload)?;
        self.buf.push_str(&decoded.replace("\r\n", "\n"));
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<String> {
        loop {
            let eol_idx = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(..eol_idx + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => {
                        (field, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if field != "data" {
                    continue;
                }
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Events without data (keep-alive comments for example) are
            // skipped.
            if data.is_some() {
                return data;
            }
        }
    }
}
