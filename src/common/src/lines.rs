//! Line-by-line reading of object content streams.
//!
//! A line is everything up to and including `\n`; a trailing fragment
//! without `\n` is a final line of its own. Terminators are reported so a
//! writer can reproduce the input byte for byte.

use bytes::BytesMut;
use futures::StreamExt;

use crate::storage::{ByteStream, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Final line of an object that does not end with a newline
    None,
    Lf,
    CrLf,
}

impl Terminator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::None => b"",
            Terminator::Lf => b"\n",
            Terminator::CrLf => b"\r\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without its terminator
    pub content: BytesMut,
    pub terminator: Terminator,
}

pub struct LineReader {
    stream: ByteStream,
    buf: BytesMut,
    /// Bytes of `buf` already known to contain no `\n`
    scanned: usize,
    exhausted: bool,
}

impl LineReader {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            scanned: 0,
            exhausted: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<Line>, StorageError> {
        loop {
            if let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
                let mut content = self.buf.split_to(self.scanned + pos + 1);
                self.scanned = 0;
                content.truncate(content.len() - 1);
                let terminator = if content.last() == Some(&b'\r') {
                    content.truncate(content.len() - 1);
                    Terminator::CrLf
                } else {
                    Terminator::Lf
                };
                return Ok(Some(Line {
                    content,
                    terminator,
                }));
            }
            self.scanned = self.buf.len();

            if self.exhausted {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                self.scanned = 0;
                return Ok(Some(Line {
                    content: self.buf.split(),
                    terminator: Terminator::None,
                }));
            }

            match self.stream.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => self.exhausted = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn reader(chunks: &[&'static [u8]]) -> LineReader {
        let chunks: Vec<Result<Bytes, StorageError>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        LineReader::new(stream::iter(chunks).boxed())
    }

    async fn collect(mut reader: LineReader) -> Vec<(Vec<u8>, Terminator)> {
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push((line.content.to_vec(), line.terminator));
        }
        lines
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let lines = collect(reader(&[b"{\"a\"", b":1}\n{\"b\":2}\r", b"\nlast"])).await;
        assert_eq!(
            lines,
            vec![
                (b"{\"a\":1}".to_vec(), Terminator::Lf),
                (b"{\"b\":2}".to_vec(), Terminator::CrLf),
                (b"last".to_vec(), Terminator::None),
            ]
        );
    }

    #[tokio::test]
    async fn test_trailing_newline_adds_no_line() {
        let lines = collect(reader(&[b"a\nb\n"])).await;
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_lines_are_lines() {
        let lines = collect(reader(&[b"\n\n", b"x"])).await;
        assert_eq!(
            lines,
            vec![
                (Vec::new(), Terminator::Lf),
                (Vec::new(), Terminator::Lf),
                (b"x".to_vec(), Terminator::None),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_object_has_no_lines() {
        assert!(collect(reader(&[])).await.is_empty());
        assert!(collect(reader(&[b""])).await.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let chunks: Vec<Result<Bytes, StorageError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Other("connection reset".to_string())),
        ];
        let mut reader = LineReader::new(stream::iter(chunks).boxed());
        assert!(reader.next_line().await.is_err());
    }
}
