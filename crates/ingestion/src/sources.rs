//! Byte sources
//!
//! Concrete transports behind the [`ByteSource`] trait. Serial ports and radio
//! modules plug in the same way from outside this crate.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;

use contracts::{ByteSource, ContractError, SourceConfig, SourceKind};
use tracing::info;

/// Any blocking reader
///
/// Reads are passed straight through; `Ok(0)` from the reader means closed.
pub struct ReaderSource<R> {
    name: String,
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    /// Wrap a reader
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Process standard input
pub type StdinSource = ReaderSource<io::Stdin>;

/// Regular file or named pipe
pub type FileSource = ReaderSource<File>;

/// TCP client connection with a read timeout
///
/// The timeout makes reads return `WouldBlock`/`TimedOut` periodically so the
/// extractor can notice a stop request.
pub type TcpSource = ReaderSource<TcpStream>;

/// Open the source named by configuration
///
/// # Errors
/// `SourceUnavailable` when the transport cannot be opened. This is the only
/// fatal ingestion error and is surfaced at startup.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn ByteSource>, ContractError> {
    let unavailable = |message: String| ContractError::source_unavailable(&config.name, message);

    match config.kind {
        SourceKind::Stdin => {
            info!(source = %config.name, "reading from stdin");
            Ok(Box::new(StdinSource::new(&config.name, io::stdin())))
        }
        SourceKind::File => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| unavailable("no path configured".to_string()))?;
            let file = File::open(path)
                .map_err(|e| unavailable(format!("cannot open {}: {e}", path.display())))?;
            info!(source = %config.name, path = %path.display(), "opened file source");
            Ok(Box::new(FileSource::new(&config.name, file)))
        }
        SourceKind::Tcp => {
            let addr = config
                .addr
                .as_deref()
                .ok_or_else(|| unavailable("no addr configured".to_string()))?;
            let stream = TcpStream::connect(addr)
                .map_err(|e| unavailable(format!("cannot connect to {addr}: {e}")))?;
            stream
                .set_read_timeout(Some(config.read_timeout()))
                .map_err(|e| unavailable(format!("cannot set read timeout: {e}")))?;
            info!(source = %config.name, addr = %addr, "connected tcp source");
            Ok(Box::new(TcpSource::new(&config.name, stream)))
        }
    }
}

enum Chunk {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

/// In-memory source for tests and replays
///
/// Yields its chunks in order (never merging two chunks into one read), then
/// reports closed. Injected errors are returned once each.
pub struct MemorySource {
    name: String,
    chunks: VecDeque<Chunk>,
}

impl MemorySource {
    /// Source yielding `data`, then closed
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let mut source = Self {
            name: name.into(),
            chunks: VecDeque::new(),
        };
        source.push_chunk(data);
        source
    }

    /// Source yielding each chunk as a separate read
    pub fn from_chunks(name: impl Into<String>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            chunks: chunks.into_iter().map(Chunk::Data).collect(),
        }
    }

    /// Append a chunk
    pub fn push_chunk(&mut self, data: impl Into<Vec<u8>>) {
        self.chunks.push_back(Chunk::Data(data.into()));
    }

    /// Append a one-shot read error
    pub fn push_error(&mut self, kind: io::ErrorKind) {
        self.chunks.push_back(Chunk::Error(kind));
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            None => Ok(0),
            Some(Chunk::Error(kind)) => Err(io::Error::new(kind, "injected read error")),
            Some(Chunk::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.chunks.push_front(Chunk::Data(data.split_off(n)));
                }
                if n == 0 && !self.chunks.is_empty() {
                    // Empty chunk: don't report closed while more is queued
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty chunk"));
                }
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_memory_source_splits_large_chunks() {
        let mut source = MemorySource::new("mem", vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 2);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 1);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file_is_unavailable() {
        let config = SourceConfig {
            name: "missing".into(),
            kind: SourceKind::File,
            path: Some("/nonexistent/sinknode/input.bin".into()),
            addr: None,
            read_timeout_ms: 100,
        };
        let err = open_source(&config).err().unwrap();
        assert!(matches!(err, ContractError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_open_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#hello$").unwrap();

        let config = SourceConfig {
            name: "file".into(),
            kind: SourceKind::File,
            path: Some(file.path().to_path_buf()),
            addr: None,
            read_timeout_ms: 100,
        };
        let mut source = open_source(&config).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 7);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_tcp_source_times_out_then_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let config = SourceConfig {
            name: "tcp".into(),
            kind: SourceKind::Tcp,
            path: None,
            addr: Some(addr.to_string()),
            read_timeout_ms: 50,
        };
        let mut source = open_source(&config).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        let err = source.read_bytes(&mut buf).unwrap_err();
        assert!(contracts::is_retryable(&err), "got: {err:?}");

        peer.write_all(b"abc").unwrap();
        drop(peer);

        let mut total = Vec::new();
        loop {
            match source.read_bytes(&mut buf) {
                Ok(0) => break,
                Ok(n) => total.extend_from_slice(&buf[..n]),
                Err(e) if contracts::is_retryable(&e) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(total, b"abc");
    }
}
