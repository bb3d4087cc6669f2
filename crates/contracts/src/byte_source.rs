//! ByteSource trait - the only thing the frame extractor knows about transports
//!
//! Serial ports, radios, pipes and sockets all reduce to "a sequential stream
//! of bytes that eventually closes or errors".

use std::io;

/// Sequential byte stream
///
/// # Read contract
/// - `Ok(0)`: the source is closed, no more bytes will ever arrive
/// - `Ok(n)`: `n` bytes were written to the front of `buf`
/// - `Err(e)` with kind `WouldBlock`, `TimedOut` or `Interrupted`: no data yet,
///   the caller polls again (this is what keeps `stop()` responsive)
/// - any other `Err(e)`: the source failed and is treated as closed
pub trait ByteSource: Send {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Read available bytes into `buf`
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_bytes(buf)
    }
}

/// Whether an IO error only means "nothing to read yet"
pub fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
