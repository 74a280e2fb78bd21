//! One-byte read-ahead over an async byte stream.

use embedded_io_async::{ErrorType, Read, Write};

/// Byte stream that can wait for inbound data without losing it.
///
/// [`fill`](Self::fill) keeps the byte it waited for and the next `read`
/// hands it out first. Dropping a pending `fill` leaves the stream untouched
/// as long as the inner `read` only consumes data when it completes.
#[derive(Debug)]
pub struct ReadAhead<S> {
    inner: S,
    stash: Option<u8>,
}

impl<S> ReadAhead<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner, stash: None }
    }

    pub fn has_buffered(&self) -> bool {
        self.stash.is_some()
    }
}

impl<S: Read> ReadAhead<S> {
    /// Waits until at least one byte is available. `Ok(false)` is end of stream.
    pub async fn fill(&mut self) -> Result<bool, S::Error> {
        if self.stash.is_some() {
            return Ok(true);
        }
        let mut byte = [0u8; 1];
        if self.inner.read(&mut byte).await? == 0 {
            return Ok(false);
        }
        self.stash = Some(byte[0]);
        Ok(true)
    }
}

impl<S: ErrorType> ErrorType for ReadAhead<S> {
    type Error = S::Error;
}

impl<S: Read> Read for ReadAhead<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(first) = buf.first_mut() else {
            return Ok(0);
        };
        match self.stash.take() {
            Some(byte) => {
                *first = byte;
                Ok(1)
            }
            None => self.inner.read(buf).await,
        }
    }
}

impl<S: Write> Write for ReadAhead<S> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush().await
    }
}
