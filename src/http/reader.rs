use crate::errors::ErrorKind;
use memchr::memmem;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::sleep,
};

pub(crate) const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Fixed-size receive buffer for one request.
///
/// The header block is read first with [`read_head`](Reader::read_head);
/// the caller then decides whether the body is collected in place with
/// [`read_body`](Reader::read_body) or streamed elsewhere starting from
/// [`buffered_body`](Reader::buffered_body).
pub(crate) struct Reader {
    buffer: Box<[u8]>,
    len: usize,
    head_len: usize,
}

impl Reader {
    #[inline]
    pub(crate) fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0; buffer_size].into_boxed_slice(),
            len: 0,
            head_len: 0,
        }
    }

    /// Receives until `\r\n\r\n` is buffered and returns the header block,
    /// terminator included.
    ///
    /// The first read waits up to `first_read`, the following ones up to `read`.
    pub(crate) async fn read_head<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        first_read: Duration,
        read: Duration,
    ) -> Result<&[u8], ErrorKind> {
        let mut scanned = 0;
        let mut timeout = first_read;

        loop {
            if let Some(pos) = memmem::find(&self.buffer[scanned..self.len], HEAD_TERMINATOR) {
                self.head_len = scanned + pos + HEAD_TERMINATOR.len();
                return Ok(&self.buffer[..self.head_len]);
            }
            if self.len == self.buffer.len() {
                return Err(ErrorKind::HeadersTooLarge);
            }

            // The terminator may straddle two reads.
            scanned = self.len.saturating_sub(HEAD_TERMINATOR.len() - 1);
            self.fill(stream, timeout).await?;
            timeout = read;
        }
    }

    /// Receives until `content_length` body bytes follow the header block and
    /// returns exactly those bytes.
    pub(crate) async fn read_body<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        content_length: usize,
        timeout: Duration,
    ) -> Result<&[u8], ErrorKind> {
        let end = self
            .head_len
            .checked_add(content_length)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(ErrorKind::BodyTooLarge)?;

        while self.len < end {
            self.fill(stream, timeout).await?;
        }

        Ok(&self.buffer[self.head_len..end])
    }

    /// Body bytes that arrived together with the header block.
    #[inline]
    pub(crate) fn buffered_body(&self) -> &[u8] {
        &self.buffer[self.head_len..self.len]
    }

    async fn fill<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        time: Duration,
    ) -> Result<usize, ErrorKind> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                match read_result? {
                    0 => Err(ErrorKind::ConnectionClosed),
                    n => {
                        self.len += n;
                        Ok(n)
                    }
                }
            }
            _ = sleep(time) => Err(ErrorKind::Timeout),
        }
    }
}
