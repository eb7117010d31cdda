//! Stream framing shared by the serial and WiFi links:
//! `0xA5 0x5A | len: u16 LE | body[len]`.
//!
//! A body ends in the XOR of its preceding bytes, so XOR over the whole body
//! is zero. Candidates that fail this are not frames.

use common::TransportError;
use log::debug;
use std::io::{ErrorKind, Read};

pub const SYNC: [u8; 2] = [0xA5, 0x5A];
pub const HEADER_LEN: usize = 4;
/// Smallest body the decoder can accept (no channel values).
pub const MIN_BODY_LEN: usize = 9;

const READ_CHUNK: usize = 512;

/// Wraps a body in sync bytes and a length prefix.
pub fn frame_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&SYNC);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Pulls frame bodies out of a byte stream, resynchronizing on garbage.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    skipped: usize,
    max_frame_len: usize,
    max_scan_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: usize, max_scan_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(HEADER_LEN + max_frame_len),
            skipped: 0,
            max_frame_len: max_frame_len.min(u16::MAX as usize),
            max_scan_bytes,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Next complete body. `Ok(None)` when the underlying read timed out
    /// before one was available.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(body) = self.extract()? {
                return Ok(Some(body));
            }
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn extract(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.buf.windows(2).position(|w| w == SYNC) {
                Some(pos) => self.skip(pos)?,
                None => {
                    // A trailing 0xA5 may be the first half of a sync.
                    let keep = usize::from(self.buf.last() == Some(&SYNC[0]));
                    self.skip(self.buf.len() - keep)?;
                    return Ok(None);
                }
            }

            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            let len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
            if !(MIN_BODY_LEN..=self.max_frame_len).contains(&len) {
                // Sync bytes that happened to appear inside garbage.
                self.skip(1)?;
                continue;
            }
            if self.buf.len() < HEADER_LEN + len {
                return Ok(None);
            }

            let body = &self.buf[HEADER_LEN..HEADER_LEN + len];
            if body.iter().fold(0u8, |acc, b| acc ^ b) != 0 {
                // A truncated frame whose length field reaches into the
                // next frames. Rescan from the byte after its sync.
                debug!("Dropping frame candidate of {} bytes with a bad checksum", len);
                self.skip(1)?;
                continue;
            }

            let body = body.to_vec();
            self.buf.drain(..HEADER_LEN + len);
            self.skipped = 0;
            return Ok(Some(body));
        }
    }

    fn skip(&mut self, n: usize) -> Result<(), TransportError> {
        if n == 0 {
            return Ok(());
        }
        self.buf.drain(..n);
        self.skipped += n;
        if self.skipped > self.max_scan_bytes {
            let skipped = self.skipped;
            self.skipped = 0;
            return Err(TransportError::Desync { skipped });
        }
        Ok(())
    }
}
