// SPDX-License-Identifier: MIT

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// `BlockIO` over any seekable stream (usually a `File`).
///
/// The stream position is cached between calls, so sequential transfers
/// skip the redundant seek; the cache is dropped whenever a transfer
/// fails midway and the real position is unknown.
#[derive(Debug)]
pub struct StdBlockIO<T: Read + Write + Seek> {
    inner: T,
    pos: Option<u64>,
}

impl<T: Read + Write + Seek> StdBlockIO<T> {
    #[inline]
    pub fn new(inner: T) -> Self {
        Self { inner, pos: None }
    }

    fn seek_to(&mut self, target: u64) -> BlockIOResult {
        if self.pos == Some(target) {
            return Ok(());
        }
        self.pos = None;
        self.inner.seek(SeekFrom::Start(target))?;
        self.pos = Some(target);
        Ok(())
    }
}

impl<T: Read + Write + Seek> BlockIO for StdBlockIO<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.seek_to(offset)?;
        self.pos = None;
        self.inner.read_exact(buf)?;
        self.pos = Some(offset + buf.len() as u64);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.seek_to(offset)?;
        self.pos = None;
        self.inner.write_all(data)?;
        self.pos = Some(offset + data.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.inner.flush()?;
        Ok(())
    }
}

impl From<std::io::Error> for BlockIOError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof => BlockIOError::OutOfBounds,
            ErrorKind::Unsupported => BlockIOError::Unsupported,
            _ => BlockIOError::Other("stream I/O failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn roundtrip() {
        let mut io = StdBlockIO::new(tempfile().unwrap());

        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        io.read_at(10, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn reading_past_eof_is_out_of_bounds() {
        let mut io = StdBlockIO::new(tempfile().unwrap());
        io.write_at(0, &[0u8; 16]).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(
            io.read_at(12, &mut out).unwrap_err(),
            BlockIOError::OutOfBounds
        );
    }

    #[test]
    fn sequential_transfers_reuse_the_cached_position() {
        let mut io = StdBlockIO::new(tempfile().unwrap());
        io.write_at(0, b"abcdefgh").unwrap();

        // Back-to-back reads, in order and out of order.
        let mut out = [0u8; 4];
        io.read_at(0, &mut out).unwrap();
        assert_eq!(&out, b"abcd");
        io.read_at(4, &mut out).unwrap();
        assert_eq!(&out, b"efgh");
        io.read_at(2, &mut out).unwrap();
        assert_eq!(&out, b"cdef");
    }

    #[test]
    fn writes_extend_the_file() {
        let mut io = StdBlockIO::new(tempfile().unwrap());
        io.write_at(4096, &[0x5A; 8]).unwrap();
        io.flush().unwrap();

        let mut out = [0u8; 8];
        io.read_at(4096, &mut out).unwrap();
        assert_eq!(out, [0x5A; 8]);
    }
}
