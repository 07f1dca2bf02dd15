// SPDX-License-Identifier: MIT

use core::ops::Range;

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// RAM-backed `BlockIO` over a borrowed byte slice.
///
/// With a non-zero base the handle acts as a window starting that many
/// bytes into the slice; everything before the base is unreachable
/// through it.
#[derive(Debug)]
pub struct MemBlockIO<'a> {
    data: &'a mut [u8],
    base: u64,
}

impl<'a> MemBlockIO<'a> {
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, base: 0 }
    }

    #[inline]
    pub fn with_base(data: &'a mut [u8], base: u64) -> Self {
        Self { data, base }
    }

    /// Resolves a transfer into an index range of the backing slice,
    /// refusing anything that overflows or reaches past the end.
    fn span(&self, offset: u64, len: usize) -> BlockIOResult<Range<usize>> {
        let start = self
            .base
            .checked_add(offset)
            .ok_or(BlockIOError::OutOfBounds)?;
        let end = start
            .checked_add(len as u64)
            .ok_or(BlockIOError::OutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(BlockIOError::OutOfBounds);
        }
        Ok(start as usize..end as usize)
    }
}

impl BlockIO for MemBlockIO<'_> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let span = self.span(offset, buf.len())?;
        buf.copy_from_slice(&self.data[span]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let span = self.span(offset, data.len())?;
        self.data[span].copy_from_slice(data);
        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut buf = [0u8; 256];
        let mut io = MemBlockIO::new(&mut buf);

        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        io.read_at(10, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn base_establishes_a_window() {
        let mut buf = [0u8; 128];
        {
            let mut view = MemBlockIO::with_base(&mut buf, 64);
            view.write_at(0, &[0xAB; 4]).unwrap();
            // The window ends with the slice.
            assert_eq!(
                view.write_at(64, &[0u8; 1]).unwrap_err(),
                BlockIOError::OutOfBounds
            );
        }
        assert_eq!(&buf[64..68], &[0xAB; 4]);
    }

    #[test]
    fn rejects_reads_past_the_end() {
        let mut buf = [0u8; 32];
        let mut io = MemBlockIO::new(&mut buf);
        let mut out = [0u8; 8];
        assert_eq!(
            io.read_at(28, &mut out).unwrap_err(),
            BlockIOError::OutOfBounds
        );
    }

    #[test]
    fn rejects_offset_overflow() {
        let mut buf = [0u8; 32];
        let mut io = MemBlockIO::with_base(&mut buf, 16);
        assert_eq!(
            io.write_at(u64::MAX, &[0u8; 1]).unwrap_err(),
            BlockIOError::OutOfBounds
        );
    }

    #[test]
    fn zero_length_transfer_is_fine() {
        let mut buf = [0u8; 8];
        let mut io = MemBlockIO::new(&mut buf);
        io.write_at(8, &[]).unwrap();
        io.read_at(8, &mut []).unwrap();
    }
}
