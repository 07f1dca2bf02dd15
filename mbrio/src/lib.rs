// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

//! Minimal positioned block I/O for the mbred disk tools.
//!
//! A backend exposes random-access byte transfers through [`BlockIO`];
//! where a view onto a sub-range of a device is needed (a partition, a
//! chain sector), the backend establishes that window at construction
//! time instead of carrying a movable offset in the trait.

pub mod errors;

#[cfg(feature = "mem")]
mod mem;

#[cfg(feature = "std")]
mod std_io;

use errors::*;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub mod prelude {
    pub use super::errors::*;
    pub use super::BlockIO;
    pub use super::BlockIOStructExt;

    #[cfg(feature = "mem")]
    pub use super::mem::MemBlockIO;

    #[cfg(feature = "std")]
    pub use super::std_io::StdBlockIO;
}

/// Random-access byte I/O at absolute offsets.
///
/// Implementations exist for RAM buffers, files and raw block devices.
/// A transfer either completes fully or fails; there are no partial
/// reads or writes.
pub trait BlockIO {
    /// Fills `buf` from the storage starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Writes all of `data` to the storage starting at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult;

    /// Pushes buffered data to the backend (may be a no-op).
    fn flush(&mut self) -> BlockIOResult;
}

/// Typed transfers of on-disk structures, built on zerocopy.
///
/// The value is materialized zeroed and its own byte representation is
/// used as the transfer buffer, so no intermediate scratch space or
/// size cap is involved.
pub trait BlockIOStructExt: BlockIO {
    /// Reads one `T` from `offset`.
    fn read_struct<T>(&mut self, offset: u64) -> BlockIOResult<T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Immutable,
    {
        let mut value = T::new_zeroed();
        self.read_at(offset, value.as_mut_bytes())?;
        Ok(value)
    }

    /// Writes one `T` at `offset`.
    fn write_struct<T>(&mut self, offset: u64, value: &T) -> BlockIOResult
    where
        T: IntoBytes + KnownLayout + Immutable + ?Sized,
    {
        self.write_at(offset, value.as_bytes())
    }
}

impl<T: BlockIO + ?Sized> BlockIOStructExt for T {}

#[cfg(all(test, feature = "mem"))]
mod tests {
    use super::prelude::*;
    use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

    #[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
    #[repr(C, packed)]
    struct Record {
        tag: u8,
        count: u32,
    }

    #[test]
    fn struct_roundtrip() {
        let mut buf = [0u8; 64];
        let mut io = MemBlockIO::new(&mut buf);

        let record = Record {
            tag: 7,
            count: 0x11223344u32.to_le(),
        };
        io.write_struct(20, &record).unwrap();

        let read: Record = io.read_struct(20).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn struct_read_is_bounds_checked() {
        let mut buf = [0u8; 4];
        let mut io = MemBlockIO::new(&mut buf);
        assert!(io.read_struct::<Record>(0).is_err());
    }

    #[test]
    fn trait_object_access() {
        let mut buf = [0u8; 16];
        let mut io = MemBlockIO::new(&mut buf);
        let dynio: &mut dyn BlockIO = &mut io;
        dynio.write_at(0, &[9; 4]).unwrap();
        let mut out = [0u8; 4];
        dynio.read_at(0, &mut out).unwrap();
        assert_eq!(out, [9; 4]);
    }
}
