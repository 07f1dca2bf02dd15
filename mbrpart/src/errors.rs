// SPDX-License-Identifier: MIT

use core::fmt;

use crate::device::DeviceError;
use crate::registry::RegError;
use mbrio::errors::BlockIOError;

/// Unified error type for the partition engine.
///
/// The editor pre-checks return their typed variant without mutating any
/// state; I/O failures map to `Io`/`Registry` and leave the owning disk
/// `dirty` so a later writeback can retry.
#[derive(Debug, Clone)]
pub enum PartError {
    Io(DeviceError),
    Registry(RegError),
    /// The targeted region is already partitioned.
    NewPartition,
    /// The primary table is full, or the disk is a super-floppy.
    PartitionTableFull,
    /// A second extended container was requested on the same disk.
    OnlyOneExtended,
    /// The operation targets a GPT disk, which this engine will not mutate.
    WarnPartition,
    NotFound,
    Invalid(&'static str),
}

impl PartError {
    pub fn msg(&self) -> &'static str {
        match self {
            PartError::Io(e) => e.msg(),
            PartError::Registry(e) => e.msg(),
            PartError::NewPartition => "Region is already partitioned",
            PartError::PartitionTableFull => "Partition table is full",
            PartError::OnlyOneExtended => "Only one extended partition is allowed",
            PartError::WarnPartition => "GPT disks are not supported for mutation",
            PartError::NotFound => "No such disk or partition",
            PartError::Invalid(msg) => msg,
        }
    }
}

impl From<DeviceError> for PartError {
    fn from(e: DeviceError) -> Self {
        PartError::Io(e)
    }
}

impl From<RegError> for PartError {
    fn from(e: RegError) -> Self {
        PartError::Registry(e)
    }
}

impl From<BlockIOError> for PartError {
    fn from(e: BlockIOError) -> Self {
        PartError::Io(DeviceError::Block(e))
    }
}

impl From<&'static str> for PartError {
    fn from(s: &'static str) -> Self {
        PartError::Invalid(s)
    }
}

impl fmt::Display for PartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        Ok(())
    }
}

impl std::error::Error for PartError {}

pub type PartResult<T = ()> = Result<T, PartError>;
