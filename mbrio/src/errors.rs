// SPDX-License-Identifier: MIT

use core::fmt;

pub type BlockIOResult<T = ()> = core::result::Result<T, BlockIOError>;

/// What went wrong during a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIOError {
    /// The transfer reaches past the end of the storage (or past the
    /// window a handle was scoped to).
    OutOfBounds,
    /// The backend cannot perform this operation at all.
    Unsupported,
    /// Backend-specific failure.
    Other(&'static str),
}

impl BlockIOError {
    /// Static description, for error types wrapping this one.
    pub const fn msg(self) -> &'static str {
        match self {
            Self::OutOfBounds => "access past end of storage",
            Self::Unsupported => "operation not supported by backend",
            Self::Other(msg) => msg,
        }
    }
}

impl fmt::Display for BlockIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.msg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_static() {
        assert_eq!(
            BlockIOError::Other("backend exploded").msg(),
            "backend exploded"
        );
        assert!(!BlockIOError::OutOfBounds.msg().is_empty());
        assert!(!BlockIOError::Unsupported.msg().is_empty());
    }
}
