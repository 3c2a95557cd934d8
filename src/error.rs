// Axel '0vercl0k' Souchet - October 15 2026
//! The errors the parser can return. Every one of them is terminal: as soon as
//! one is hit, the whole parse is abandoned and nothing gets returned to the
//! caller but the error.
use thiserror::Error;

use crate::udmp_parser::StreamKind;

/// Everything that can go wrong while ingesting a dump.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The header doesn't start with `MDMP`.
    #[error("header signature {0:#x} is unexpected")]
    BadSignature(u32),

    /// The header has flag bits set that aren't part of the valid mask.
    #[error("header flags {0:#x} have unknown bits set")]
    UnknownFlags(u32),

    /// The header says there are no streams in the dump.
    #[error("the header declares zero streams")]
    NoStreams,

    /// An offset / length pair read from the file points outside of it. This
    /// is also what you get when `offset + len` overflows.
    #[error("{what} at {offset:#x} ({len:#x} bytes) is out of bounds")]
    OutOfBounds {
        /// What was being read.
        what: &'static str,
        /// The file offset.
        offset: u64,
        /// The length of the range.
        len: u64,
    },

    /// Two directory entries share the same stream kind.
    #[error("there is more than one {0} stream")]
    DuplicateStream(StreamKind),

    /// Two memory info entries share the same base address.
    #[error("the region {0:#x} is already in the memory map")]
    DuplicateRegion(u64),

    /// Two memory ranges try to backfill the same region.
    #[error("the region {0:#x} already has data attached to it")]
    DuplicateRegionData(u64),

    /// Two modules share the same base of image.
    #[error("the module at {0:#x} is already in the module map")]
    DuplicateModule(u64),

    /// Two threads share the same thread id.
    #[error("thread {0} is already in the thread map")]
    DuplicateThread(u32),

    /// A stream (or a record inside a stream) doesn't have the size its
    /// header implies.
    #[error("{what} is {found:#x} bytes but {expected:#x} were expected")]
    SizeMismatch {
        /// What was being sized.
        what: &'static str,
        /// The size the headers imply.
        expected: u64,
        /// The size declared in the file.
        found: u64,
    },

    /// The memory64 list has data for an address that the memory info list
    /// never declared.
    #[error("the memory range {0:#x} has data but no region")]
    DanglingRegion(u64),

    /// The memory64 list has data for a free region.
    #[error("the memory range {0:#x} has data but its region is free")]
    DataForFreeRegion(u64),

    /// The exception stream references a thread that isn't in the thread list.
    #[error("the exception stream references thread {0} which isn't in the thread list")]
    DanglingThread(u32),

    /// A module name has an odd number of bytes.
    #[error("the name of module #{index} has an odd length ({len:#x})")]
    OddNameLength {
        /// Index of the module in the module list.
        index: u32,
        /// The byte length read off the file.
        len: u32,
    },

    /// A module name has a code unit that isn't printable ASCII.
    #[error("the name of module #{index} has a non printable character ({unit:#x})")]
    NonPrintableName {
        /// Index of the module in the module list.
        index: u32,
        /// The offending UTF-16 code unit.
        unit: u16,
    },
}

/// The broad families a [`ParseError`] falls in. Handy for consumers that only
/// want to surface a short diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad signature, unknown flags or no streams.
    MalformedHeader,
    /// Something points outside of the buffer.
    OutOfBounds,
    /// Duplicated stream kind or duplicated map key.
    Duplicate,
    /// A declared size doesn't add up.
    SizeMismatch,
    /// Something references a region or a thread that doesn't exist.
    DanglingReference,
    /// A module name isn't a well-formed string.
    IllFormedString,
}

impl ParseError {
    /// Get the [`ErrorCategory`] of the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadSignature(_) | Self::UnknownFlags(_) | Self::NoStreams => {
                ErrorCategory::MalformedHeader
            }
            Self::OutOfBounds { .. } => ErrorCategory::OutOfBounds,
            Self::DuplicateStream(_)
            | Self::DuplicateRegion(_)
            | Self::DuplicateRegionData(_)
            | Self::DuplicateModule(_)
            | Self::DuplicateThread(_) => ErrorCategory::Duplicate,
            Self::SizeMismatch { .. } => ErrorCategory::SizeMismatch,
            Self::DanglingRegion(_) | Self::DataForFreeRegion(_) | Self::DanglingThread(_) => {
                ErrorCategory::DanglingReference
            }
            Self::OddNameLength { .. } | Self::NonPrintableName { .. } => {
                ErrorCategory::IllFormedString
            }
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ParseError>;
