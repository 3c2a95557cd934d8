// Axel '0vercl0k' Souchet - October 15 2026
//! This module implements [`BoundedView`], the only place where offsets and
//! lengths read off the dump get turned into slices. Everything else in the
//! crate goes through it, which means a bogus offset can't end up reading
//! outside of the buffer the user handed us.
use std::io;

use crate::error::{ParseError, Result};

/// A cursor over a slice of bytes. Records are decoded from it field by field.
pub type Cursor<'a> = io::Cursor<&'a [u8]>;

/// A raw structure that has a fixed size on disk and knows how to decode
/// itself from a [`Cursor`].
pub trait Record: Sized {
    /// Number of bytes the record occupies in the file.
    const SIZE: usize;

    /// Decode the record. The cursor is guaranteed to have at least
    /// [`Record::SIZE`] bytes available when called through [`BoundedView`].
    fn decode(cursor: &mut Cursor) -> io::Result<Self>;
}

/// An immutable view over the dump. It doesn't own the bytes: the caller does,
/// and has to keep them alive as long as anything built from the view.
#[derive(Debug, Clone, Copy)]
pub struct BoundedView<'a> {
    data: &'a [u8],
}

impl<'a> BoundedView<'a> {
    /// Build a view over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Length of the underlying buffer.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Is the underlying buffer empty?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Is `[offset, offset + len)` fully contained in the buffer? An overflowing
    /// `offset + len` is out of bounds.
    pub fn in_bounds(&self, offset: u64, len: u64) -> bool {
        match offset.checked_add(len) {
            Some(end) => end <= self.len(),
            None => false,
        }
    }

    /// Get the slice `[offset, offset + len)` if it is in bounds.
    pub fn slice(&self, offset: u64, len: u64, what: &'static str) -> Result<&'a [u8]> {
        if !self.in_bounds(offset, len) {
            return Err(ParseError::OutOfBounds { what, offset, len });
        }

        // Both values fit in the buffer's length, so they fit in a `usize`.
        let start = offset as usize;
        let end = start + len as usize;

        Ok(&self.data[start..end])
    }

    /// Get a [`Cursor`] over `[offset, offset + len)` if it is in bounds.
    pub fn cursor(&self, offset: u64, len: u64, what: &'static str) -> Result<Cursor<'a>> {
        self.slice(offset, len, what).map(io::Cursor::new)
    }

    /// Decode a `T` stored at `offset`.
    pub fn record<T: Record>(&self, offset: u64, what: &'static str) -> Result<T> {
        let len = T::SIZE as u64;
        let mut cursor = self.cursor(offset, len, what)?;

        // The slice is exactly `T::SIZE` bytes, so the decoding can only fail
        // if a record implementation reads more than it advertises.
        T::decode(&mut cursor).map_err(|_| ParseError::OutOfBounds { what, offset, len })
    }
}
