//! Offset-tracking binary codec for fixed-layout ledger accounts.
//!
//! Account layouts are little-endian with length-prefixed variable regions.
//! All reads go through [`Cursor`], which tracks the offset as a running sum
//! of widths already consumed; no field is ever located by an independent
//! offset constant, so layouts cannot silently desynchronize.

use bytes::BufMut;
use thiserror::Error;

use crate::{Address, IdToken};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("buffer truncated reading {field}: need {needed} bytes, {remaining} remain")]
    TruncatedBuffer {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("length prefix for {field} is {got}, bound is {max}")]
    LengthOverflow {
        field: &'static str,
        got: usize,
        max: usize,
    },
    #[error("unknown {name} ordinal {got}")]
    UnknownEnumValue { name: &'static str, got: u8 },
    #[error("invalid {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// Sequential reader over raw account bytes.
pub struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, field: &'static str, width: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < width {
            return Err(Error::TruncatedBuffer {
                field,
                needed: width,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + width];
        self.offset += width;
        Ok(slice)
    }

    pub fn skip(&mut self, field: &'static str, width: usize) -> Result<(), Error> {
        self.take(field, width).map(|_| ())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, Error> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn u16_le(&mut self, field: &'static str) -> Result<u16, Error> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32, Error> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(field, 4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn u64_le(&mut self, field: &'static str) -> Result<u64, Error> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(field, 8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn address(&mut self, field: &'static str) -> Result<Address, Error> {
        let mut bytes = [0u8; Address::LEN];
        bytes.copy_from_slice(self.take(field, Address::LEN)?);
        Ok(Address::new(bytes))
    }

    pub fn id_token(&mut self, field: &'static str) -> Result<IdToken, Error> {
        let mut bytes = [0u8; IdToken::LEN];
        bytes.copy_from_slice(self.take(field, IdToken::LEN)?);
        IdToken::from_bytes(bytes).map_err(|_| Error::Invalid(field, "non-ASCII identifier token"))
    }

    /// Read a `u32` little-endian length prefix followed by `len` elements.
    /// A prefix above `max` is a [`Error::LengthOverflow`].
    pub fn list<T>(
        &mut self,
        field: &'static str,
        max: usize,
        read: impl Fn(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let len = self.u32_le(field)? as usize;
        if len > max {
            return Err(Error::LengthOverflow {
                field,
                got: len,
                max,
            });
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Like [`Cursor::list`], but a prefix above `max` is clamped: `max`
    /// elements are read and the claimed excess is skipped (elements must be
    /// `elem_width` bytes) so later fields stay aligned.
    pub fn list_clamped<T>(
        &mut self,
        field: &'static str,
        max: usize,
        elem_width: usize,
        read: impl Fn(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let len = self.u32_le(field)? as usize;
        let count = len.min(max);
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        if len > count {
            self.skip(field, (len - count) * elem_width)?;
        }
        Ok(items)
    }
}

/// Write a `u32` little-endian length prefix followed by each element.
pub fn put_list<T>(buf: &mut Vec<u8>, items: &[T], write: impl Fn(&mut Vec<u8>, &T)) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        write(buf, item);
    }
}
