//! Bounds-checked, offset-based reads over row and header bytes.
//!
//! Rows handed out by a matrix borrow straight from a mapped window, while
//! freshly built rows own their buffer. [`ByteView`] covers both with a
//! `Cow` and decodes big-endian fields with `byteorder`, returning a
//! [`MatrixError::Format`] instead of panicking when a read would run past
//! the end of the buffer.

use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{MatrixError, Result};

/// Owned or borrowed bytes with checked typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteView<'a> {
    bytes: Cow<'a, [u8]>,
}

impl<'a> ByteView<'a> {
    pub fn borrowed(bytes: &'a [u8]) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
        }
    }

    pub fn owned(bytes: Vec<u8>) -> ByteView<'static> {
        ByteView {
            bytes: Cow::Owned(bytes),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Detaches the view from the buffer it borrows from.
    pub fn into_owned(self) -> ByteView<'static> {
        ByteView {
            bytes: Cow::Owned(self.bytes.into_owned()),
        }
    }

    /// Narrows the view to its first `len` bytes.
    pub fn truncate(self, len: usize) -> Result<Self> {
        self.check(0, len)?;
        let bytes = match self.bytes {
            Cow::Borrowed(b) => Cow::Borrowed(&b[..len]),
            Cow::Owned(mut v) => {
                v.truncate(len);
                Cow::Owned(v)
            }
        };
        Ok(Self { bytes })
    }

    fn check(&self, offset: usize, width: usize) -> Result<&[u8]> {
        offset
            .checked_add(width)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| {
                MatrixError::Format(format!(
                    "read of {width} bytes at offset {offset} exceeds buffer of {} bytes",
                    self.bytes.len()
                ))
            })
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32> {
        Ok(BigEndian::read_u32(self.check(offset, 4)?))
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32> {
        Ok(BigEndian::read_i32(self.check(offset, 4)?))
    }

    pub fn read_i16_at(&self, offset: usize) -> Result<i16> {
        Ok(BigEndian::read_i16(self.check(offset, 2)?))
    }

    pub fn read_f32_at(&self, offset: usize) -> Result<f32> {
        Ok(BigEndian::read_f32(self.check(offset, 4)?))
    }

    pub fn read_i64_at(&self, offset: usize) -> Result<i64> {
        Ok(BigEndian::read_i64(self.check(offset, 8)?))
    }

    /// Reads `count` consecutive `i32`s starting at `offset`.
    pub fn read_i32s_at(&self, offset: usize, count: usize) -> Result<Vec<i32>> {
        let width = count
            .checked_mul(4)
            .ok_or_else(|| MatrixError::format("i32 array length overflows"))?;
        let raw = self.check(offset, width)?;
        let mut out = vec![0i32; count];
        BigEndian::read_i32_into(raw, &mut out);
        Ok(out)
    }

    /// Reads `count` consecutive `i64`s starting at `offset`.
    pub fn read_i64s_at(&self, offset: usize, count: usize) -> Result<Vec<i64>> {
        let width = count
            .checked_mul(8)
            .ok_or_else(|| MatrixError::format("i64 array length overflows"))?;
        let raw = self.check(offset, width)?;
        let mut out = vec![0i64; count];
        BigEndian::read_i64_into(raw, &mut out);
        Ok(out)
    }
}

/// Unchecked-width helpers for accessors whose bounds were validated when
/// the row was constructed.
pub(crate) fn i32_at(bytes: &[u8], offset: usize) -> i32 {
    BigEndian::read_i32(&bytes[offset..offset + 4])
}

pub(crate) fn i16_at(bytes: &[u8], offset: usize) -> i16 {
    BigEndian::read_i16(&bytes[offset..offset + 2])
}
