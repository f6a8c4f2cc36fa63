// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

use crate::base::{DecodeData, EncodeData};
use crate::{ByteArray, DecodeError, EncodeError};

/// `BoolData` represents a one byte boolean flag.
///
/// Any value other than 0 or 1 is a protocol error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolData(bool);

impl BoolData {
    /// Create a new `BoolData`.
    #[must_use]
    pub const fn new(value: bool) -> Self {
        Self(value)
    }

    /// Get inner bool value.
    #[must_use]
    pub const fn value(&self) -> bool {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl fmt::Display for BoolData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodeData for BoolData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        match ba.read_byte()? {
            0 => Ok(Self(false)),
            1 => Ok(Self(true)),
            _ => Err(DecodeError::InvalidPropertyValue),
        }
    }
}

impl EncodeData for BoolData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(u8::from(self.0));
        Ok(Self::bytes())
    }
}

impl From<bool> for BoolData {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}
