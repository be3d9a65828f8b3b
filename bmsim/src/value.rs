/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Fixed-width unsigned integers, the storage for every header and metadata field.

use num::{BigInt, BigUint, One, Zero};
use std::fmt::{self, Display};

use crate::error::{Error, Result};

/// An unsigned integer bound to an immutable bit width.
///
/// The value always satisfies `0 <= value < 2**bitwidth`.  Every setter checks this and fails
/// with [`Error::OutOfRange`] instead of truncating, because a value that does not fit means that
/// the program itself is wrong.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FixedInt {
    value: BigUint,
    bitwidth: usize,
}

impl FixedInt {
    /// Creates a new `FixedInt` of `bitwidth` bits holding `value`.
    pub fn new<V: Into<BigUint>>(value: V, bitwidth: usize) -> Result<FixedInt> {
        let mut fixed = FixedInt::zero(bitwidth);
        fixed.set(value)?;
        Ok(fixed)
    }

    /// Creates a new zero-valued `FixedInt` of `bitwidth` bits.
    pub fn zero(bitwidth: usize) -> FixedInt {
        FixedInt { value: BigUint::zero(), bitwidth }
    }

    pub fn bitwidth(&self) -> usize {
        self.bitwidth
    }

    /// Number of bytes needed to hold `bitwidth` bits.
    pub fn bytewidth(&self) -> usize {
        (self.bitwidth + 7) / 8
    }

    /// True if the bit width is a whole number of bytes.
    pub fn is_byte_aligned(&self) -> bool {
        self.bitwidth % 8 == 0
    }

    /// The largest value this integer can hold, `2**bitwidth - 1`.
    pub fn max_value(&self) -> BigUint {
        mask(self.bitwidth)
    }

    pub fn val(&self) -> &BigUint {
        &self.value
    }

    /// Sets the value, failing if it does not fit.
    pub fn set<V: Into<BigUint>>(&mut self, value: V) -> Result<()> {
        let value = value.into();
        if value.bits() > self.bitwidth as u64 {
            return Err(Error::out_of_range(&value, self.bitwidth));
        }
        self.value = value;
        Ok(())
    }

    /// Sets the value from a signed integer, failing if it is negative or does not fit.
    pub fn set_int(&mut self, value: &BigInt) -> Result<()> {
        match value.to_biguint() {
            Some(value) => self.set(value),
            None => Err(Error::OutOfRange { value: value.clone(), bitwidth: self.bitwidth }),
        }
    }

    /// Sets the value to the maximum that fits.  Architectures use this as an out-of-band
    /// marker, e.g. V1Model marks a packet to be dropped this way.
    pub fn set_max_val(&mut self) {
        self.value = self.max_value();
    }

    pub fn is_max_val(&self) -> bool {
        self.value == self.max_value()
    }

    /// Sets the value from the first `bytewidth()` bytes of `binary`, big-endian.
    pub fn from_bytes(&mut self, binary: &[u8]) -> Result<()> {
        self.check_byte_aligned()?;
        let n = self.bytewidth();
        if binary.len() < n {
            return Err(Error::PacketTooShort { needed: n, available: binary.len() });
        }
        self.value = BigUint::from_bytes_be(&binary[..n]);
        Ok(())
    }

    /// Encodes the value as exactly `bytewidth()` big-endian bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.check_byte_aligned()?;
        let n = self.bytewidth();
        let digits = if self.value.is_zero() { Vec::new() } else { self.value.to_bytes_be() };
        let mut binary = vec![0; n - digits.len()];
        binary.extend(digits);
        Ok(binary)
    }

    fn check_byte_aligned(&self) -> Result<()> {
        if self.is_byte_aligned() {
            Ok(())
        } else {
            Err(Error::NotByteAligned(format!("{}-bit value", self.bitwidth)))
        }
    }
}

impl Display for FixedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.value)
    }
}

/// Returns `prefix_len` one bits followed by `bitwidth - prefix_len` zero bits.
pub fn prefix_mask(bitwidth: usize, prefix_len: usize) -> BigUint {
    mask(prefix_len) << (bitwidth - prefix_len.min(bitwidth))
}

/// Returns `2**bitwidth - 1`.
pub fn mask(bitwidth: usize) -> BigUint {
    (BigUint::one() << bitwidth) - 1u32
}

/// Parses an integer literal as found in BM JSON.
///
/// The literal may have a leading `-` and a `0x`, `0o`, or `0b` radix prefix.  Without a prefix,
/// `default_radix` applies.  Runtime data is hexadecimal with or without the `0x`; `hexstr`
/// immediates are despite their name often written in decimal by the compiler.
pub fn parse_int(s: &str, default_radix: u32) -> Option<BigInt> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let lower = s.get(..2).map(|p| p.to_ascii_lowercase());
    let (radix, digits) = match lower.as_deref() {
        Some("0x") => (16, &s[2..]),
        Some("0o") => (8, &s[2..]),
        Some("0b") => (2, &s[2..]),
        _ => (default_radix, s),
    };
    if digits.is_empty() {
        return None;
    }
    let value = BigInt::parse_bytes(digits.as_bytes(), radix)?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        let x = FixedInt::zero(12);
        assert_eq!(x.bitwidth(), 12);
        assert_eq!(x.bytewidth(), 2);
        assert!(!x.is_byte_aligned());
        assert!(FixedInt::zero(48).is_byte_aligned());
    }

    #[test]
    fn range_invariant() {
        let mut x = FixedInt::zero(8);
        assert!(x.set(255u32).is_ok());
        assert!(x.set(256u32).is_err());
        assert_eq!(x.val(), &BigUint::from(255u32));
        assert!(x.set_int(&BigInt::from(-1)).is_err());
        assert!(FixedInt::new(1u32, 0).is_err());
        assert!(FixedInt::new(BigUint::one() << 127, 128).is_ok());
    }

    #[test]
    fn max_val() {
        let mut x = FixedInt::new(3u32, 9).unwrap();
        assert!(!x.is_max_val());
        x.set_max_val();
        assert!(x.is_max_val());
        assert_eq!(x.val(), &BigUint::from(511u32));
    }

    #[test]
    fn bytes() {
        let x = FixedInt::new(0x0102u32, 32).unwrap();
        assert_eq!(x.to_bytes().unwrap(), vec![0, 0, 1, 2]);

        let mut y = FixedInt::zero(16);
        y.from_bytes(&[0xab, 0xcd, 0xef]).unwrap();
        assert_eq!(y.val(), &BigUint::from(0xabcdu32));
        assert!(y.from_bytes(&[0xab]).is_err());

        assert!(FixedInt::zero(9).to_bytes().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(FixedInt::new(126u32, 32).unwrap().to_string(), "0x7E");
    }

    #[test]
    fn masks() {
        assert_eq!(prefix_mask(32, 24), BigUint::from(0xffffff00u32));
        assert_eq!(prefix_mask(32, 0), BigUint::zero());
        assert_eq!(prefix_mask(8, 8), BigUint::from(0xffu32));
    }

    #[test]
    fn literals() {
        assert_eq!(parse_int("0x0800", 10), Some(BigInt::from(0x800)));
        assert_eq!(parse_int("2048", 10), Some(BigInt::from(2048)));
        assert_eq!(parse_int("-0x1", 10), Some(BigInt::from(-1)));
        assert_eq!(parse_int("ae", 16), Some(BigInt::from(0xae)));
        assert_eq!(parse_int("0xae", 16), Some(BigInt::from(0xae)));
        assert_eq!(parse_int("0x", 16), None);
        assert_eq!(parse_int("zz", 16), None);
    }
}
