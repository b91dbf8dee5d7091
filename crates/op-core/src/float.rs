//! PICA floating point formats
//!
//! The PICA works with reduced-precision floats: 24-bit values in the shader
//! unit, 20-bit light attenuation factors and 16-bit values in several
//! fixed-function registers. All of them are held as host `f32` once decoded;
//! only multiplication differs from IEEE-754 (`0 * inf = 0`).

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub};

/// Float with `M` mantissa bits and `E` exponent bits, stored as `f32`.
#[derive(Clone, Copy, Default, PartialEq)]
#[repr(transparent)]
pub struct PicaFloat<const M: u32, const E: u32>(f32);

/// 1.7.16 float used by the shader unit
pub type Float24 = PicaFloat<16, 7>;
/// 1.7.12 float used for distance attenuation
pub type Float20 = PicaFloat<12, 7>;
/// 1.5.10 float used by several fixed-function registers
pub type Float16 = PicaFloat<10, 5>;

impl<const M: u32, const E: u32> PicaFloat<M, E> {
    /// Total width of the packed representation in bits
    pub const WIDTH: u32 = M + E + 1;

    /// Zero constant
    pub const ZERO: Self = Self(0.0);

    /// One constant
    pub const ONE: Self = Self(1.0);

    /// Wrap a host float
    #[inline]
    pub const fn from_f32(value: f32) -> Self {
        Self(value)
    }

    /// Decode the packed hardware representation (upper bits are ignored)
    pub fn from_raw(raw: u32) -> Self {
        let bias = 128 - (1i32 << (E - 1));
        let exponent = ((raw >> M) & ((1 << E) - 1)) as i32;
        let mantissa = raw & ((1 << M) - 1);
        let sign = ((raw >> (E + M)) & 1) << 31;

        let bits = if raw & ((1 << (Self::WIDTH - 1)) - 1) != 0 {
            let exponent = if exponent == (1 << E) - 1 {
                255
            } else {
                exponent + bias
            };
            sign | (mantissa << (23 - M)) | ((exponent as u32) << 23)
        } else {
            sign
        };

        Self(f32::from_bits(bits))
    }

    /// Host float value
    #[inline]
    pub const fn to_f32(self) -> f32 {
        self.0
    }

    /// Whether the value is NaN
    #[inline]
    pub fn is_nan(self) -> bool {
        self.0.is_nan()
    }
}

impl<const M: u32, const E: u32> fmt::Debug for PicaFloat<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<const M: u32, const E: u32> PartialOrd for PicaFloat<M, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<const M: u32, const E: u32> Mul for PicaFloat<M, E> {
    type Output = Self;

    /// PICA multiplication yields 0 instead of NaN for `0 * inf`
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(pica_mul(self.0, rhs.0))
    }
}

impl<const M: u32, const E: u32> MulAssign for PicaFloat<M, E> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const M: u32, const E: u32> Add for PicaFloat<M, E> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl<const M: u32, const E: u32> AddAssign for PicaFloat<M, E> {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<const M: u32, const E: u32> Sub for PicaFloat<M, E> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<const M: u32, const E: u32> Div for PicaFloat<M, E> {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self(self.0 / rhs.0)
    }
}

impl<const M: u32, const E: u32> Neg for PicaFloat<M, E> {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

/// Host-float multiply with PICA semantics.
///
/// Shared with generated code so that the JIT and the interpreter round
/// identically.
#[inline]
pub fn pica_mul(a: f32, b: f32) -> f32 {
    let result = a * b;
    if result.is_nan() && !a.is_nan() && !b.is_nan() {
        0.0
    } else {
        result
    }
}
