//! Interleaved complex number types
//!
//! Complex elements are stored in interleaved format (re, im, re, im, ...),
//! matching LAPACK, cuBLAS, and FFTW conventions, so a tile of complex
//! scalars is bit-compatible with the native libraries that consume it.

use bytemuck::{Pod, Zeroable};
use num_traits::{One, Zero};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Single-precision complex number (two f32: real, imaginary)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Complex32 {
    /// Real part
    pub re: f32,
    /// Imaginary part
    pub im: f32,
}

/// Double-precision complex number (two f64: real, imaginary)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Complex64 {
    /// Real part
    pub re: f64,
    /// Imaginary part
    pub im: f64,
}

macro_rules! impl_complex {
    ($name:ident, $float:ty) => {
        impl $name {
            /// Create a complex number from real and imaginary parts
            #[inline]
            pub const fn new(re: $float, im: $float) -> Self {
                Self { re, im }
            }

            /// Complex conjugate
            #[inline]
            pub fn conj(self) -> Self {
                Self::new(self.re, -self.im)
            }

            /// Magnitude (absolute value)
            #[inline]
            pub fn abs(self) -> $float {
                self.re.hypot(self.im)
            }
        }

        impl Add for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                Self::new(self.re + rhs.re, self.im + rhs.im)
            }
        }

        impl AddAssign for $name {
            #[inline]
            fn add_assign(&mut self, rhs: Self) {
                self.re += rhs.re;
                self.im += rhs.im;
            }
        }

        impl Sub for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                Self::new(self.re - rhs.re, self.im - rhs.im)
            }
        }

        impl Mul for $name {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: Self) -> Self {
                Self::new(
                    self.re * rhs.re - self.im * rhs.im,
                    self.re * rhs.im + self.im * rhs.re,
                )
            }
        }

        impl Div for $name {
            type Output = Self;

            #[inline]
            fn div(self, rhs: Self) -> Self {
                let denom = rhs.re * rhs.re + rhs.im * rhs.im;
                Self::new(
                    (self.re * rhs.re + self.im * rhs.im) / denom,
                    (self.im * rhs.re - self.re * rhs.im) / denom,
                )
            }
        }

        impl Neg for $name {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                Self::new(-self.re, -self.im)
            }
        }

        impl Zero for $name {
            #[inline]
            fn zero() -> Self {
                Self::new(0.0, 0.0)
            }

            #[inline]
            fn is_zero(&self) -> bool {
                self.re == 0.0 && self.im == 0.0
            }
        }

        impl One for $name {
            #[inline]
            fn one() -> Self {
                Self::new(1.0, 0.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.im < 0.0 {
                    write!(f, "{}{}i", self.re, self.im)
                } else {
                    write!(f, "{}+{}i", self.re, self.im)
                }
            }
        }
    };
}

impl_complex!(Complex32, f32);
impl_complex!(Complex64, f64);
