//! Scalar element types for tile storage
//!
//! Tiles store dense column-major blocks of a single scalar type. The
//! [`Scalar`] trait connects Rust's type system to the element types the
//! substrate supports: `f32`, `f64`, and the interleaved complex types
//! [`Complex32`] and [`Complex64`].

mod complex;

pub use complex::{Complex32, Complex64};

use bytemuck::{Pod, Zeroable};
use num_traits::{One, Zero};
use rand::Rng;
use std::fmt;
use std::ops::AddAssign;

/// Trait for types that can be elements of a tile
///
/// The `Pod` bound is what lets tiles cross the wire and the PCIe bus as raw
/// byte blocks; everything else supports the handful of element-level
/// operations the substrate itself performs (random fill, diagonal
/// dominance, Hermitian conjugation).
pub trait Scalar:
    Copy
    + Clone
    + Send
    + Sync
    + Default
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + Pod
    + Zeroable
    + Zero
    + One
    + AddAssign
    + 'static
{
    /// Short type name, e.g. `"f64"`
    const NAME: &'static str;

    /// Convert from f64, mapping onto the real part for complex types
    fn from_f64(v: f64) -> Self;

    /// Complex conjugate; identity for real types
    fn conj(self) -> Self;

    /// Real part as f64
    fn re(self) -> f64;

    /// Draw a uniform sample in `[0, 1)` per component
    fn sample_uniform<G: Rng + ?Sized>(rng: &mut G) -> Self;
}

impl Scalar for f32 {
    const NAME: &'static str = "f32";

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn re(self) -> f64 {
        self as f64
    }

    #[inline]
    fn sample_uniform<G: Rng + ?Sized>(rng: &mut G) -> Self {
        rng.random()
    }
}

impl Scalar for f64 {
    const NAME: &'static str = "f64";

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn re(self) -> f64 {
        self
    }

    #[inline]
    fn sample_uniform<G: Rng + ?Sized>(rng: &mut G) -> Self {
        rng.random()
    }
}

impl Scalar for Complex32 {
    const NAME: &'static str = "c32";

    #[inline]
    fn from_f64(v: f64) -> Self {
        Complex32::new(v as f32, 0.0)
    }

    #[inline]
    fn conj(self) -> Self {
        Complex32::conj(self)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re as f64
    }

    #[inline]
    fn sample_uniform<G: Rng + ?Sized>(rng: &mut G) -> Self {
        Complex32::new(rng.random(), rng.random())
    }
}

impl Scalar for Complex64 {
    const NAME: &'static str = "c64";

    #[inline]
    fn from_f64(v: f64) -> Self {
        Complex64::new(v, 0.0)
    }

    #[inline]
    fn conj(self) -> Self {
        Complex64::conj(self)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re
    }

    #[inline]
    fn sample_uniform<G: Rng + ?Sized>(rng: &mut G) -> Self {
        Complex64::new(rng.random(), rng.random())
    }
}
