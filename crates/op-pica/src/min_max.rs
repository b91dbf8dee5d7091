//! Minimum and maximum of index buffers
//!
//! Indexed draws scan their index buffer to find the range of vertices they
//! touch. The vector paths process 16 bytes per step and leave the tail to
//! the scalar loop; results are identical to the scalar scan.

/// Index element type (`u8` or `u16`)
pub trait IndexValue: Copy + Ord + sealed::Sealed {
    const MIN: Self;
    const MAX: Self;

    /// Fastest available scan for this element type
    fn min_max(data: &[Self]) -> (Self, Self);
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

/// `(min, max)` of `data`; `(T::MAX, T::MIN)` when `data` is empty
#[inline]
pub fn find_min_max<T: IndexValue>(data: &[T]) -> (T, T) {
    T::min_max(data)
}

/// Reference scan
pub fn find_min_max_scalar<T: IndexValue>(data: &[T]) -> (T, T) {
    data.iter()
        .fold((T::MAX, T::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

fn merge<T: IndexValue>(a: (T, T), b: (T, T)) -> (T, T) {
    (a.0.min(b.0), a.1.max(b.1))
}

impl IndexValue for u8 {
    const MIN: Self = u8::MIN;
    const MAX: Self = u8::MAX;

    fn min_max(data: &[Self]) -> (Self, Self) {
        #[cfg(target_arch = "x86_64")]
        return sse2::min_max_u8(data);
        #[cfg(target_arch = "aarch64")]
        return neon::min_max_u8(data);
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        return find_min_max_scalar(data);
    }
}

impl IndexValue for u16 {
    const MIN: Self = u16::MIN;
    const MAX: Self = u16::MAX;

    fn min_max(data: &[Self]) -> (Self, Self) {
        #[cfg(target_arch = "x86_64")]
        return sse2::min_max_u16(data);
        #[cfg(target_arch = "aarch64")]
        return neon::min_max_u16(data);
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        return find_min_max_scalar(data);
    }
}

#[cfg(target_arch = "x86_64")]
mod sse2 {
    use std::arch::x86_64::*;

    use super::{find_min_max_scalar, merge};

    pub fn min_max_u8(data: &[u8]) -> (u8, u8) {
        let chunks = data.chunks_exact(16);
        let tail = find_min_max_scalar(chunks.remainder());
        if chunks.len() == 0 {
            return tail;
        }

        let mut mins = [0u8; 16];
        let mut maxs = [0u8; 16];
        // SAFETY: SSE2 is part of the x86_64 baseline; loads are unaligned and
        // stay inside each 16-byte chunk.
        unsafe {
            let mut vmin = _mm_set1_epi8(-1);
            let mut vmax = _mm_setzero_si128();
            for chunk in chunks {
                let v = _mm_loadu_si128(chunk.as_ptr().cast());
                vmin = _mm_min_epu8(vmin, v);
                vmax = _mm_max_epu8(vmax, v);
            }
            _mm_storeu_si128(mins.as_mut_ptr().cast(), vmin);
            _mm_storeu_si128(maxs.as_mut_ptr().cast(), vmax);
        }

        let lanes = (
            mins.iter().copied().fold(u8::MAX, u8::min),
            maxs.iter().copied().fold(u8::MIN, u8::max),
        );
        merge(lanes, tail)
    }

    /// SSE2 only has signed 16-bit min/max; flipping the sign bit maps the
    /// unsigned order onto the signed one.
    pub fn min_max_u16(data: &[u16]) -> (u16, u16) {
        let chunks = data.chunks_exact(8);
        let tail = find_min_max_scalar(chunks.remainder());
        if chunks.len() == 0 {
            return tail;
        }

        let mut mins = [0i16; 8];
        let mut maxs = [0i16; 8];
        // SAFETY: as above.
        unsafe {
            let bias = _mm_set1_epi16(i16::MIN);
            let mut vmin = _mm_set1_epi16(i16::MAX);
            let mut vmax = _mm_set1_epi16(i16::MIN);
            for chunk in chunks {
                let v = _mm_xor_si128(_mm_loadu_si128(chunk.as_ptr().cast()), bias);
                vmin = _mm_min_epi16(vmin, v);
                vmax = _mm_max_epi16(vmax, v);
            }
            _mm_storeu_si128(mins.as_mut_ptr().cast(), vmin);
            _mm_storeu_si128(maxs.as_mut_ptr().cast(), vmax);
        }

        let unbias = |v: i16| (v as u16) ^ 0x8000;
        let lanes = (
            mins.iter().copied().map(unbias).fold(u16::MAX, u16::min),
            maxs.iter().copied().map(unbias).fold(u16::MIN, u16::max),
        );
        merge(lanes, tail)
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::*;

    use super::{find_min_max_scalar, merge};

    pub fn min_max_u8(data: &[u8]) -> (u8, u8) {
        let chunks = data.chunks_exact(16);
        let tail = find_min_max_scalar(chunks.remainder());
        if chunks.len() == 0 {
            return tail;
        }

        // SAFETY: NEON is part of the aarch64 baseline; each load reads one
        // 16-byte chunk.
        let lanes = unsafe {
            let mut vmin = vdupq_n_u8(u8::MAX);
            let mut vmax = vdupq_n_u8(u8::MIN);
            for chunk in chunks {
                let v = vld1q_u8(chunk.as_ptr());
                vmin = vminq_u8(vmin, v);
                vmax = vmaxq_u8(vmax, v);
            }
            (vminvq_u8(vmin), vmaxvq_u8(vmax))
        };
        merge(lanes, tail)
    }

    pub fn min_max_u16(data: &[u16]) -> (u16, u16) {
        let chunks = data.chunks_exact(8);
        let tail = find_min_max_scalar(chunks.remainder());
        if chunks.len() == 0 {
            return tail;
        }

        // SAFETY: as above.
        let lanes = unsafe {
            let mut vmin = vdupq_n_u16(u16::MAX);
            let mut vmax = vdupq_n_u16(u16::MIN);
            for chunk in chunks {
                let v = vld1q_u16(chunk.as_ptr());
                vmin = vminq_u16(vmin, v);
                vmax = vmaxq_u16(vmax, v);
            }
            (vminvq_u16(vmin), vmaxvq_u16(vmax))
        };
        merge(lanes, tail)
    }
}
