//! Typed-region descriptors: strided rectangular sub-regions of flat buffers.
//!
//! A [`RegionDescriptor`] is purely geometric (an offset, a 3-D shape and one
//! stride per axis), so halo slabs can be read from or written into a field
//! buffer in place. `pack`/`unpack` gather into and scatter from a contiguous
//! message, which is what goes over the transport.

use crate::data::delta::ValueDelta;
use crate::data::field::FieldLayout;
use itertools::iproduct;

/// A strided box inside a flat buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    offset: usize,
    shape: [usize; 3],
    strides: [usize; 3],
}

impl RegionDescriptor {
    /// A region with explicit offset and strides; strides need not be unit or row-major.
    pub fn new(offset: usize, shape: [usize; 3], strides: [usize; 3]) -> Self {
        Self {
            offset,
            shape,
            strides,
        }
    }

    /// The box `[start, start + shape)` of a field buffer.
    pub fn from_box(layout: &FieldLayout, start: [usize; 3], shape: [usize; 3]) -> Self {
        let strides = layout.strides();
        let offset = (0..3).map(|a| start[a] * strides[a]).sum();
        Self {
            offset,
            shape,
            strides,
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    #[inline]
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    /// Number of elements in the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest linear index touched, `None` for an empty region.
    pub fn max_index(&self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        Some(self.offset + (0..3).map(|a| (self.shape[a] - 1) * self.strides[a]).sum::<usize>())
    }

    /// Whether every index lies inside a buffer of `len` values.
    pub fn fits(&self, len: usize) -> bool {
        self.max_index().is_none_or(|m| m < len)
    }

    /// Linear indices in row-major order of the region shape.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        let [s0, s1, s2] = self.strides;
        iproduct!(0..self.shape[0], 0..self.shape[1], 0..self.shape[2])
            .map(move |(i, j, k)| self.offset + i * s0 + j * s1 + k * s2)
    }

    /// Append the region's values from `src` to `out`.
    pub fn pack<T: Copy>(&self, src: &[T], out: &mut Vec<T>) {
        out.reserve(self.len());
        out.extend(self.indices().map(|i| src[i]));
    }

    /// Fuse `data` (in pack order) into the region of `dst` with delta `D`.
    ///
    /// `data` must hold exactly [`len`](Self::len) values; callers check.
    pub fn unpack<T, D>(&self, dst: &mut [T], data: &[T])
    where
        T: Copy,
        D: ValueDelta<T, Part = T>,
    {
        debug_assert_eq!(data.len(), self.len());
        for (i, &v) in self.indices().zip(data) {
            D::fuse(&mut dst[i], v);
        }
    }

    /// Borrow the region of `data` as a read-only view.
    pub fn view<'a>(&'a self, data: &'a [f64]) -> RegionView<'a> {
        RegionView { data, region: self }
    }
}

/// Read-only view of a region inside a borrowed buffer.
#[derive(Clone, Copy, Debug)]
pub struct RegionView<'a> {
    data: &'a [f64],
    region: &'a RegionDescriptor,
}

impl<'a> RegionView<'a> {
    #[inline]
    pub fn region(&self) -> &RegionDescriptor {
        self.region
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + 'a {
        let (data, region) = (self.data, self.region);
        region.indices().map(move |i| data[i])
    }

    /// Pack the view into `out`.
    pub fn pack_into(&self, out: &mut Vec<f64>) {
        self.region.pack(self.data, out);
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        self.pack_into(&mut out);
        out
    }
}
