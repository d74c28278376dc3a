use crate::coord::Coord4d;
use crate::dtype::{DType, Element};
use crate::error::{LayoutError, Result};
use crate::layout::{FilterLayout, Layout};

/// An owning rank-4 activation tensor.
///
/// Holds contiguous storage addressed through a `Layout`. Hosts and tests own
/// tensors; the convolution core only ever sees borrowed views.
#[derive(Debug, Clone)]
pub struct Tensor<T: Element> {
    data: Vec<T>,
    layout: Layout,
}

impl<T: Element> Tensor<T> {
    /// Create a tensor from existing data and a layout.
    ///
    /// # Panics
    /// Panics if `data.len() != layout.required_len()`.
    pub fn new(data: Vec<T>, layout: Layout) -> Self {
        assert_eq!(
            data.len(),
            layout.required_len(),
            "data length {} does not match layout (required {})",
            data.len(),
            layout.required_len()
        );
        Tensor { data, layout }
    }

    /// Create a zero-filled tensor with the given layout.
    pub fn zeros(layout: Layout) -> Self {
        Tensor {
            data: vec![T::default(); layout.required_len()],
            layout,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Element at a logical NCHW coordinate.
    pub fn at(&self, n: usize, c: usize, h: usize, w: usize) -> T {
        self.data[self
            .layout
            .offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize))]
    }

    /// Writes the element at a logical NCHW coordinate.
    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: T) {
        let off = self
            .layout
            .offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize));
        self.data[off] = value;
    }

    /// Borrow a read-only view.
    pub fn as_ref(&self) -> TensorRef<'_, T> {
        TensorRef {
            data: &self.data,
            layout: self.layout,
        }
    }

    /// Borrow a mutable view.
    pub fn as_mut(&mut self) -> TensorRefMut<'_, T> {
        TensorRefMut {
            data: &mut self.data,
            layout: self.layout,
        }
    }
}

/// A non-owning read-only view of an activation tensor.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a, T: Element> {
    data: &'a [T],
    layout: Layout,
}

impl<'a, T: Element> TensorRef<'a, T> {
    /// Create a view over caller-owned storage.
    ///
    /// # Errors
    /// Returns an error if the slice is shorter than the layout requires.
    pub fn new(data: &'a [T], layout: Layout) -> Result<Self> {
        if data.len() < layout.required_len() {
            return Err(LayoutError::StorageTooSmall {
                len: data.len(),
                required: layout.required_len(),
            });
        }
        Ok(TensorRef { data, layout })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    pub fn at(&self, n: usize, c: usize, h: usize, w: usize) -> T {
        self.data[self
            .layout
            .offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize))]
    }
}

/// A non-owning mutable view of an activation tensor.
#[derive(Debug)]
pub struct TensorRefMut<'a, T: Element> {
    data: &'a mut [T],
    layout: Layout,
}

impl<'a, T: Element> TensorRefMut<'a, T> {
    /// Create a mutable view over caller-owned storage.
    ///
    /// # Errors
    /// Returns an error if the slice is shorter than the layout requires.
    pub fn new(data: &'a mut [T], layout: Layout) -> Result<Self> {
        if data.len() < layout.required_len() {
            return Err(LayoutError::StorageTooSmall {
                len: data.len(),
                required: layout.required_len(),
            });
        }
        Ok(TensorRefMut { data, layout })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn data(&self) -> &[T] {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data
    }

    pub fn at(&self, n: usize, c: usize, h: usize, w: usize) -> T {
        self.data[self
            .layout
            .offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize))]
    }

    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: T) {
        let off = self
            .layout
            .offset(Coord4d::new(n as isize, c as isize, h as isize, w as isize));
        self.data[off] = value;
    }

    /// Reborrow as a read-only view.
    pub fn as_ref(&self) -> TensorRef<'_, T> {
        TensorRef {
            data: self.data,
            layout: self.layout,
        }
    }
}

/// An owning filter tensor (KCRSx family).
#[derive(Debug, Clone)]
pub struct FilterTensor<T: Element> {
    data: Vec<T>,
    layout: FilterLayout,
}

impl<T: Element> FilterTensor<T> {
    /// Create a filter tensor from existing data and a layout.
    ///
    /// # Panics
    /// Panics if `data.len() != layout.required_len()`.
    pub fn new(data: Vec<T>, layout: FilterLayout) -> Self {
        assert_eq!(
            data.len(),
            layout.required_len(),
            "data length {} does not match filter layout (required {})",
            data.len(),
            layout.required_len()
        );
        FilterTensor { data, layout }
    }

    pub fn zeros(layout: FilterLayout) -> Self {
        FilterTensor {
            data: vec![T::default(); layout.required_len()],
            layout,
        }
    }

    pub fn layout(&self) -> FilterLayout {
        self.layout
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn at(&self, k: usize, c: usize, r: usize, s: usize) -> T {
        self.data[self.layout.offset(k, c, r, s)]
    }

    pub fn set(&mut self, k: usize, c: usize, r: usize, s: usize, value: T) {
        let off = self.layout.offset(k, c, r, s);
        self.data[off] = value;
    }

    pub fn as_ref(&self) -> FilterRef<'_, T> {
        FilterRef {
            data: &self.data,
            layout: self.layout,
        }
    }

    pub fn as_mut(&mut self) -> FilterRefMut<'_, T> {
        FilterRefMut {
            data: &mut self.data,
            layout: self.layout,
        }
    }
}

/// A non-owning read-only view of a filter tensor.
#[derive(Debug, Clone, Copy)]
pub struct FilterRef<'a, T: Element> {
    data: &'a [T],
    layout: FilterLayout,
}

impl<'a, T: Element> FilterRef<'a, T> {
    /// Create a view over caller-owned filter storage.
    ///
    /// # Errors
    /// Returns an error if the slice is shorter than the layout requires.
    pub fn new(data: &'a [T], layout: FilterLayout) -> Result<Self> {
        if data.len() < layout.required_len() {
            return Err(LayoutError::StorageTooSmall {
                len: data.len(),
                required: layout.required_len(),
            });
        }
        Ok(FilterRef { data, layout })
    }

    pub fn layout(&self) -> FilterLayout {
        self.layout
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    pub fn at(&self, k: usize, c: usize, r: usize, s: usize) -> T {
        self.data[self.layout.offset(k, c, r, s)]
    }
}

/// A non-owning mutable view of a filter tensor.
#[derive(Debug)]
pub struct FilterRefMut<'a, T: Element> {
    data: &'a mut [T],
    layout: FilterLayout,
}

impl<'a, T: Element> FilterRefMut<'a, T> {
    /// Create a mutable view over caller-owned filter storage.
    ///
    /// # Errors
    /// Returns an error if the slice is shorter than the layout requires.
    pub fn new(data: &'a mut [T], layout: FilterLayout) -> Result<Self> {
        if data.len() < layout.required_len() {
            return Err(LayoutError::StorageTooSmall {
                len: data.len(),
                required: layout.required_len(),
            });
        }
        Ok(FilterRefMut { data, layout })
    }

    pub fn layout(&self) -> FilterLayout {
        self.layout
    }

    pub fn data(&self) -> &[T] {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data
    }

    pub fn at(&self, k: usize, c: usize, r: usize, s: usize) -> T {
        self.data[self.layout.offset(k, c, r, s)]
    }

    pub fn set(&mut self, k: usize, c: usize, r: usize, s: usize, value: T) {
        let off = self.layout.offset(k, c, r, s);
        self.data[off] = value;
    }

    pub fn as_ref(&self) -> FilterRef<'_, T> {
        FilterRef {
            data: self.data,
            layout: self.layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_round_trip() {
        let layout = Layout::nchw(1, 2, 2, 2);
        let mut t = Tensor::<f32>::zeros(layout);
        t.set(0, 1, 1, 0, 7.0);
        assert_eq!(t.at(0, 1, 1, 0), 7.0);
        assert_eq!(t.at(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_view_shares_storage() {
        let layout = Layout::nchw(1, 1, 2, 2);
        let mut t = Tensor::<i8>::new(vec![1, 2, 3, 4], layout);
        {
            let mut view = t.as_mut();
            view.data_mut()[3] = 9;
        }
        assert_eq!(t.at(0, 0, 1, 1), 9);
    }

    #[test]
    fn test_ref_rejects_short_storage() {
        let layout = Layout::nchw(1, 1, 4, 4);
        let data = vec![0.0f32; 8];
        assert!(matches!(
            TensorRef::new(&data, layout),
            Err(LayoutError::StorageTooSmall { len: 8, required: 16 })
        ));
    }

    #[test]
    #[should_panic(expected = "does not match layout")]
    fn test_owning_length_mismatch_panics() {
        let layout = Layout::nchw(1, 1, 2, 2);
        let _ = Tensor::<f32>::new(vec![0.0; 3], layout);
    }

    #[test]
    fn test_filter_round_trip() {
        let layout = FilterLayout::kcrs(2, 1, 2, 2);
        let mut f = FilterTensor::<f32>::zeros(layout);
        f.set(1, 0, 1, 1, 3.5);
        assert_eq!(f.at(1, 0, 1, 1), 3.5);
        assert_eq!(f.as_ref().at(1, 0, 1, 1), 3.5);
    }
}
