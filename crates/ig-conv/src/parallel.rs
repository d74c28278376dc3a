/// Shared mutable view of the output storage for parallel tile stores.
///
/// Workers operating on disjoint output tiles write through the same
/// allocation concurrently. The pointer is dereferenced only at store time
/// and every store targets an index owned by exactly one tile, which is what
/// makes the `Send`/`Sync` claims sound.
#[derive(Clone, Copy)]
pub struct SyncSliceMut<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T: Send> Send for SyncSliceMut<T> {}
unsafe impl<T: Send> Sync for SyncSliceMut<T> {}

impl<T> SyncSliceMut<T> {
    pub fn new(slice: &mut [T]) -> Self {
        SyncSliceMut {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores one element.
    ///
    /// # Safety
    /// `index` must be in bounds and no other thread may store to the same
    /// index for the lifetime of the view. The tile grid guarantees this by
    /// assigning each output element to exactly one tile.
    #[inline]
    pub unsafe fn store(&self, index: usize, value: T) {
        debug_assert!(index < self.len);
        unsafe { self.ptr.add(index).write(value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_disjoint_parallel_stores() {
        let mut data = vec![0u32; 1024];
        let view = SyncSliceMut::new(&mut data);
        (0..16usize).into_par_iter().for_each(|chunk| {
            for i in 0..64 {
                let index = chunk * 64 + i;
                unsafe { view.store(index, index as u32) };
            }
        });
        for (i, &v) in data.iter().enumerate() {
            assert_eq!(v, i as u32);
        }
    }
}
