//! Layout helpers for slice-based dynamically sized types, used for the term
//! cells whose argument array length depends on the head symbol arity.
//!
//! Adapted from the `slice-dst` crate, reduced to what the term storage needs
//! and reworked on top of the `Allocator` api from `allocator-api2`.

use std::alloc::Layout;
use std::alloc::LayoutError;
use std::ptr::NonNull;
use std::ptr::slice_from_raw_parts_mut;

use allocator_api2::alloc::AllocError;
use allocator_api2::alloc::Allocator;

/// Implemented by dynamically sized types whose tail is a slice.
///
/// # Safety
///
/// `layout_for` must return the exact layout of a value with `length` tail
/// elements, and `length` must report the tail length the value was allocated
/// with; deallocation relies on both.
pub unsafe trait SliceDst {
    /// The layout of a value whose tail slice has `length` elements.
    fn layout_for(length: usize) -> Result<Layout, LayoutError>;

    /// Attaches the type, including its slice metadata, to an untyped pointer.
    fn retype(ptr: NonNull<[()]>) -> NonNull<Self>;

    /// The tail length this value was allocated with.
    fn length(&self) -> usize;
}

/// Every sized type is trivially a SliceDst with an empty tail.
unsafe impl<T> SliceDst for T {
    fn layout_for(_length: usize) -> Result<Layout, LayoutError> {
        Ok(Layout::new::<T>())
    }

    fn retype(ptr: NonNull<[()]>) -> NonNull<Self> {
        unsafe { NonNull::new_unchecked(ptr.as_ptr() as *mut Self) }
    }

    fn length(&self) -> usize {
        0
    }
}

/// Computes the layout of a `repr(C)` struct from the layouts of its fields.
///
/// Taken from the [Layout] documentation.
pub fn repr_c<const N: usize>(fields: &[Layout; N]) -> Result<Layout, LayoutError> {
    let mut layout = Layout::from_size_align(0, 1)?;
    for &field in fields {
        let (new_layout, _offset) = layout.extend(field)?;
        layout = new_layout;
    }

    Ok(layout.pad_to_align())
}

/// Extends [Allocator] implementations with allocation of [SliceDst] values.
///
/// # Safety
///
/// Relies on a correct [SliceDst] implementation for layout and deallocation.
pub unsafe trait AllocatorDst {
    /// Allocates room for a value with `length` tail elements. The resulting
    /// memory is uninitialised.
    fn allocate_slice_dst<T: SliceDst + ?Sized>(&self, length: usize) -> Result<NonNull<T>, AllocError>;

    /// Deallocates an allocation returned by `allocate_slice_dst`.
    fn deallocate_slice_dst<T: ?Sized + SliceDst>(&self, ptr: NonNull<T>, length: usize);
}

unsafe impl<A: Allocator> AllocatorDst for A {
    fn allocate_slice_dst<T: SliceDst + ?Sized>(&self, length: usize) -> Result<NonNull<T>, AllocError> {
        let ptr = self.allocate(T::layout_for(length).expect("Invalid layout for SliceDst"))?;
        // Construct a slice pointer so the metadata carries the tail length.
        let slice_ptr = unsafe { NonNull::new_unchecked(slice_from_raw_parts_mut(ptr.as_ptr() as *mut (), length)) };
        Ok(T::retype(slice_ptr))
    }

    fn deallocate_slice_dst<T: ?Sized + SliceDst>(&self, ptr: NonNull<T>, length: usize) {
        unsafe {
            self.deallocate(
                NonNull::new_unchecked(ptr.as_ptr() as *mut u8),
                T::layout_for(length).expect("Invalid layout for SliceDst"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use allocator_api2::alloc::Global;

    use super::*;

    #[repr(C)]
    struct WithHeader<T> {
        length: usize,
        array: [T],
    }

    unsafe impl<T> SliceDst for WithHeader<T> {
        fn layout_for(length: usize) -> Result<Layout, LayoutError> {
            let header_layout = Layout::new::<usize>();
            let array_layout = Layout::array::<T>(length)?;

            repr_c(&[header_layout, array_layout])
        }

        fn length(&self) -> usize {
            self.length
        }

        fn retype(ptr: NonNull<[()]>) -> NonNull<Self> {
            unsafe { NonNull::new_unchecked(ptr.as_ptr() as *mut WithHeader<T>) }
        }
    }

    #[test]
    fn test_variable_sized_allocation() {
        let ptr = Global
            .allocate_slice_dst::<WithHeader<usize>>(5)
            .expect("Allocation failed in test");

        Global.deallocate_slice_dst(ptr, 5);
    }
}
