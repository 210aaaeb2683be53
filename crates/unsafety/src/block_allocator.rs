use std::alloc::Layout;
use std::array;
use std::cell::RefCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use allocator_api2::alloc::AllocError;
use allocator_api2::alloc::Allocator;
use itertools::Itertools;

/// A slab allocator for a concrete type `T`. Memory is requested from the
/// system in blocks of `N` cells, so the per-cell bookkeeping overhead of
/// general purpose allocation is avoided for the small fixed-size term cells.
///
/// Freed cells are threaded into an intrusive free list through the cell
/// storage itself; allocation prefers the free list over extending the
/// current block.
pub struct BlockAllocator<T, const N: usize> {
    /// The block that receives fresh allocations.
    head_block: Option<Box<Block<T, N>>>,

    /// Head of the free list; None when no cell has been reclaimed.
    free: Option<NonNull<Cell<T>>>,
}

impl<T, const N: usize> Default for BlockAllocator<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BlockAllocator<T, N> {
    pub fn new() -> Self {
        Self {
            head_block: None,
            free: None,
        }
    }

    /// Hands out a cell for one object of type `T`. The cell is uninitialised.
    pub fn allocate_object(&mut self) -> Result<NonNull<T>, AllocError> {
        if let Some(free) = self.free {
            unsafe {
                // By the free list invariant this cell stores the next link.
                self.free = free.as_ref().next;
            }
            return Ok(free.cast::<T>());
        }

        // After this the head block has room for at least one cell.
        let block = match &mut self.head_block {
            Some(block) => {
                if block.is_full() {
                    let mut new_block = Box::new(Block::new());
                    std::mem::swap(block, &mut new_block);
                    block.next = Some(new_block);
                }

                block
            }
            None => {
                self.head_block = Some(Box::new(Block::new()));
                self.head_block.as_mut().expect("Initialized in the previous line")
            }
        };

        let index = block.used;
        block.used += 1;
        unsafe {
            // A pointer to the ManuallyDrop<T> field has the layout of T.
            Ok(NonNull::new_unchecked(
                &mut block.cells[index].data as *mut ManuallyDrop<T> as *mut T,
            ))
        }
    }

    /// Returns the cell to the free list. The object itself must already have
    /// been dropped by the caller.
    pub fn deallocate_object(&mut self, ptr: NonNull<T>) {
        let mut cell = ptr.cast::<Cell<T>>();
        unsafe {
            cell.as_mut().next = self.free;
        }
        self.free = Some(cell);
    }

    fn iter_free(&self) -> FreeListIter<T> {
        FreeListIter { current: self.free }
    }
}

/// Adapts a [BlockAllocator] to the [Allocator] interface, for use as the
/// backing store of containers that allocate nodes of a single layout.
pub struct AllocBlock<T, const N: usize> {
    block_allocator: RefCell<BlockAllocator<T, N>>,
}

impl<T, const N: usize> Default for AllocBlock<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> AllocBlock<T, N> {
    pub fn new() -> Self {
        Self {
            block_allocator: RefCell::new(BlockAllocator::new()),
        }
    }
}

unsafe impl<T, const N: usize> Allocator for AllocBlock<T, N> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert_eq!(layout, Layout::new::<T>(), "The requested layout must match T");

        let ptr = self.block_allocator.borrow_mut().allocate_object()?;

        let byte_ptr = ptr.cast::<u8>();
        Ok(NonNull::slice_from_raw_parts(byte_ptr, std::mem::size_of::<T>()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        debug_assert_eq!(layout, Layout::new::<T>(), "The requested layout must match T");
        self.block_allocator.borrow_mut().deallocate_object(ptr.cast::<T>());
    }
}

/// A cell either stores a live object or, when reclaimed, the link to the
/// next free cell.
union Cell<T> {
    data: ManuallyDrop<T>,
    next: Option<NonNull<Cell<T>>>,
}

/// A singly linked list of blocks storing `N` cells each.
struct Block<T, const N: usize> {
    cells: [Cell<T>; N],

    /// The number of cells handed out from this block.
    used: usize,

    next: Option<Box<Block<T, N>>>,
}

impl<T, const N: usize> Block<T, N> {
    fn new() -> Self {
        Self {
            cells: array::from_fn(|_i| Cell { next: None }),
            used: 0,
            next: None,
        }
    }

    fn is_full(&self) -> bool {
        self.used == N
    }
}

struct FreeListIter<T> {
    current: Option<NonNull<Cell<T>>>,
}

impl<T> Iterator for FreeListIter<T> {
    type Item = NonNull<Cell<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        unsafe {
            self.current = current.as_ref().next;
        }
        Some(current)
    }
}

impl<T, const N: usize> fmt::Debug for BlockAllocator<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "freelist = {:?}", self.iter_free().format(", "))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::seq::SliceRandom;

    use maxterm_utilities::random_test;

    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_block_allocator_reuse() {
        random_test(100, |rng| {
            let mut allocator: BlockAllocator<u64, 64> = BlockAllocator::new();

            let mut allocated = Vec::new();
            for _ in 0..200 {
                let ptr = allocator.allocate_object().unwrap();
                unsafe {
                    ptr.as_ptr().write(rng.random());
                }
                allocated.push(ptr);
            }

            // Free a random half and allocate again; the freed cells must be
            // handed out before a new block is touched.
            allocated.shuffle(rng);
            let mut freed = Vec::new();
            for _ in 0..100 {
                let ptr = allocated.pop().unwrap();
                allocator.deallocate_object(ptr);
                freed.push(ptr);
            }

            for _ in 0..100 {
                let ptr = allocator.allocate_object().unwrap();
                assert!(freed.contains(&ptr), "Allocation must reuse a reclaimed cell");
            }
        })
    }

    #[test]
    fn test_block_allocator_exhausts_free_list() {
        let mut allocator: BlockAllocator<u32, 8> = BlockAllocator::new();

        let first = allocator.allocate_object().unwrap();
        allocator.deallocate_object(first);

        // The single free cell is reused, after which allocation falls back
        // to the block.
        let again = allocator.allocate_object().unwrap();
        assert_eq!(first, again);
        let _fresh = allocator.allocate_object().unwrap();
    }
}
