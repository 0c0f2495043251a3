//! Doubly-linked list of free blocks, threaded through the block headers.

use log::trace;

use crate::block::{BlockHandle, MIN_BLOCK_BYTES};

/// Intrusive list anchored at its head. Links live in the block headers and
/// are meaningful only while a block is on the list.
pub(crate) struct FreeList {
    head: Option<BlockHandle>,
}

impl FreeList {
    pub(crate) fn new() -> FreeList {
        FreeList { head: None }
    }

    pub(crate) fn head(&self) -> Option<BlockHandle> {
        self.head
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn iter(&self) -> Blocks {
        Blocks { cursor: self.head }
    }

    /// Smallest block with `total_size >= min_total`; the first such block
    /// encountered wins ties. Exact fits are taken on purpose: turning them
    /// away would pull a fresh chunk for a request the list already holds.
    pub(crate) fn find_best_fit(&self, min_total: usize) -> Option<BlockHandle> {
        let mut best: Option<BlockHandle> = None;
        for block in self.iter() {
            if block.total_size() < min_total {
                continue;
            }
            match best {
                Some(b) if b.total_size() <= block.total_size() => {}
                _ => best = Some(block),
            }
        }
        best
    }

    /// Inserts `block` as the new head.
    pub(crate) fn push_front(&mut self, block: BlockHandle) {
        block.set_prev(None);
        block.set_next(self.head);
        if let Some(old_head) = self.head {
            old_head.set_prev(Some(block));
        }
        self.head = Some(block);
    }

    /// Appends `block` after the current tail.
    pub(crate) fn push_back(&mut self, block: BlockHandle) {
        match self.tail() {
            Some(tail) => {
                tail.set_next(Some(block));
                block.set_prev(Some(tail));
                block.set_next(None);
            }
            None => self.push_front(block),
        }
    }

    pub(crate) fn tail(&self) -> Option<BlockHandle> {
        let mut last = None;
        for block in self.iter() {
            last = Some(block);
        }
        last
    }

    /// Splices `block` out, repairing its neighbors and the head. The
    /// block's own links are cleared.
    pub(crate) fn unlink(&mut self, block: BlockHandle) {
        match block.prev() {
            Some(prev) => prev.set_next(block.next()),
            None => self.head = block.next(),
        }
        if let Some(next) = block.next() {
            next.set_prev(block.prev());
        }
        block.set_prev(None);
        block.set_next(None);
    }

    /// Puts `new` in `old`'s exact list position; `old`'s links are cleared.
    pub(crate) fn replace(&mut self, old: BlockHandle, new: BlockHandle) {
        new.set_prev(old.prev());
        new.set_next(old.next());
        match old.prev() {
            Some(prev) => prev.set_next(Some(new)),
            None => self.head = Some(new),
        }
        if let Some(next) = old.next() {
            next.set_prev(Some(new));
        }
        old.set_prev(None);
        old.set_next(None);
    }

    /// Detaches `block` for allocation, keeping `keep` bytes of it. A
    /// remainder strictly larger than `MIN_BLOCK_BYTES` becomes a free block
    /// in `block`'s former list position; anything smaller stays with the
    /// caller, so the allocation may span more bytes than asked for.
    pub(crate) fn split(&mut self, block: BlockHandle, keep: usize) -> Option<BlockHandle> {
        let remainder_size = block.total_size() - keep;
        if remainder_size > MIN_BLOCK_BYTES {
            // Safety: block covers keep + remainder_size bytes of chunk
            // memory, so the remainder header lands inside it.
            let remainder = unsafe { BlockHandle::init(block.addr() + keep, remainder_size) };
            self.replace(block, remainder);
            block.set_total_size(keep);
            trace!(
                "split block at {:#x}: kept {}, remainder {}",
                block.addr(),
                keep,
                remainder_size
            );
            Some(remainder)
        } else {
            self.unlink(block);
            None
        }
    }
}

pub(crate) struct Blocks {
    cursor: Option<BlockHandle>,
}

impl Iterator for Blocks {
    type Item = BlockHandle;

    fn next(&mut self) -> Option<BlockHandle> {
        let block = self.cursor?;
        self.cursor = block.next();
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_at(base: usize, offset: usize, total_size: usize) -> BlockHandle {
        // Safety: tests size their backing Vec to cover every block they
        // create.
        unsafe { BlockHandle::init(base + offset, total_size) }
    }

    #[test]
    fn push_front_onto_empty_list() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let block = block_at(base, 0, 128);
        list.push_front(block);

        assert!(!list.is_empty());
        assert_eq!(list.head(), Some(block));
        assert_eq!(block.prev(), None);
        assert_eq!(block.next(), None);
    }

    #[test]
    fn push_front_links_old_head_both_ways() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        list.push_front(first);
        list.push_front(second);

        assert_eq!(list.head(), Some(second));
        assert_eq!(second.next(), Some(first));
        assert_eq!(first.prev(), Some(second));
        assert_eq!(first.next(), None);
    }

    #[test]
    fn push_back_appends_after_the_tail() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        let third = block_at(base, 256, 128);
        list.push_front(second);
        list.push_front(first);
        list.push_back(third);

        assert_eq!(list.head(), Some(first));
        assert_eq!(list.tail(), Some(third));
        assert_eq!(second.next(), Some(third));
        assert_eq!(third.prev(), Some(second));
        assert_eq!(third.next(), None);
    }

    #[test]
    fn push_back_onto_empty_list_installs_a_head() {
        let mut memory = vec![0u8; 256];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let block = block_at(base, 0, 128);
        list.push_back(block);

        assert_eq!(list.head(), Some(block));
        assert_eq!(list.tail(), Some(block));
    }

    #[test]
    fn unlink_head_moves_head_forward() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        list.push_front(second);
        list.push_front(first);

        list.unlink(first);

        assert_eq!(list.head(), Some(second));
        assert_eq!(second.prev(), None);
        assert_eq!(first.prev(), None);
        assert_eq!(first.next(), None);
    }

    #[test]
    fn unlink_middle_block_bridges_neighbors() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        let third = block_at(base, 256, 128);
        list.push_front(third);
        list.push_front(second);
        list.push_front(first);

        list.unlink(second);

        assert_eq!(first.next(), Some(third));
        assert_eq!(third.prev(), Some(first));
        assert_eq!(list.iter().count(), 2);
    }

    #[test]
    fn unlink_tail_clears_predecessor_link() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        list.push_front(second);
        list.push_front(first);

        list.unlink(second);

        assert_eq!(first.next(), None);
        assert_eq!(list.tail(), Some(first));
    }

    #[test]
    fn unlink_only_block_empties_the_list() {
        let mut memory = vec![0u8; 256];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let block = block_at(base, 0, 128);
        list.push_front(block);
        list.unlink(block);

        assert!(list.is_empty());
        assert_eq!(list.head(), None);
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_block() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let large = block_at(base, 0, 400);
        let small = block_at(base, 400, 100);
        let medium = block_at(base, 500, 200);
        list.push_front(large);
        list.push_front(small);
        list.push_front(medium);

        assert_eq!(list.find_best_fit(150), Some(medium));
    }

    #[test]
    fn best_fit_accepts_an_exact_fit() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let large = block_at(base, 0, 400);
        let exact = block_at(base, 400, 150);
        list.push_front(large);
        list.push_front(exact);

        assert_eq!(list.find_best_fit(150), Some(exact));
    }

    #[test]
    fn best_fit_keeps_first_of_equal_blocks() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let later = block_at(base, 0, 200);
        let earlier = block_at(base, 200, 200);
        list.push_front(later);
        list.push_front(earlier);

        assert_eq!(list.find_best_fit(100), Some(earlier));
    }

    #[test]
    fn best_fit_reports_nothing_when_every_block_is_small() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        list.push_front(block_at(base, 0, 100));
        list.push_front(block_at(base, 100, 120));

        assert_eq!(list.find_best_fit(121), None);
    }

    #[test]
    fn split_leaves_remainder_in_former_position() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let neighbor = block_at(base, 500, 100);
        let block = block_at(base, 0, 300);
        list.push_front(block);
        list.push_front(neighbor);

        let remainder = list.split(block, 120).unwrap();

        assert_eq!(block.total_size(), 120);
        assert_eq!(block.prev(), None);
        assert_eq!(block.next(), None);
        assert_eq!(remainder.addr(), base + 120);
        assert_eq!(remainder.total_size(), 180);
        assert_eq!(neighbor.next(), Some(remainder));
        assert_eq!(remainder.prev(), Some(neighbor));
        assert_eq!(remainder.next(), None);
        assert_eq!(list.head(), Some(neighbor));
    }

    #[test]
    fn split_at_the_head_promotes_the_remainder() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let block = block_at(base, 0, 300);
        list.push_front(block);

        let remainder = list.split(block, 100).unwrap();

        assert_eq!(list.head(), Some(remainder));
        assert_eq!(remainder.total_size(), 200);
    }

    #[test]
    fn split_consumes_block_when_remainder_is_too_small() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let total = 100 + MIN_BLOCK_BYTES;
        let block = block_at(base, 0, total);
        list.push_front(block);

        assert_eq!(list.split(block, 100), None);
        assert!(list.is_empty());
        assert_eq!(block.total_size(), total);
    }

    #[test]
    fn replace_preserves_neighbor_links() {
        let mut memory = vec![0u8; 1024];
        let base = memory.as_mut_ptr() as usize;
        let mut list = FreeList::new();

        let first = block_at(base, 0, 128);
        let second = block_at(base, 128, 128);
        let third = block_at(base, 256, 128);
        let stand_in = block_at(base, 512, 128);
        list.push_front(third);
        list.push_front(second);
        list.push_front(first);

        list.replace(second, stand_in);

        assert_eq!(first.next(), Some(stand_in));
        assert_eq!(stand_in.prev(), Some(first));
        assert_eq!(stand_in.next(), Some(third));
        assert_eq!(third.prev(), Some(stand_in));
        assert_eq!(second.prev(), None);
        assert_eq!(second.next(), None);

        list.replace(first, second);

        assert_eq!(list.head(), Some(second));
        assert_eq!(second.next(), Some(stand_in));
    }
}
