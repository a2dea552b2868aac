use crate::disk::{DiskManager, FULL_PAGE_SIZE, FileId, PageNum};

use super::error::{BufferError, BufferResult};
use super::hash_index::HashIndex;
use super::{BUFFER_POOL_SIZE, HASH_TABLE_SIZE};

/// What a buffer slot currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOwner {
    /// Slot is on the free list
    None,
    /// Slot holds a page of an open file
    Page { file: FileId, page: PageNum },
    /// Slot is a raw memory block with no backing file
    Block { id: u64 },
}

/// One slot of the buffer pool
struct BufferSlot {
    /// Page contents, header prefix included
    data: Box<[u8]>,
    /// Previous slot in the used list (unused while free)
    prev: Option<usize>,
    /// Next slot in the used list, or next free slot
    next: Option<usize>,
    /// Number of callers holding this slot; only 0 is evictable
    pin_count: u32,
    /// Contents differ from disk
    dirty: bool,
    owner: SlotOwner,
}

impl BufferSlot {
    fn new() -> Self {
        Self {
            data: vec![0u8; FULL_PAGE_SIZE].into_boxed_slice(),
            prev: None,
            next: None,
            pin_count: 0,
            dirty: false,
            owner: SlotOwner::None,
        }
    }

    /// Placeholder used when moving slots during a resize
    fn hollow() -> Self {
        Self {
            data: Box::new([]),
            prev: None,
            next: None,
            pin_count: 0,
            dirty: false,
            owner: SlotOwner::None,
        }
    }
}

/// Handle to a raw memory block reserved inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    id: u64,
}

/// Fixed-capacity page cache between the disk layer and per-file handles.
///
/// Every slot is threaded onto exactly one of two lists: the doubly linked
/// used list, ordered MRU to LRU, or the singly linked free list. Lookups
/// go through the hash index; eviction picks the least recently used slot
/// with a pin count of zero and writes it back first when dirty.
pub struct BufferPool {
    /// Underlying disk manager; all page I/O goes through here
    disk: DiskManager,
    slots: Vec<BufferSlot>,
    hash: HashIndex,
    /// MRU end of the used list
    first: Option<usize>,
    /// LRU end of the used list
    last: Option<usize>,
    /// Head of the free list
    free: Option<usize>,
    next_block_id: u64,
}

impl BufferPool {
    /// Create a pool with the default capacity
    pub fn new(disk: DiskManager) -> Self {
        Self::with_capacity(disk, BUFFER_POOL_SIZE)
    }

    /// Create a pool with the given number of slots
    pub fn with_capacity(disk: DiskManager, capacity: usize) -> Self {
        assert!(capacity > 0);

        let mut slots: Vec<BufferSlot> = (0..capacity).map(|_| BufferSlot::new()).collect();
        for i in 0..capacity - 1 {
            slots[i].next = Some(i + 1);
        }

        Self {
            disk,
            slots,
            hash: HashIndex::new(HASH_TABLE_SIZE),
            first: None,
            last: None,
            free: Some(0),
            next_block_id: 0,
        }
    }

    /// Get a reference to the disk manager
    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk
    }

    /// Get a mutable reference to the disk manager
    pub fn disk_manager_mut(&mut self) -> &mut DiskManager {
        &mut self.disk
    }

    /// Pin a page and return its buffer, reading it from disk on a miss.
    ///
    /// With `multiple_pins` false a page that is already pinned is refused.
    /// Every access promotes the slot to the MRU end of the used list.
    pub fn get_page(
        &mut self,
        file: FileId,
        page: PageNum,
        multiple_pins: bool,
    ) -> BufferResult<&mut [u8]> {
        if let Some(slot) = self.hash.find(file, page) {
            if !multiple_pins && self.slots[slot].pin_count > 0 {
                return Err(BufferError::PagePinned { file, page });
            }
            self.slots[slot].pin_count += 1;
            // Promote on every access, not just on load
            self.unlink(slot);
            self.link_head(slot);
            return Ok(&mut self.slots[slot].data);
        }

        let slot = self.internal_alloc()?;
        if let Err(e) = self.disk.read_page(file, page, &mut self.slots[slot].data) {
            // Leave the slot reusable; the page was never resident
            self.insert_free(slot);
            return Err(e.into());
        }
        self.init_slot(slot, SlotOwner::Page { file, page });
        self.hash.insert(file, page, slot)?;
        self.link_head(slot);
        Ok(&mut self.slots[slot].data)
    }

    /// Pin a slot for a brand-new page without reading from disk.
    ///
    /// The buffer comes back zeroed. Fails if the page is already resident.
    pub fn allocate_page(&mut self, file: FileId, page: PageNum) -> BufferResult<&mut [u8]> {
        if self.hash.find(file, page).is_some() {
            return Err(BufferError::PageInBuffer { file, page });
        }

        let slot = self.internal_alloc()?;
        self.slots[slot].data.fill(0);
        self.init_slot(slot, SlotOwner::Page { file, page });
        self.hash.insert(file, page, slot)?;
        self.link_head(slot);
        Ok(&mut self.slots[slot].data)
    }

    /// Borrow a resident page's buffer without touching pins or recency
    pub fn peek_page_mut(&mut self, file: FileId, page: PageNum) -> BufferResult<&mut [u8]> {
        let slot = self
            .hash
            .find(file, page)
            .ok_or(BufferError::PageNotInBuffer { file, page })?;
        Ok(&mut self.slots[slot].data)
    }

    /// Mark a resident page as modified
    pub fn mark_dirty(&mut self, file: FileId, page: PageNum) -> BufferResult<()> {
        let slot = self
            .hash
            .find(file, page)
            .ok_or(BufferError::PageNotInBuffer { file, page })?;
        self.slots[slot].dirty = true;
        Ok(())
    }

    /// Release one pin on a page.
    ///
    /// Never evicts or writes back by itself; eviction is driven only by
    /// future allocation pressure.
    pub fn unpin_page(&mut self, file: FileId, page: PageNum) -> BufferResult<()> {
        let slot = self
            .hash
            .find(file, page)
            .ok_or(BufferError::PageNotInBuffer { file, page })?;

        if self.slots[slot].pin_count == 0 {
            return Err(BufferError::PageNotPinned { file, page });
        }
        self.slots[slot].pin_count -= 1;
        Ok(())
    }

    /// Write back and release every resident page of a file.
    ///
    /// Slots are visited in used-list order (MRU first). Hitting a pinned
    /// page stops the walk; pages released before that point stay released.
    pub fn flush_pages(&mut self, file: FileId) -> BufferResult<()> {
        let mut cur = self.first;
        while let Some(slot) = cur {
            let next = self.slots[slot].next;
            if let SlotOwner::Page { file: f, page } = self.slots[slot].owner
                && f == file
            {
                if self.slots[slot].pin_count > 0 {
                    return Err(BufferError::PageStillPinned { file, page });
                }
                if self.slots[slot].dirty {
                    self.disk.write_page(f, page, &self.slots[slot].data)?;
                    self.slots[slot].dirty = false;
                }
                self.hash.remove(f, page)?;
                self.unlink(slot);
                self.insert_free(slot);
            }
            cur = next;
        }
        Ok(())
    }

    /// Release every resident page of a file without writing anything back.
    ///
    /// Used when the file itself is going away; a pinned page aborts with
    /// `PageStillPinned`.
    pub fn discard_pages(&mut self, file: FileId) -> BufferResult<()> {
        let mut cur = self.first;
        while let Some(slot) = cur {
            let next = self.slots[slot].next;
            if let SlotOwner::Page { file: f, page } = self.slots[slot].owner
                && f == file
            {
                if self.slots[slot].pin_count > 0 {
                    return Err(BufferError::PageStillPinned { file, page });
                }
                self.hash.remove(f, page)?;
                self.unlink(slot);
                self.insert_free(slot);
            }
            cur = next;
        }
        Ok(())
    }

    /// Write dirty page(s) of a file to disk without evicting or unpinning.
    ///
    /// `None` forces every resident page of the file; a page that is not
    /// resident is a no-op.
    pub fn force_pages(&mut self, file: FileId, page: Option<PageNum>) -> BufferResult<()> {
        match page {
            Some(p) => {
                if let Some(slot) = self.hash.find(file, p)
                    && self.slots[slot].dirty
                {
                    self.disk.write_page(file, p, &self.slots[slot].data)?;
                    self.slots[slot].dirty = false;
                }
                Ok(())
            }
            None => {
                let mut cur = self.first;
                while let Some(slot) = cur {
                    cur = self.slots[slot].next;
                    if let SlotOwner::Page { file: f, page: p } = self.slots[slot].owner
                        && f == file
                        && self.slots[slot].dirty
                    {
                        self.disk.write_page(f, p, &self.slots[slot].data)?;
                        self.slots[slot].dirty = false;
                    }
                }
                Ok(())
            }
        }
    }

    /// Change the pool capacity.
    ///
    /// Shrinking evicts unpinned slots LRU-first (dirty ones are written
    /// back) until the used population fits; if pinned slots alone exceed
    /// the new capacity the resize fails with `BufferFull` and already
    /// evicted slots stay evicted. Recency order, pins, blocks and index
    /// entries survive the rebuild.
    pub fn resize(&mut self, new_capacity: usize) -> BufferResult<()> {
        assert!(new_capacity > 0);

        while self.used_len() > new_capacity {
            let slot = self.evict_lru_unpinned()?;
            self.insert_free(slot);
        }

        let order = self.used_slots();
        let kept = order.len();

        let mut new_slots: Vec<BufferSlot> = Vec::with_capacity(new_capacity);
        for &slot in &order {
            new_slots.push(std::mem::replace(&mut self.slots[slot], BufferSlot::hollow()));
        }
        for _ in kept..new_capacity {
            new_slots.push(BufferSlot::new());
        }

        // Relink the used part in preserved MRU->LRU order
        for i in 0..kept {
            new_slots[i].prev = if i == 0 { None } else { Some(i - 1) };
            new_slots[i].next = if i + 1 < kept { Some(i + 1) } else { None };
        }

        // Chain the remainder as the free list
        let mut free = None;
        for i in (kept..new_capacity).rev() {
            new_slots[i].prev = None;
            new_slots[i].next = free;
            free = Some(i);
        }

        // Slot indices changed; rebuild the index from scratch
        self.hash.clear();
        for (i, slot) in new_slots.iter().enumerate().take(kept) {
            if let SlotOwner::Page { file, page } = slot.owner {
                self.hash.insert(file, page, i)?;
            }
        }

        self.slots = new_slots;
        self.first = if kept > 0 { Some(0) } else { None };
        self.last = if kept > 0 { Some(kept - 1) } else { None };
        self.free = free;
        Ok(())
    }

    /// Reserve a slot as a raw memory chunk not bound to any file.
    ///
    /// The block stays pinned (and so never evicted) until disposed. It has
    /// no hash index entry and per-file operations never see it.
    pub fn allocate_block(&mut self) -> BufferResult<(BlockHandle, &mut [u8])> {
        let slot = self.internal_alloc()?;
        let id = self.next_block_id;
        self.next_block_id += 1;

        self.slots[slot].data.fill(0);
        self.init_slot(slot, SlotOwner::Block { id });
        self.link_head(slot);
        Ok((BlockHandle { id }, &mut self.slots[slot].data))
    }

    /// Borrow a block's memory
    pub fn block_data_mut(&mut self, block: BlockHandle) -> BufferResult<&mut [u8]> {
        let slot = self.find_block(block)?;
        Ok(&mut self.slots[slot].data)
    }

    /// Release a block's slot back to the free list
    pub fn dispose_block(&mut self, block: BlockHandle) -> BufferResult<()> {
        let slot = self.find_block(block)?;
        self.unlink(slot);
        self.insert_free(slot);
        Ok(())
    }

    /// Usable bytes in a block
    pub fn block_size(&self) -> usize {
        FULL_PAGE_SIZE
    }

    /// Drop every slot, pinned or not, without writing anything back.
    /// For test and reset use only.
    pub fn clear(&mut self) {
        while let Some(slot) = self.first {
            self.unlink(slot);
            self.insert_free(slot);
        }
        self.hash.clear();
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of file pages currently resident
    pub fn resident_count(&self) -> usize {
        self.used_slots()
            .iter()
            .filter(|&&s| matches!(self.slots[s].owner, SlotOwner::Page { .. }))
            .count()
    }

    /// Number of resident pages with unwritten modifications
    pub fn dirty_page_count(&self) -> usize {
        self.used_slots()
            .iter()
            .filter(|&&s| {
                self.slots[s].dirty && matches!(self.slots[s].owner, SlotOwner::Page { .. })
            })
            .count()
    }

    /// Check whether a page is resident
    pub fn is_resident(&self, file: FileId, page: PageNum) -> bool {
        self.hash.find(file, page).is_some()
    }

    /// Current pin count of a resident page
    pub fn pin_count(&self, file: FileId, page: PageNum) -> Option<u32> {
        self.hash.find(file, page).map(|s| self.slots[s].pin_count)
    }

    /// Obtain a reusable slot: pop the free list, else evict the LRU
    /// unpinned slot
    fn internal_alloc(&mut self) -> BufferResult<usize> {
        if let Some(slot) = self.free {
            self.free = self.slots[slot].next;
            self.slots[slot].next = None;
            return Ok(slot);
        }
        self.evict_lru_unpinned()
    }

    /// Reclaim the least recently used slot with no pins.
    ///
    /// A dirty victim is written back first; if the write fails the slot is
    /// left exactly as it was. On success the slot is unlinked and handed
    /// to the caller with its index entry removed.
    fn evict_lru_unpinned(&mut self) -> BufferResult<usize> {
        let mut cur = self.last;
        let victim = loop {
            match cur {
                Some(slot) if self.slots[slot].pin_count == 0 => break slot,
                Some(slot) => cur = self.slots[slot].prev,
                None => return Err(BufferError::BufferFull),
            }
        };

        if self.slots[victim].dirty {
            if let SlotOwner::Page { file, page } = self.slots[victim].owner {
                self.disk.write_page(file, page, &self.slots[victim].data)?;
            }
            self.slots[victim].dirty = false;
        }
        if let SlotOwner::Page { file, page } = self.slots[victim].owner {
            self.hash.remove(file, page)?;
        }
        self.unlink(victim);
        Ok(victim)
    }

    fn init_slot(&mut self, slot: usize, owner: SlotOwner) {
        let desc = &mut self.slots[slot];
        desc.owner = owner;
        desc.pin_count = 1;
        desc.dirty = false;
    }

    /// Insert at the MRU end of the used list
    fn link_head(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.first;
        if let Some(old_first) = self.first {
            self.slots[old_first].prev = Some(slot);
        }
        self.first = Some(slot);
        if self.last.is_none() {
            self.last = Some(slot);
        }
    }

    /// Remove from the used list
    fn unlink(&mut self, slot: usize) {
        let prev = self.slots[slot].prev;
        let next = self.slots[slot].next;

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.last = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    /// Reset a slot and push it onto the free list
    fn insert_free(&mut self, slot: usize) {
        let desc = &mut self.slots[slot];
        desc.pin_count = 0;
        desc.dirty = false;
        desc.owner = SlotOwner::None;
        desc.prev = None;
        desc.next = self.free;
        self.free = Some(slot);
    }

    fn find_block(&self, block: BlockHandle) -> BufferResult<usize> {
        let mut cur = self.first;
        while let Some(slot) = cur {
            if matches!(self.slots[slot].owner, SlotOwner::Block { id } if id == block.id) {
                return Ok(slot);
            }
            cur = self.slots[slot].next;
        }
        Err(BufferError::UnknownBlock)
    }

    /// Slot indices of the used list, MRU first
    fn used_slots(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut cur = self.first;
        while let Some(slot) = cur {
            order.push(slot);
            cur = self.slots[slot].next;
        }
        order
    }

    fn used_len(&self) -> usize {
        self.used_slots().len()
    }
}
