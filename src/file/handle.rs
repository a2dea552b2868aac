use crate::buffer::BufferPool;
use crate::disk::{DiskManager, FileId, PAGE_HEADER_SIZE, PageNum};

use super::error::{FileError, FileResult};
use super::header::{FileHeader, PageDisposition};

/// A pinned page: its number and exactly `PAGE_SIZE` usable bytes.
///
/// The slice points straight into buffer pool memory; no copy is made. The
/// caller must unpin the page through the file handle when done and mark it
/// dirty after mutating it.
pub struct Page<'a> {
    page_num: PageNum,
    data: &'a mut [u8],
}

impl<'a> Page<'a> {
    fn new(page_num: PageNum, data: &'a mut [u8]) -> Self {
        Self { page_num, data }
    }

    pub fn page_num(&self) -> PageNum {
        self.page_num
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

/// Access to the pages of one open file.
///
/// Holds the file's cached header and threads the in-file free-page list
/// through the page headers. Page operations borrow the shared buffer pool
/// owned by the `FileManager` that built this handle.
pub struct FileHandle {
    file: FileId,
    header: FileHeader,
    /// Header differs from its on-disk copy
    hdr_changed: bool,
    open: bool,
}

impl FileHandle {
    pub(crate) fn new(file: FileId, header: FileHeader) -> Self {
        Self {
            file,
            header,
            hdr_changed: false,
            open: true,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Number of allocated pages, header page excluded
    pub fn num_pages(&self) -> u32 {
        self.header.num_pages
    }

    /// Head of the file's free-page list
    pub fn first_free(&self) -> Option<PageNum> {
        self.header.first_free
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_closed(&mut self) {
        self.open = false;
    }

    /// Get the first in-use page of the file, pinned
    pub fn get_first_page<'a>(&self, pool: &'a mut BufferPool) -> FileResult<Page<'a>> {
        self.check_open()?;
        let found = self.find_used_from(pool, 0)?;
        self.get_this_page(pool, found)
    }

    /// Get the next in-use page after `current`, pinned.
    ///
    /// `current` may refer to a disposed page but must lie inside the file.
    pub fn get_next_page<'a>(
        &self,
        pool: &'a mut BufferPool,
        current: PageNum,
    ) -> FileResult<Page<'a>> {
        self.check_open()?;
        if !self.is_valid_page(current) {
            return Err(FileError::InvalidPage(current));
        }
        let found = self.find_used_from(pool, current + 1)?;
        self.get_this_page(pool, found)
    }

    /// Get the last in-use page of the file, pinned
    pub fn get_last_page<'a>(&self, pool: &'a mut BufferPool) -> FileResult<Page<'a>> {
        self.check_open()?;
        let found = self.find_used_below(pool, self.header.num_pages)?;
        self.get_this_page(pool, found)
    }

    /// Get the previous in-use page before `current`, pinned.
    ///
    /// `current == num_pages` is accepted as the one-past-the-end position.
    pub fn get_prev_page<'a>(
        &self,
        pool: &'a mut BufferPool,
        current: PageNum,
    ) -> FileResult<Page<'a>> {
        self.check_open()?;
        if current != self.header.num_pages && !self.is_valid_page(current) {
            return Err(FileError::InvalidPage(current));
        }
        let found = self.find_used_below(pool, current)?;
        self.get_this_page(pool, found)
    }

    /// Pin a specific page and return it.
    ///
    /// A page number outside `[0, num_pages)` or a page sitting on the free
    /// list is rejected with `InvalidPage`; a rejected free page is unpinned
    /// again before returning.
    pub fn get_this_page<'a>(
        &self,
        pool: &'a mut BufferPool,
        page_num: PageNum,
    ) -> FileResult<Page<'a>> {
        self.check_open()?;
        if !self.is_valid_page(page_num) {
            return Err(FileError::InvalidPage(page_num));
        }

        let disposition = {
            let buf = pool.get_page(self.file, page_num, true)?;
            PageDisposition::from_bytes(&buf[..PAGE_HEADER_SIZE])
        };
        match disposition {
            Ok(PageDisposition::InUse) => {
                let buf = pool.peek_page_mut(self.file, page_num)?;
                Ok(Page::new(page_num, &mut buf[PAGE_HEADER_SIZE..]))
            }
            Ok(_) => {
                pool.unpin_page(self.file, page_num)?;
                Err(FileError::InvalidPage(page_num))
            }
            Err(e) => {
                pool.unpin_page(self.file, page_num)?;
                Err(e)
            }
        }
    }

    /// Allocate a page, reusing the head of the file's free list when one
    /// exists and extending the file otherwise.
    ///
    /// The page comes back pinned, zeroed and marked dirty.
    pub fn allocate_page<'a>(&mut self, pool: &'a mut BufferPool) -> FileResult<Page<'a>> {
        self.check_open()?;

        let page_num = match self.header.first_free {
            Some(free) => {
                let disposition = {
                    let buf = pool.get_page(self.file, free, true)?;
                    PageDisposition::from_bytes(&buf[..PAGE_HEADER_SIZE])
                };
                let disposition = match disposition {
                    Ok(d) => d,
                    Err(e) => {
                        pool.unpin_page(self.file, free)?;
                        return Err(e);
                    }
                };
                // Advance the free list head to whatever the page points at
                self.header.first_free = match disposition {
                    PageDisposition::NextFree(next) => Some(next),
                    PageDisposition::FreeListEnd => None,
                    PageDisposition::InUse => {
                        pool.unpin_page(self.file, free)?;
                        return Err(FileError::CorruptFreeList(free));
                    }
                };
                free
            }
            None => {
                let page_num = self.header.num_pages;
                pool.allocate_page(self.file, page_num)?;
                self.header.num_pages += 1;
                page_num
            }
        };

        self.hdr_changed = true;
        pool.mark_dirty(self.file, page_num)?;

        let buf = pool.peek_page_mut(self.file, page_num)?;
        buf[..PAGE_HEADER_SIZE].copy_from_slice(&PageDisposition::InUse.to_bytes());
        buf[PAGE_HEADER_SIZE..].fill(0);
        Ok(Page::new(page_num, &mut buf[PAGE_HEADER_SIZE..]))
    }

    /// Dispose of a page, threading it onto the head of the file's free
    /// list.
    ///
    /// The page must not be pinned by anyone else; callers are expected to
    /// unpin before disposing.
    pub fn dispose_page(&mut self, pool: &mut BufferPool, page_num: PageNum) -> FileResult<()> {
        self.check_open()?;
        if !self.is_valid_page(page_num) {
            return Err(FileError::InvalidPage(page_num));
        }

        let disposition = {
            let buf = pool.get_page(self.file, page_num, false)?;
            PageDisposition::from_bytes(&buf[..PAGE_HEADER_SIZE])
        };
        let disposition = match disposition {
            Ok(d) => d,
            Err(e) => {
                pool.unpin_page(self.file, page_num)?;
                return Err(e);
            }
        };
        if disposition != PageDisposition::InUse {
            pool.unpin_page(self.file, page_num)?;
            return Err(FileError::PageAlreadyFree(page_num));
        }

        let link = match self.header.first_free {
            Some(next) => PageDisposition::NextFree(next),
            None => PageDisposition::FreeListEnd,
        };
        {
            let buf = pool.peek_page_mut(self.file, page_num)?;
            buf[..PAGE_HEADER_SIZE].copy_from_slice(&link.to_bytes());
        }
        self.header.first_free = Some(page_num);
        self.hdr_changed = true;

        pool.mark_dirty(self.file, page_num)?;
        pool.unpin_page(self.file, page_num)?;
        Ok(())
    }

    /// Mark a page of this file as modified
    pub fn mark_dirty(&self, pool: &mut BufferPool, page_num: PageNum) -> FileResult<()> {
        self.check_open()?;
        if !self.is_valid_page(page_num) {
            return Err(FileError::InvalidPage(page_num));
        }
        pool.mark_dirty(self.file, page_num)?;
        Ok(())
    }

    /// Release one pin on a page of this file
    pub fn unpin_page(&self, pool: &mut BufferPool, page_num: PageNum) -> FileResult<()> {
        self.check_open()?;
        if !self.is_valid_page(page_num) {
            return Err(FileError::InvalidPage(page_num));
        }
        pool.unpin_page(self.file, page_num)?;
        Ok(())
    }

    /// Persist the header (when changed) and then write back and release
    /// every buffered page of this file.
    ///
    /// The header page is not cached, so it is written directly to disk.
    pub fn flush_pages(&mut self, pool: &mut BufferPool) -> FileResult<()> {
        self.check_open()?;
        self.write_header_if_changed(pool.disk_manager_mut())?;
        pool.flush_pages(self.file)?;
        pool.disk_manager_mut().sync_file(self.file)?;
        Ok(())
    }

    /// Persist the header (when changed) and force dirty page(s) to disk
    /// without evicting or unpinning them. `None` forces the whole file.
    pub fn force_pages(&mut self, pool: &mut BufferPool, page_num: Option<PageNum>) -> FileResult<()> {
        self.check_open()?;
        if let Some(page) = page_num
            && !self.is_valid_page(page)
        {
            return Err(FileError::InvalidPage(page));
        }
        self.write_header_if_changed(pool.disk_manager_mut())?;
        pool.force_pages(self.file, page_num)?;
        Ok(())
    }

    fn write_header_if_changed(&mut self, disk: &mut DiskManager) -> FileResult<()> {
        if self.hdr_changed {
            disk.write_file_header(self.file, &self.header.to_bytes())?;
            self.hdr_changed = false;
        }
        Ok(())
    }

    /// First in-use page at or after `from`
    fn find_used_from(&self, pool: &mut BufferPool, from: PageNum) -> FileResult<PageNum> {
        let mut current = from;
        while self.is_valid_page(current) {
            let disposition = {
                let buf = pool.get_page(self.file, current, true)?;
                PageDisposition::from_bytes(&buf[..PAGE_HEADER_SIZE])
            };
            pool.unpin_page(self.file, current)?;
            if disposition? == PageDisposition::InUse {
                return Ok(current);
            }
            current += 1;
        }
        Err(FileError::EndOfFile)
    }

    /// Last in-use page strictly below `bound`
    fn find_used_below(&self, pool: &mut BufferPool, bound: PageNum) -> FileResult<PageNum> {
        let mut current = bound;
        while current > 0 {
            current -= 1;
            let disposition = {
                let buf = pool.get_page(self.file, current, true)?;
                PageDisposition::from_bytes(&buf[..PAGE_HEADER_SIZE])
            };
            pool.unpin_page(self.file, current)?;
            if disposition? == PageDisposition::InUse {
                return Ok(current);
            }
        }
        Err(FileError::EndOfFile)
    }

    fn check_open(&self) -> FileResult<()> {
        if self.open { Ok(()) } else { Err(FileError::FileClosed) }
    }

    fn is_valid_page(&self, page_num: PageNum) -> bool {
        page_num < self.header.num_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferError;
    use crate::disk::{FULL_PAGE_SIZE, PAGE_SIZE};
    use crate::file::FileManager;
    use tempfile::TempDir;

    fn setup(capacity: usize) -> (TempDir, FileManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        let mut manager = FileManager::with_capacity(capacity);
        manager.create_file(&path).unwrap();
        let handle = manager.open_file(&path).unwrap();

        (temp_dir, manager, handle)
    }

    /// Allocate `count` pages and unpin them all
    fn allocate_unpinned(manager: &mut FileManager, handle: &mut FileHandle, count: u32) {
        for _ in 0..count {
            let num = handle.allocate_page(manager.pool_mut()).unwrap().page_num();
            handle.unpin_page(manager.pool_mut(), num).unwrap();
        }
    }

    #[test]
    fn test_allocate_first_page() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        let page = handle.allocate_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 0);
        assert_eq!(page.data().len(), PAGE_SIZE);
        assert!(page.data().iter().all(|&b| b == 0));

        assert_eq!(handle.num_pages(), 1);
        assert_eq!(manager.pool().pin_count(handle.file_id(), 0), Some(1));
    }

    #[test]
    fn test_allocate_extends_sequentially() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        for expected in 0..3 {
            let page = handle.allocate_page(manager.pool_mut()).unwrap();
            assert_eq!(page.page_num(), expected);
        }
        assert_eq!(handle.num_pages(), 3);
    }

    #[test]
    fn test_dispose_then_allocate_reuses_lifo() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 3);

        handle.dispose_page(manager.pool_mut(), 0).unwrap();
        handle.dispose_page(manager.pool_mut(), 2).unwrap();
        assert_eq!(handle.first_free(), Some(2));

        // Last disposed comes back first
        let page = handle.allocate_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 2);
        let page = handle.allocate_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 0);
        assert_eq!(handle.first_free(), None);

        // Free list drained: the next allocation extends the file
        let page = handle.allocate_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 3);
        assert_eq!(handle.num_pages(), 4);
    }

    #[test]
    fn test_dispose_twice_fails() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 2);

        handle.dispose_page(manager.pool_mut(), 1).unwrap();
        let result = handle.dispose_page(manager.pool_mut(), 1);
        assert!(matches!(result, Err(FileError::PageAlreadyFree(1))));
    }

    #[test]
    fn test_dispose_pinned_page_fails() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        let num = handle.allocate_page(manager.pool_mut()).unwrap().page_num();
        // Still pinned from allocation
        let result = handle.dispose_page(manager.pool_mut(), num);
        assert!(matches!(
            result,
            Err(FileError::Buffer(BufferError::PagePinned { .. }))
        ));

        handle.unpin_page(manager.pool_mut(), num).unwrap();
        handle.dispose_page(manager.pool_mut(), num).unwrap();
    }

    #[test]
    fn test_get_this_page() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        let mut page = handle.allocate_page(manager.pool_mut()).unwrap();
        page.data_mut()[0] = 0x5A;
        let num = page.page_num();
        handle.mark_dirty(manager.pool_mut(), num).unwrap();
        handle.unpin_page(manager.pool_mut(), num).unwrap();

        let page = handle.get_this_page(manager.pool_mut(), num).unwrap();
        assert_eq!(page.data()[0], 0x5A);
        handle.unpin_page(manager.pool_mut(), num).unwrap();
    }

    #[test]
    fn test_get_this_page_rejects_out_of_range() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 1);

        let result = handle.get_this_page(manager.pool_mut(), 5);
        assert!(matches!(result, Err(FileError::InvalidPage(5))));
    }

    #[test]
    fn test_get_this_page_rejects_free_page() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 2);
        handle.dispose_page(manager.pool_mut(), 0).unwrap();

        let result = handle.get_this_page(manager.pool_mut(), 0);
        assert!(matches!(result, Err(FileError::InvalidPage(0))));
        // The rejected page was unpinned again
        assert_eq!(manager.pool().pin_count(handle.file_id(), 0), Some(0));
    }

    #[test]
    fn test_round_trip_through_eviction() {
        let (_temp_dir, mut manager, mut handle) = setup(2);

        let mut page = handle.allocate_page(manager.pool_mut()).unwrap();
        let pattern: Vec<u8> = (0..64).map(|i| i as u8 ^ 0x7F).collect();
        page.data_mut()[..pattern.len()].copy_from_slice(&pattern);
        handle.mark_dirty(manager.pool_mut(), 0).unwrap();
        handle.unpin_page(manager.pool_mut(), 0).unwrap();

        // Pool pressure evicts page 0
        allocate_unpinned(&mut manager, &mut handle, 2);
        assert!(!manager.pool().is_resident(handle.file_id(), 0));

        let page = handle.get_this_page(manager.pool_mut(), 0).unwrap();
        assert_eq!(&page.data()[..pattern.len()], &pattern[..]);
        handle.unpin_page(manager.pool_mut(), 0).unwrap();
    }

    #[test]
    fn test_forward_scan_skips_holes() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 3);
        handle.dispose_page(manager.pool_mut(), 1).unwrap();

        let page = handle.get_first_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 0);
        handle.unpin_page(manager.pool_mut(), 0).unwrap();

        let page = handle.get_next_page(manager.pool_mut(), 0).unwrap();
        assert_eq!(page.page_num(), 2);
        handle.unpin_page(manager.pool_mut(), 2).unwrap();

        let result = handle.get_next_page(manager.pool_mut(), 2);
        assert!(matches!(result, Err(FileError::EndOfFile)));
    }

    #[test]
    fn test_backward_scan_skips_holes() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 3);
        handle.dispose_page(manager.pool_mut(), 1).unwrap();

        // num_pages is the valid one-past-the-end starting point
        let page = handle
            .get_prev_page(manager.pool_mut(), handle.num_pages())
            .unwrap();
        assert_eq!(page.page_num(), 2);
        handle.unpin_page(manager.pool_mut(), 2).unwrap();

        let page = handle.get_prev_page(manager.pool_mut(), 2).unwrap();
        assert_eq!(page.page_num(), 0);
        handle.unpin_page(manager.pool_mut(), 0).unwrap();

        let result = handle.get_prev_page(manager.pool_mut(), 0);
        assert!(matches!(result, Err(FileError::EndOfFile)));
    }

    #[test]
    fn test_get_last_page() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 3);
        handle.dispose_page(manager.pool_mut(), 2).unwrap();

        let page = handle.get_last_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 1);
        handle.unpin_page(manager.pool_mut(), 1).unwrap();
    }

    #[test]
    fn test_scan_empty_file() {
        let (_temp_dir, mut manager, handle) = setup(8);

        let result = handle.get_first_page(manager.pool_mut());
        assert!(matches!(result, Err(FileError::EndOfFile)));
        let result = handle.get_last_page(manager.pool_mut());
        assert!(matches!(result, Err(FileError::EndOfFile)));
    }

    #[test]
    fn test_scan_rejects_out_of_range_cursor() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 2);

        let result = handle.get_next_page(manager.pool_mut(), 2);
        assert!(matches!(result, Err(FileError::InvalidPage(2))));

        // One past the end is only legal for the backward scan
        let result = handle.get_prev_page(manager.pool_mut(), 3);
        assert!(matches!(result, Err(FileError::InvalidPage(3))));
    }

    #[test]
    fn test_header_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        let mut manager = FileManager::with_capacity(8);
        manager.create_file(&path).unwrap();
        let mut handle = manager.open_file(&path).unwrap();

        allocate_unpinned(&mut manager, &mut handle, 3);
        handle.dispose_page(manager.pool_mut(), 1).unwrap();
        manager.close_file(&mut handle).unwrap();

        let mut handle = manager.open_file(&path).unwrap();
        assert_eq!(handle.num_pages(), 3);
        assert_eq!(handle.first_free(), Some(1));

        // The free list survives too: the disposed page is reused
        let page = handle.allocate_page(manager.pool_mut()).unwrap();
        assert_eq!(page.page_num(), 1);
    }

    #[test]
    fn test_flush_writes_header_only_when_changed() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 1);

        handle.flush_pages(manager.pool_mut()).unwrap();
        let writes = manager.pool().disk_manager().write_count();

        // Nothing changed since: no header write, no page writes
        handle.flush_pages(manager.pool_mut()).unwrap();
        assert_eq!(manager.pool().disk_manager().write_count(), writes);
    }

    #[test]
    fn test_flush_fails_while_pinned() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        handle.allocate_page(manager.pool_mut()).unwrap();
        let result = handle.flush_pages(manager.pool_mut());
        assert!(matches!(
            result,
            Err(FileError::Buffer(BufferError::PageStillPinned { .. }))
        ));
    }

    #[test]
    fn test_force_pages_keeps_page_usable() {
        let (_temp_dir, mut manager, mut handle) = setup(8);

        let mut page = handle.allocate_page(manager.pool_mut()).unwrap();
        page.data_mut()[0] = 0xC3;
        let num = page.page_num();
        handle.mark_dirty(manager.pool_mut(), num).unwrap();

        handle.force_pages(manager.pool_mut(), Some(num)).unwrap();

        // Still pinned and resident; on-disk copy already holds the data
        assert_eq!(manager.pool().pin_count(handle.file_id(), num), Some(1));
        let mut raw = vec![0u8; FULL_PAGE_SIZE];
        manager
            .pool_mut()
            .disk_manager_mut()
            .read_page(handle.file_id(), num, &mut raw)
            .unwrap();
        assert_eq!(raw[PAGE_HEADER_SIZE], 0xC3);

        handle.unpin_page(manager.pool_mut(), num).unwrap();
    }

    #[test]
    fn test_operations_after_close_fail() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        let mut manager = FileManager::with_capacity(8);
        manager.create_file(&path).unwrap();
        let mut handle = manager.open_file(&path).unwrap();
        manager.close_file(&mut handle).unwrap();

        assert!(matches!(
            handle.allocate_page(manager.pool_mut()),
            Err(FileError::FileClosed)
        ));
        assert!(matches!(
            handle.get_first_page(manager.pool_mut()),
            Err(FileError::FileClosed)
        ));
        assert!(matches!(
            handle.flush_pages(manager.pool_mut()),
            Err(FileError::FileClosed)
        ));
    }

    #[test]
    fn test_mark_dirty_validates_page_number() {
        let (_temp_dir, mut manager, mut handle) = setup(8);
        allocate_unpinned(&mut manager, &mut handle, 1);

        let result = handle.mark_dirty(manager.pool_mut(), 9);
        assert!(matches!(result, Err(FileError::InvalidPage(9))));
    }
}
