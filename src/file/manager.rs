use std::path::Path;

use crate::buffer::{BUFFER_POOL_SIZE, BufferPool};
use crate::disk::DiskManager;

use super::error::FileResult;
use super::handle::FileHandle;
use super::header::FileHeader;

/// Creates, opens, closes and destroys paged files, and owns the single
/// buffer pool shared by every file handle it produces.
pub struct FileManager {
    pool: BufferPool,
}

impl FileManager {
    /// Create a file manager with the default pool capacity
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_POOL_SIZE)
    }

    /// Create a file manager with the given pool capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: BufferPool::with_capacity(DiskManager::new(), capacity),
        }
    }

    /// Get a reference to the shared buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Get a mutable reference to the shared buffer pool
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    /// Create a new paged file with an empty header
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let disk = self.pool.disk_manager_mut();
        disk.create_file(&path)?;

        let id = disk.open_file(&path)?;
        disk.write_file_header(id, &FileHeader::new().to_bytes())?;
        disk.sync_file(id)?;
        disk.close_file(id)?;
        Ok(())
    }

    /// Open a paged file and load its header
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let disk = self.pool.disk_manager_mut();
        let id = disk.open_file(path)?;
        let raw = disk.read_file_header(id)?;
        let header = FileHeader::from_bytes(&raw)?;
        Ok(FileHandle::new(id, header))
    }

    /// Flush a handle's header and pages, then close the underlying file.
    ///
    /// Fails while any of the file's pages are still pinned; the handle
    /// refuses further operations afterwards.
    pub fn close_file(&mut self, handle: &mut FileHandle) -> FileResult<()> {
        handle.flush_pages(&mut self.pool)?;
        self.pool.disk_manager_mut().close_file(handle.file_id())?;
        handle.mark_closed();
        Ok(())
    }

    /// Delete a paged file at the OS level.
    ///
    /// An open file is closed first: its resident pages are dropped without
    /// write-back (the contents are going away), which fails if any of them
    /// are still pinned.
    pub fn destroy_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        if let Some(id) = self.pool.disk_manager().id_for_path(&path) {
            self.pool.discard_pages(id)?;
        }
        self.pool.disk_manager_mut().remove_file(path)?;
        Ok(())
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}
