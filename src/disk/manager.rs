use ahash::AHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{DiskError, DiskResult};
use super::{FILE_HEADER_SIZE, FULL_PAGE_SIZE, FileId, PageNum};

/// Manages open files and positioned page I/O
pub struct DiskManager {
    /// Map from file ids to open files
    open_files: AHashMap<FileId, FileEntry>,
    /// Map from file paths to ids (for checking if already open)
    path_to_id: AHashMap<PathBuf, FileId>,
    /// Next available file id
    next_id: u32,
    /// Maximum number of open files
    max_open_files: usize,
    /// Completed physical reads (pages and headers)
    read_count: u64,
    /// Completed physical writes (pages and headers)
    write_count: u64,
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

impl DiskManager {
    /// Create a new disk manager
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    /// Create a new disk manager with specified max open files
    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: AHashMap::new(),
            path_to_id: AHashMap::new(),
            next_id: 0,
            max_open_files,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Create a new file
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> DiskResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(DiskError::FileAlreadyExists(path.display().to_string()));
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> DiskResult<FileId> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| DiskError::FileNotFound(path_ref.display().to_string()))?;

        // Check if file is already open
        if let Some(&id) = self.path_to_id.get(&path) {
            return Ok(id);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(DiskError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let id = FileId::new(self.next_id);
        self.next_id += 1;

        self.open_files.insert(
            id,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_id.insert(path, id);

        Ok(id)
    }

    /// Close a file
    pub fn close_file(&mut self, id: FileId) -> DiskResult<()> {
        let entry = self
            .open_files
            .remove(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        self.path_to_id.remove(&entry.path);
        Ok(())
    }

    /// Remove (delete) a file, closing it first if open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> DiskResult<()> {
        let path = path.as_ref();

        if let Ok(canonical_path) = path.canonicalize() {
            if let Some(&id) = self.path_to_id.get(&canonical_path) {
                self.close_file(id)?;
            }
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Look up the id of an open file by path, if any
    pub fn id_for_path<P: AsRef<Path>>(&self, path: P) -> Option<FileId> {
        let canonical = path.as_ref().canonicalize().ok()?;
        self.path_to_id.get(&canonical).copied()
    }

    /// Read a page from a file into `buffer`
    pub fn read_page(
        &mut self,
        id: FileId,
        page_num: PageNum,
        buffer: &mut [u8],
    ) -> DiskResult<()> {
        if buffer.len() != FULL_PAGE_SIZE {
            return Err(DiskError::InvalidPageSize {
                expected: FULL_PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        entry.file.seek(SeekFrom::Start(page_offset(page_num)))?;
        read_exact(&mut entry.file, buffer)?;

        self.read_count += 1;
        Ok(())
    }

    /// Write a page to a file
    pub fn write_page(&mut self, id: FileId, page_num: PageNum, buffer: &[u8]) -> DiskResult<()> {
        if buffer.len() != FULL_PAGE_SIZE {
            return Err(DiskError::InvalidPageSize {
                expected: FULL_PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        let offset = page_offset(page_num);
        let required_size = offset + FULL_PAGE_SIZE as u64;

        // Extend file if necessary to ensure we can write at this offset
        let current_size = entry.file.metadata()?.len();
        if current_size < required_size {
            entry.file.set_len(required_size)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        write_all(&mut entry.file, buffer)?;

        self.write_count += 1;
        Ok(())
    }

    /// Read the file header stored at offset 0
    pub fn read_file_header(&mut self, id: FileId) -> DiskResult<[u8; FILE_HEADER_SIZE]> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        let mut buffer = [0u8; FILE_HEADER_SIZE];
        entry.file.seek(SeekFrom::Start(0))?;
        read_exact(&mut entry.file, &mut buffer)?;

        self.read_count += 1;
        Ok(buffer)
    }

    /// Write the file header at offset 0
    pub fn write_file_header(
        &mut self,
        id: FileId,
        header: &[u8; FILE_HEADER_SIZE],
    ) -> DiskResult<()> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        entry.file.seek(SeekFrom::Start(0))?;
        write_all(&mut entry.file, header)?;

        self.write_count += 1;
        Ok(())
    }

    /// Sync a file to disk (flush all OS buffers)
    pub fn sync_file(&mut self, id: FileId) -> DiskResult<()> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(DiskError::InvalidHandle(id.as_u32()))?;

        entry.file.sync_data()?;
        Ok(())
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> DiskResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a file is open
    pub fn is_file_open(&self, id: FileId) -> bool {
        self.open_files.contains_key(&id)
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    /// Number of completed physical reads
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Number of completed physical writes
    pub fn write_count(&self) -> u64 {
        self.write_count
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of a page: the header region occupies the first full-page unit
fn page_offset(page_num: PageNum) -> u64 {
    FULL_PAGE_SIZE as u64 * (page_num as u64 + 1)
}

/// Fill `buffer` completely; a premature EOF is corruption, not zero-fill
fn read_exact(file: &mut File, buffer: &mut [u8]) -> DiskResult<()> {
    let mut total = 0;
    while total < buffer.len() {
        let n = file.read(&mut buffer[total..])?;
        if n == 0 {
            return Err(DiskError::ShortRead {
                expected: buffer.len(),
                actual: total,
            });
        }
        total += n;
    }
    Ok(())
}

/// Write `buffer` completely; stalled progress is a short write
fn write_all(file: &mut File, buffer: &[u8]) -> DiskResult<()> {
    let mut total = 0;
    while total < buffer.len() {
        let n = file.write(&buffer[total..])?;
        if n == 0 {
            return Err(DiskError::ShortWrite {
                expected: buffer.len(),
                actual: total,
            });
        }
        total += n;
    }
    Ok(())
}
