use crate::disk::{DiskError, FileId, PageNum};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Disk error: {0}")]
    Disk(#[from] DiskError),

    #[error("Buffer pool is full: every slot is pinned")]
    BufferFull,

    #[error("Page not in buffer: file={file:?}, page={page}")]
    PageNotInBuffer { file: FileId, page: PageNum },

    #[error("Page already in buffer: file={file:?}, page={page}")]
    PageInBuffer { file: FileId, page: PageNum },

    #[error("Page is pinned: file={file:?}, page={page}")]
    PagePinned { file: FileId, page: PageNum },

    #[error("Cannot release pages of file {file:?}: page {page} is still pinned")]
    PageStillPinned { file: FileId, page: PageNum },

    #[error("Page is not pinned: file={file:?}, page={page}")]
    PageNotPinned { file: FileId, page: PageNum },

    #[error("Block handle does not refer to an allocated block")]
    UnknownBlock,
}

pub type BufferResult<T> = Result<T, BufferError>;
