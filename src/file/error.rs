use crate::buffer::BufferError;
use crate::disk::{DiskError, PageNum};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Disk error: {0}")]
    Disk(#[from] DiskError),

    #[error("File is not open")]
    FileClosed,

    #[error("Invalid page number: {0}")]
    InvalidPage(PageNum),

    #[error("Page {0} is already free")]
    PageAlreadyFree(PageNum),

    #[error("End of file")]
    EndOfFile,

    #[error("Invalid page header value: {0}")]
    InvalidPageHeader(i64),

    #[error("Free list points at in-use page {0}")]
    CorruptFreeList(PageNum),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type FileResult<T> = Result<T, FileError>;
