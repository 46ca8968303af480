use thiserror::Error;

/// Every fallible engine operation reports exactly one of these kinds to the
/// caller of that operation; nothing escalates past it.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no device is mounted")]
    NotMounted,
    #[error("no such file")]
    NotFound,
    #[error("file already exists")]
    AlreadyExists,
    #[error("file name is too long")]
    NameTooLong,
    #[error("not enough free blocks")]
    CapacityExceeded,
    #[error("descriptor table is full")]
    TableFull,
    #[error("range is outside the file")]
    OutOfRange,
    #[error("file handle is not open")]
    HandleNotOpen,
    #[error("invalid device image: {0}")]
    Format(String),
    #[error("device io failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
