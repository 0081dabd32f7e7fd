#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("disk not initialised")]
    NotInitialised,
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("read of block {block} failed")]
    ReadFailed { block: u32 },
    #[error("write of block {block} failed")]
    WriteFailed { block: u32 },
    #[error("device is read-only")]
    ReadOnly,
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no free cluster in the file allocation table")]
    DiskFull,
    #[error("root directory has no free entry")]
    RootDirFull,
    #[error("on-disk layout is malformed: {0}")]
    MalformedOnDisk(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
