use derive_more::Display;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "device: {}", _0)]
    Device(block_dev::Error),
    #[display(fmt = "no free block available")]
    NoSpace,
    #[display(fmt = "no free inode available")]
    NoInode,
    #[display(fmt = "bad magic {:#010x} in master record", _0)]
    BadMagic(u32),
    #[display(fmt = "bad magic {:#010x} in inode {}", found, inode)]
    BadInodeMagic { inode: u16, found: u32 },
    #[display(fmt = "corrupted structure: {}", _0)]
    Corrupted(&'static str),
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "already exists")]
    AlreadyExists,
    #[display(fmt = "invalid file name")]
    InvalidName,
    #[display(fmt = "bad geometry: {}", _0)]
    BadGeometry(&'static str),
    #[display(fmt = "file was opened read-only")]
    ReadOnly,
    #[display(fmt = "file would exceed the maximum length")]
    TooLarge,
}

impl From<block_dev::Error> for Error {
    #[inline]
    fn from(err: block_dev::Error) -> Self {
        Self::Device(err)
    }
}
