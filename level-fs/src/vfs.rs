//! # 索引节点层
//!
//! 以路径为单位的操作：从根目录出发逐段查找，
//! 在此之上提供文件的打开、创建与目录的建立、列举。
//!
//! [`File`] 只是一个游标，每次操作都要借用挂载中的 [`FileSystem`]。

use alloc::string::String;
use alloc::vec::Vec;

use enumflags2::BitFlags;

use crate::dir::validate_name;
use crate::{Error, FileSystem, InodeKind, Permission, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// 不存在则创建，存在则截断为空
    Write,
    /// 不存在则创建，每次都写在末尾
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: u16,
    pub kind: InodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub inode: u16,
    pub kind: InodeKind,
    pub perms: BitFlags<Permission>,
    pub level: u8,
    pub size: u32,
    /// 数据块与索引块之和
    pub blocks: usize,
    pub cdate: u32,
    pub mdate: u32,
}

/// 打开的文件
#[derive(Debug)]
pub struct File {
    inode: u16,
    offset: usize,
    mode: OpenMode,
}

/// 去掉空段后的路径分量
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|name| !name.is_empty())
}

impl FileSystem {
    /// 路径到 inode，任何一段不存在即为 [`Error::NotFound`]
    pub fn namei(&mut self, path: &str) -> Result<u16> {
        self.walk(components(path))
    }

    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<File> {
        let inode = match self.namei(path) {
            Ok(inode) => inode,
            Err(Error::NotFound) if mode != OpenMode::Read => self.create(path)?,
            Err(err) => return Err(err),
        };
        if self.inode(inode)?.is_dir() {
            return Err(Error::IsADirectory);
        }

        let offset = match mode {
            OpenMode::Read => 0,
            OpenMode::Write => {
                self.set_length(inode, 0)?;
                0
            }
            OpenMode::Append => self.inode(inode)?.length as usize,
        };

        Ok(File {
            inode,
            offset,
            mode,
        })
    }

    /// 创建空的普通文件
    pub fn create(&mut self, path: &str) -> Result<u16> {
        self.make(path, InodeKind::File)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<u16> {
        self.make(path, InodeKind::Directory)
    }

    /// 不存在则创建空文件，存在则只更新修改时间
    pub fn touch(&mut self, path: &str) -> Result<u16> {
        let inode = match self.namei(path) {
            Ok(inode) => inode,
            Err(Error::NotFound) => return self.create(path),
            Err(err) => return Err(err),
        };
        let now = self.now();
        self.inode_map.get_mut(inode)?.mdate = now;
        Ok(inode)
    }

    /// 目录下的所有项，按名字升序
    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let inode = self.namei(path)?;
        let children: Vec<(String, u16)> = self
            .dir(inode)?
            .iter()
            .map(|(name, inode)| (String::from(name), inode))
            .collect();

        let mut entries = Vec::with_capacity(children.len());
        for (name, inode) in children {
            entries.push(DirEntry {
                kind: self.inode(inode)?.kind,
                name,
                inode,
            });
        }

        Ok(entries)
    }

    pub fn stat(&mut self, inode: u16) -> Result<Stat> {
        let blocks = self.allocated_blocks(inode)?;
        let record = self.inode(inode)?;
        Ok(Stat {
            inode,
            kind: record.kind,
            perms: record.perms,
            level: record.level,
            size: record.length,
            blocks,
            cdate: record.cdate,
            mdate: record.mdate,
        })
    }
}

impl FileSystem {
    fn walk<'p>(&mut self, names: impl IntoIterator<Item = &'p str>) -> Result<u16> {
        let mut inode = self.root_inode();
        for name in names {
            inode = self.dir(inode)?.get(name).ok_or(Error::NotFound)?;
        }
        Ok(inode)
    }

    fn make(&mut self, path: &str, kind: InodeKind) -> Result<u16> {
        let mut names: Vec<&str> = components(path).collect();
        let name = names.pop().ok_or(Error::AlreadyExists)?;
        validate_name(name)?;

        let parent = self.walk(names)?;
        if self.dir(parent)?.get(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let inode = self.new_inode(kind)?;
        if let Err(err) = self.add_child(parent, name, inode) {
            self.inode_map.free(inode)?;
            return Err(err);
        }
        log::debug!("created {kind:?} {path} as inode {inode}");
        Ok(inode)
    }
}

impl File {
    #[inline]
    pub fn inode(&self) -> u16 {
        self.inode
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn read(&mut self, fs: &mut FileSystem, buf: &mut [u8]) -> Result<usize> {
        let read = fs.read_at(self.inode, self.offset, buf)?;
        self.offset += read;
        Ok(read)
    }

    pub fn write(&mut self, fs: &mut FileSystem, buf: &[u8]) -> Result<usize> {
        match self.mode {
            OpenMode::Read => return Err(Error::ReadOnly),
            OpenMode::Append => self.offset = fs.inode(self.inode)?.length as usize,
            OpenMode::Write => {}
        }
        let written = fs.write_at(self.inode, self.offset, buf)?;
        self.offset += written;
        Ok(written)
    }

    /// 越过开头时停在 0，越过末尾则允许，之后的写入会留下空洞
    pub fn seek(&mut self, fs: &FileSystem, whence: Whence, delta: i64) -> Result<usize> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.offset as i64,
            Whence::End => fs.inode(self.inode)?.length as i64,
        };
        self.offset = base.saturating_add(delta).max(0) as usize;
        Ok(self.offset)
    }

    pub fn truncate(&mut self, fs: &mut FileSystem, length: u32) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(Error::ReadOnly);
        }
        fs.set_length(self.inode, length)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec;

    use block_dev::MemDisk;

    use super::*;
    use crate::FormatOptions;

    fn mounted() -> FileSystem {
        let disk = Arc::new(MemDisk::new(128, 256));
        let options = FormatOptions {
            block_count: 128,
            block_size: 256,
            inode_count: 32,
        };
        FileSystem::format(disk.clone(), &options).unwrap();
        FileSystem::mount(disk).unwrap()
    }

    #[test]
    fn path_resolution() {
        let mut fs = mounted();
        let a = fs.mkdir("/a").unwrap();
        let b = fs.create("/a/b").unwrap();

        assert_eq!(fs.namei("/").unwrap(), fs.root_inode());
        assert_eq!(fs.namei("/a").unwrap(), a);
        assert_eq!(fs.namei("/a/b").unwrap(), b);
        assert_eq!(fs.namei("a//b/").unwrap(), b);
        assert_eq!(fs.namei("/a/missing"), Err(Error::NotFound));
        assert_eq!(fs.namei("/missing/b"), Err(Error::NotFound));
        assert_eq!(fs.namei("/a/b/c"), Err(Error::NotADirectory));
    }

    #[test]
    fn make_rejects_duplicates_and_bad_parents() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        assert_eq!(fs.mkdir("/a"), Err(Error::AlreadyExists));
        assert_eq!(fs.create("/a"), Err(Error::AlreadyExists));
        assert_eq!(fs.create("/"), Err(Error::AlreadyExists));
        assert_eq!(fs.create("/x/y"), Err(Error::NotFound));

        let free = fs.free_inodes();
        assert_eq!(fs.create("/a/b|c"), Err(Error::InvalidName));
        assert_eq!(fs.free_inodes(), free);
    }

    #[test]
    fn list_in_name_order() {
        let mut fs = mounted();
        fs.create("/zeta").unwrap();
        let docs = fs.mkdir("/docs").unwrap();
        fs.create("/alpha").unwrap();

        let names: Vec<String> = fs.list("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["alpha", "docs", "zeta"]);
        let entries = fs.list("/").unwrap();
        assert_eq!(
            entries[1],
            DirEntry {
                name: String::from("docs"),
                inode: docs,
                kind: InodeKind::Directory
            }
        );
        assert!(fs.list("/docs").unwrap().is_empty());
        assert_eq!(fs.list("/zeta"), Err(Error::NotADirectory));
    }

    #[test]
    fn open_modes() {
        let mut fs = mounted();
        assert!(matches!(fs.open("/f", OpenMode::Read), Err(Error::NotFound)));

        let mut file = fs.open("/f", OpenMode::Write).unwrap();
        assert_eq!(file.write(&mut fs, b"hello world").unwrap(), 11);

        let mut file = fs.open("/f", OpenMode::Append).unwrap();
        assert_eq!(file.offset(), 11);
        file.seek(&fs, Whence::Start, 0).unwrap();
        file.write(&mut fs, b"!").unwrap();

        let mut file = fs.open("/f", OpenMode::Read).unwrap();
        let mut buf = [0; 32];
        assert_eq!(file.read(&mut fs, &mut buf).unwrap(), 12);
        assert_eq!(&buf[..12], b"hello world!");
        assert_eq!(file.write(&mut fs, b"x"), Err(Error::ReadOnly));

        let file = fs.open("/f", OpenMode::Write).unwrap();
        assert_eq!(fs.inode(file.inode()).unwrap().length, 0);

        fs.mkdir("/d").unwrap();
        assert!(matches!(fs.open("/d", OpenMode::Read), Err(Error::IsADirectory)));
    }

    #[test]
    fn seek_and_truncate() {
        let mut fs = mounted();
        let mut file = fs.open("/f", OpenMode::Write).unwrap();
        file.write(&mut fs, &[1; 100]).unwrap();

        assert_eq!(file.seek(&fs, Whence::End, -10).unwrap(), 90);
        assert_eq!(file.seek(&fs, Whence::Current, -1000).unwrap(), 0);
        assert_eq!(file.seek(&fs, Whence::Start, 400).unwrap(), 400);
        file.write(&mut fs, &[2; 4]).unwrap();
        assert_eq!(fs.inode(file.inode()).unwrap().length, 404);

        file.truncate(&mut fs, 50).unwrap();
        let mut buf = vec![0; 100];
        file.seek(&fs, Whence::Start, 0).unwrap();
        assert_eq!(file.read(&mut fs, &mut buf).unwrap(), 50);
    }

    #[test]
    fn reopening_for_write_discards_old_contents() {
        let mut fs = mounted();
        let mut file = fs.open("/f", OpenMode::Write).unwrap();
        file.write(&mut fs, &[b'S'; 600]).unwrap();
        let free = fs.free_blocks();

        let mut file = fs.open("/f", OpenMode::Write).unwrap();
        assert_eq!(fs.free_blocks(), free + 3);
        file.seek(&fs, Whence::Start, 500).unwrap();
        file.write(&mut fs, b"x").unwrap();

        let mut buf = vec![0xff; 501];
        assert_eq!(fs.read_at(file.inode(), 0, &mut buf).unwrap(), 501);
        assert!(buf[..500].iter().all(|&b| b == 0));
        assert_eq!(buf[500], b'x');
    }

    #[test]
    fn touch_bumps_mdate() {
        let mut fs = mounted();
        fs.set_clock(|| 7);
        let inode = fs.touch("/t").unwrap();
        fs.open("/t", OpenMode::Append).unwrap().write(&mut fs, b"abc").unwrap();

        fs.set_clock(|| 9);
        assert_eq!(fs.touch("/t").unwrap(), inode);
        let stat = fs.stat(inode).unwrap();
        assert_eq!((stat.cdate, stat.mdate, stat.size), (7, 9, 3));

        let dir = fs.mkdir("/d").unwrap();
        assert_eq!(fs.touch("/d").unwrap(), dir);
        assert_eq!(fs.stat(dir).unwrap().mdate, 9);
        assert_eq!(fs.touch("/t/x"), Err(Error::NotADirectory));
    }

    #[test]
    fn stat_counts_tree_blocks() {
        let mut fs = mounted();
        fs.set_clock(|| 42);
        let mut file = fs.open("/f", OpenMode::Write).unwrap();

        // 27 个数据块迫使树长一层
        file.write(&mut fs, &vec![3; 256 * 27]).unwrap();
        let stat = fs.stat(file.inode()).unwrap();
        assert_eq!(stat.kind, InodeKind::File);
        assert_eq!(stat.level, 1);
        assert_eq!(stat.size, 256 * 27);
        assert_eq!(stat.blocks, 28);
        assert_eq!(stat.perms.bits(), 0o644);
        assert_eq!((stat.cdate, stat.mdate), (42, 42));
    }
}
