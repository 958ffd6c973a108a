//! # 目录层
//!
//! 目录是内容为若干`名字|inode 编号`行的普通文件。
//! 首次访问时整体解码并缓存为名字到 inode 的映射，
//! 修改只作用在缓存上，卸载时再整体重写。

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use crate::{Error, FileSystem, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    children: BTreeMap<String, u16>,
    dirty: bool,
}

impl Directory {
    /// 空行被跳过，因此以换行开头的记录同样可以解码
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = str::from_utf8(raw).map_err(|_| Error::Corrupted("directory isn't UTF-8"))?;
        let mut children = BTreeMap::new();
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            let (name, inode) = line
                .rsplit_once('|')
                .ok_or(Error::Corrupted("directory record without separator"))?;
            let inode = inode
                .parse()
                .map_err(|_| Error::Corrupted("directory record with bad inode number"))?;
            children.insert(String::from(name), inode);
        }

        Ok(Self {
            children,
            dirty: false,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        for (name, inode) in &self.children {
            raw.extend_from_slice(name.as_bytes());
            raw.push(b'|');
            raw.extend_from_slice(inode.to_string().as_bytes());
            raw.push(b'\n');
        }
        raw
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<u16> {
        self.children.get(name).copied()
    }

    /// 按名字升序
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.children
            .iter()
            .map(|(name, &inode)| (name.as_str(), inode))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 序列化后的字节数
    pub fn encoded_len(&self) -> usize {
        self.children
            .iter()
            .map(|(name, inode)| name.len() + inode.to_string().len() + 2)
            .sum()
    }

    fn insert(&mut self, name: &str, inode: u16) -> Result<()> {
        validate_name(name)?;
        if self.children.contains_key(name) {
            return Err(Error::AlreadyExists);
        }
        self.children.insert(String::from(name), inode);
        self.dirty = true;
        Ok(())
    }
}

/// 名字不能为空，也不能含有`/`、`|`或换行
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(|c: char| matches!(c, '/' | '|' | '\n')) {
        return Err(Error::InvalidName);
    }
    Ok(())
}

impl FileSystem {
    /// 读入（或取出缓存中的）目录
    pub(crate) fn dir(&mut self, inode: u16) -> Result<&mut Directory> {
        if !self.dirs.contains_key(&inode) {
            let length = {
                let record = self.inode_map.get(inode)?;
                if !record.is_dir() {
                    return Err(Error::NotADirectory);
                }
                record.length as usize
            };

            let mut raw = vec![0; length];
            let read = self.read_at(inode, 0, &mut raw)?;
            raw.truncate(read);
            let dir = Directory::decode(&raw)?;
            log::debug!("loaded directory {inode} with {} entries", dir.len());
            self.dirs.insert(inode, dir);
        }

        self.dirs.get_mut(&inode).ok_or(Error::NotFound)
    }

    /// 在目录`dir`中登记`name`，目录内容留待卸载时重写。
    ///
    /// 重写所需的块在登记时就分配好，空间不足则撤销登记并返回 [`Error::NoSpace`]。
    pub fn add_child(&mut self, dir: u16, name: &str, child: u16) -> Result<()> {
        let directory = self.dir(dir)?;
        directory.insert(name, child)?;
        let length = directory.encoded_len();

        if let Err(err) = self.reserve_dir(dir, length) {
            if let Some(directory) = self.dirs.get_mut(&dir) {
                directory.children.remove(name);
            }
            return Err(err);
        }
        Ok(())
    }

    /// 整体重写所有脏目录，长度置为序列化后的长度。返回重写的目录数。
    ///
    /// 某个目录失败时仍继续重写其余目录，最后返回遇到的第一个错误。
    pub(crate) fn flush_dirs(&mut self) -> Result<usize> {
        let dirty: Vec<(u16, Vec<u8>)> = self
            .dirs
            .iter()
            .filter(|(_, dir)| dir.is_dirty())
            .map(|(&inode, dir)| (inode, dir.encode()))
            .collect();

        let mut result = Ok(dirty.len());
        for (inode, raw) in &dirty {
            match self.rewrite_dir(*inode, raw) {
                Ok(()) => {
                    if let Some(dir) = self.dirs.get_mut(inode) {
                        dir.dirty = false;
                    }
                }
                Err(err) => {
                    log::error!("directory {inode} not written back: {err}");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }

        result
    }
}

impl FileSystem {
    /// 确保目录写满`length`字节时途经的块都已分配
    fn reserve_dir(&mut self, inode: u16, length: usize) -> Result<()> {
        let block_size = self.block_size();
        for block_index in 0..length.div_ceil(block_size) {
            self.resolve(inode, block_index as u32, true)?;
        }
        Ok(())
    }

    fn rewrite_dir(&mut self, inode: u16, raw: &[u8]) -> Result<()> {
        let written = self.write_at(inode, 0, raw)?;
        if written < raw.len() {
            return Err(Error::NoSpace);
        }
        self.inode_map.get_mut(inode)?.length = raw.len() as u32;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::MemDisk;

    use super::*;
    use crate::{FormatOptions, InodeKind, MasterRecord};

    #[test]
    fn record_format() {
        let dir = Directory::decode(b"\nb|2\na|1").unwrap();
        assert_eq!(dir.get("a"), Some(1));
        assert_eq!(dir.get("b"), Some(2));
        assert_eq!(dir.get("c"), None);
        assert_eq!(dir.encode(), b"a|1\nb|2\n");
        assert_eq!(Directory::decode(&dir.encode()).unwrap(), dir);
    }

    #[test]
    fn rejects_broken_records() {
        assert_eq!(
            Directory::decode(b"a|1\nb"),
            Err(Error::Corrupted("directory record without separator"))
        );
        assert!(Directory::decode(b"a|x\n").is_err());
        assert!(Directory::decode(&[0xff, b'|', b'1']).is_err());
    }

    #[test]
    fn names() {
        assert!(validate_name("notes.txt").is_ok());
        for name in ["", "a/b", "a|b", "a\nb"] {
            assert_eq!(validate_name(name), Err(Error::InvalidName));
        }
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let dir = Directory::decode(b"notes|12\na|1\n").unwrap();
        assert_eq!(dir.encoded_len(), dir.encode().len());
        assert_eq!(Directory::default().encoded_len(), 0);
    }

    #[test]
    fn add_child_reserves_directory_blocks() {
        // 10 个元数据块，1 个数据块
        let disk = Arc::new(MemDisk::new(11, 128));
        let options = FormatOptions {
            block_count: 11,
            block_size: 128,
            inode_count: 8,
        };
        FileSystem::format(disk.clone(), &options).unwrap();

        let mut fs = FileSystem::mount(disk).unwrap();
        let root = fs.root_inode();
        let name = "a-name-that-fills-most-of-a-block-".repeat(3);
        fs.add_child(root, &name, 1).unwrap();
        assert_eq!(fs.free_blocks(), 0);
        assert!(fs.resolve(root, 0, false).unwrap().is_some());

        // 第二项需要第二个块
        assert_eq!(
            fs.add_child(root, "second-entry-that-overflows", 2),
            Err(Error::NoSpace)
        );
        assert_eq!(fs.dir(root).unwrap().get("second-entry-that-overflows"), None);
        assert_eq!(fs.dir(root).unwrap().len(), 1);
        fs.unmount().unwrap();
    }

    #[test]
    fn failed_directory_keeps_the_rest_of_the_session() {
        let disk = Arc::new(MemDisk::new(64, 256));
        let options = FormatOptions {
            block_count: 64,
            block_size: 256,
            inode_count: 16,
        };
        FileSystem::format(disk.clone(), &options).unwrap();

        let mut fs = FileSystem::mount(disk.clone()).unwrap();
        let root = fs.root_inode();
        let keep = fs.new_inode(InodeKind::File).unwrap();
        fs.add_child(root, "keep", keep).unwrap();
        fs.write_at(keep, 0, b"precious").unwrap();

        // 指向 inode 表之外的目录无法写回
        let mut broken = Directory::default();
        broken.insert("x", keep).unwrap();
        fs.dirs.insert(16, broken);
        assert!(matches!(fs.unmount(), Err(Error::Corrupted(_))));
        assert!(disk.is_closed());

        disk.reopen();
        assert_eq!(MasterRecord::decode(&disk.snapshot()).unwrap().dirty, 1);
        let mut fs = FileSystem::mount(disk).unwrap();
        assert_eq!(fs.dir(root).unwrap().get("keep"), Some(keep));
        let mut buf = [0; 8];
        assert_eq!(fs.read_at(keep, 0, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"precious");
    }

    #[test]
    fn children_survive_remount() {
        let disk = Arc::new(MemDisk::new(64, 256));
        let options = FormatOptions {
            block_count: 64,
            block_size: 256,
            inode_count: 16,
        };
        FileSystem::format(disk.clone(), &options).unwrap();

        let mut fs = FileSystem::mount(disk.clone()).unwrap();
        let root = fs.root_inode();
        let child = fs.new_inode(InodeKind::File).unwrap();
        fs.add_child(root, "hello", child).unwrap();
        assert_eq!(fs.add_child(root, "hello", child), Err(Error::AlreadyExists));
        assert_eq!(fs.add_child(child, "x", root), Err(Error::NotADirectory));
        assert!(fs.dir(root).unwrap().is_dirty());
        fs.unmount().unwrap();

        disk.reopen();
        let mut fs = FileSystem::mount(disk).unwrap();
        assert_eq!(fs.inode(root).unwrap().length, 8);
        assert_eq!(fs.dir(root).unwrap().get("hello"), Some(child));
        assert!(!fs.dir(root).unwrap().is_dirty());
    }
}
