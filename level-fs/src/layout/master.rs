use alloc::vec::Vec;

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

use crate::{Error, MAGIC, Result};

/// 主记录，位于 0 号块：
/// - 提供文件系统合法性校验；
/// - 定位块位图、inode 表与根目录；
/// - 记录上次是否干净地卸载
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct MasterRecord {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数
    pub block_count: u32,
    pub block_size: u16,
    pub inode_count: u16,
    /// 块位图的起始块
    pub block_map_loc: u32,
    /// inode 表的起始块
    pub inode_map_loc: u32,
    pub root_inode: u32,
    /// 0 表示已干净卸载
    pub dirty: u8,
}

impl MasterRecord {
    /// 磁盘上的字节数
    pub const SIZE: usize = 25;

    pub fn new(
        block_count: u32,
        block_size: u16,
        inode_count: u16,
        block_map_loc: u32,
        inode_map_loc: u32,
        root_inode: u32,
    ) -> Self {
        Self {
            magic: MAGIC,
            block_count,
            block_size,
            inode_count,
            block_map_loc,
            inode_map_loc,
            root_inode,
            dirty: 0,
        }
    }

    /// 从 0 号块的开头解出主记录，魔数不符即拒绝
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            return Err(Error::Corrupted("master record is truncated"));
        }
        let record = Self::read_le(&mut Cursor::new(&raw[..Self::SIZE]))
            .map_err(|_| Error::Corrupted("master record"))?;
        if record.magic != MAGIC {
            return Err(Error::BadMagic(record.magic));
        }

        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::SIZE));
        self.write_le(&mut cursor)
            .map_err(|_| Error::Corrupted("master record"))?;
        Ok(cursor.into_inner())
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.dirty == 0
    }

    /// 每个索引块可容纳的块指针数，即 P
    #[inline]
    pub fn ptrs_per_block(&self) -> usize {
        self.block_size as usize / crate::POINTER_SIZE
    }
}
