//! inode 表：容量在创建时确定，之后不再增长。
//! 记录紧密排列在从`inode_map_loc`起的连续块中，挂载时整体读入，卸载时整体写回。

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use block_dev::BlockDevice;

use super::{Inode, InodeKind};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeMap {
    inodes: Vec<Inode>,
}

impl InodeMap {
    pub fn new(count: u16) -> Self {
        Self {
            inodes: (0..count).map(Inode::new).collect(),
        }
    }

    /// inode 表在磁盘上占据的块数
    #[inline]
    pub fn blocks_for(count: usize, block_size: usize) -> usize {
        (count * Inode::RECORD_SIZE).div_ceil(block_size)
    }

    pub fn get(&self, id: u16) -> Result<&Inode> {
        self.inodes
            .get(id as usize)
            .ok_or(Error::Corrupted("inode number beyond the inode map"))
    }

    pub fn get_mut(&mut self, id: u16) -> Result<&mut Inode> {
        self.inodes
            .get_mut(id as usize)
            .ok_or(Error::Corrupted("inode number beyond the inode map"))
    }

    /// 按编号升序寻找第一个空闲 inode，只设置其类型。
    /// 块指针与长度保持原样，由调用者重新初始化。
    pub fn alloc(&mut self, kind: InodeKind) -> Option<u16> {
        let inode = self
            .inodes
            .iter_mut()
            .find(|inode| inode.kind == InodeKind::Free)?;
        inode.kind = kind;
        Some(inode.id)
    }

    /// 只把类型置回空闲
    pub fn free(&mut self, id: u16) -> Result<()> {
        let inode = self.get_mut(id)?;
        if inode.kind == InodeKind::Free {
            log::warn!("attempt to free an already free inode {id}");
        }
        inode.kind = InodeKind::Free;
        Ok(())
    }

    pub fn free_count(&self) -> usize {
        self.inodes
            .iter()
            .filter(|inode| inode.kind == InodeKind::Free)
            .count()
    }

    pub fn load(block_device: &dyn BlockDevice, start_block_id: usize, count: u16) -> Result<Self> {
        let block_size = block_device.block_size();
        let per_block = block_size / Inode::RECORD_SIZE;
        let mut inodes = Vec::with_capacity(count as usize);
        let mut buf = vec![0; block_size];

        for block_index in 0..Self::blocks_for(count as usize, block_size) {
            block_device.read_block(start_block_id + block_index, &mut buf)?;
            for record in buf.chunks_exact(Inode::RECORD_SIZE).take(per_block) {
                if inodes.len() == count as usize {
                    break;
                }
                let inode = Inode::decode(record)?;
                if inode.id as usize != inodes.len() {
                    return Err(Error::Corrupted("inode number doesn't match its slot"));
                }
                inodes.push(inode);
            }
        }

        Ok(Self { inodes })
    }

    /// 返回写入的块数
    pub fn store(&self, block_device: &dyn BlockDevice, start_block_id: usize) -> Result<usize> {
        let block_size = block_device.block_size();
        let per_block = block_size / Inode::RECORD_SIZE;
        let mut buf = vec![0; block_size];
        let mut written = 0;

        for (block_index, inodes) in self.inodes.chunks(per_block).enumerate() {
            buf.fill(0);
            for (inode, record) in inodes.iter().zip(buf.chunks_exact_mut(Inode::RECORD_SIZE)) {
                inode.encode_into(record)?;
            }
            block_device.write_block(start_block_id + block_index, &buf)?;
            written += 1;
        }

        Ok(written)
    }
}

/// 每 8 个一组以`|`分隔，每 64 个一行
impl fmt::Display for InodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, inode) in self.inodes.iter().enumerate() {
            if index % 64 == 0 && index != 0 {
                writeln!(f)?;
            } else if index % 8 == 0 && index != 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", inode.kind.as_char())?;
        }

        Ok(())
    }
}
