//! # 字节流层
//!
//! 把任意字节区间拆成逐块的操作：只有第一块可能从块内偏移处开始，
//! 之后的每一块都从块首开始。

use crate::block_cache::CachedBlock;
use crate::{Error, FileSystem, Result};

impl FileSystem {
    /// 从`offset`处读取，读取范围截断到文件长度。
    /// 长度以内未分配的块读出全 0，读取从不分配块。
    pub fn read_at(&mut self, inode: u16, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let length = self.inode_map.get(inode)?.length as usize;
        if offset >= length {
            return Ok(0);
        }
        let end = length.min(offset + buf.len());
        let block_size = self.block_size();

        let mut pos = offset;
        while pos < end {
            let block_index = pos / block_size;
            let in_block = pos % block_size;
            let len = (block_size - in_block).min(end - pos);
            let dst = &mut buf[pos - offset..pos - offset + len];

            match self.resolve(inode, block_index as u32, false)? {
                Some(block_id) => dst.copy_from_slice(
                    &self.cache.data(block_id, &*self.block_device)?[in_block..in_block + len],
                ),
                None => dst.fill(0),
            }
            pos += len;
        }

        Ok(end - offset)
    }

    /// 从`offset`处写入，按需分配块。
    ///
    /// 写到一半空间耗尽时返回已写入的字节数；一个字节都没写入则返回 [`Error::NoSpace`]。
    pub fn write_at(&mut self, inode: u16, offset: usize, buf: &[u8]) -> Result<usize> {
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or(Error::TooLarge)?;
        let block_size = self.block_size();

        let mut pos = offset;
        while pos < end {
            let block_index = pos / block_size;
            let in_block = pos % block_size;
            let len = (block_size - in_block).min(end - pos);
            let src = &buf[pos - offset..pos - offset + len];

            let block_id = match self.resolve(inode, block_index as u32, true) {
                Ok(Some(block_id)) => block_id,
                Err(Error::NoSpace) if pos > offset => {
                    log::warn!("inode {inode}: out of space after {} bytes", pos - offset);
                    break;
                }
                Ok(None) => return Err(Error::NoSpace),
                Err(err) => return Err(err),
            };

            if len == block_size {
                self.cache.put(block_id, CachedBlock::Data(src.into()));
            } else {
                // 不足一块时保留块内其余字节
                self.cache.data_mut(block_id, &*self.block_device)?[in_block..in_block + len]
                    .copy_from_slice(src);
            }
            pos += len;
        }

        if pos > offset {
            let now = self.now();
            let record = self.inode_map.get_mut(inode)?;
            record.length = record.length.max(pos as u32);
            record.mdate = now;
        }

        Ok(pos - offset)
    }

    /// 改变文件长度。
    ///
    /// 缩短时最后一块中新长度之后的字节清零，其后的块全部释放，
    /// 因此之后再延长，新露出的部分读出全 0。
    pub(crate) fn set_length(&mut self, inode: u16, length: u32) -> Result<()> {
        let block_size = self.block_size();
        if length < self.inode_map.get(inode)?.length {
            let block_index = length as usize / block_size;
            let in_block = length as usize % block_size;
            if in_block > 0 {
                if let Some(block_id) = self.resolve(inode, block_index as u32, false)? {
                    self.cache.data_mut(block_id, &*self.block_device)?[in_block..].fill(0);
                }
            }

            let keep = (length as usize).div_ceil(block_size) as u64;
            let (mut tree, inodes) = self.tree();
            tree.release_from(inodes.get_mut(inode)?, keep)?;
        }

        let now = self.now();
        let record = self.inode_map.get_mut(inode)?;
        record.length = length;
        record.mdate = now;
        Ok(())
    }
}
