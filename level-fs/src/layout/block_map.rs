//! 块位图：每个物理块一位，0 为空闲，1 为已分配。
//!
//! 内存中直接保存磁盘形式：按字节打包，字节内高位在前。
//! 从主记录之后的`block_map_loc`起连续存放，挂载时整体读入，卸载时整体写回。

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use block_dev::BlockDevice;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMap {
    bits: Vec<u8>,
    /// 位图所指示的块数
    len: usize,
}

/// 位在位图中的位置：字节下标 + 字节内的位
struct BitPos(usize);

impl BlockMap {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// 位图在磁盘上占据的块数
    #[inline]
    pub fn blocks_for(len: usize, block_size: usize) -> usize {
        len.div_ceil(8).div_ceil(block_size)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_allocated(&self, block_id: u32) -> bool {
        if block_id as usize >= self.len {
            return false;
        }
        let (byte, mask) = BitPos(block_id as usize).decode();
        self.bits[byte] & mask != 0
    }

    /// 永久占用`0..count`，用于主记录与两张表
    pub fn reserve(&mut self, count: usize) {
        for block_id in 0..count.min(self.len) {
            let (byte, mask) = BitPos(block_id).decode();
            self.bits[byte] |= mask;
        }
    }

    /// 按地址升序寻找第一个空闲块并占用。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&mut self) -> Option<u32> {
        // 字节内还有 0 的才可能有空闲块
        let (byte, bit) = self
            .bits
            .iter()
            .enumerate()
            .find_map(|(byte, &bits)| (bits != u8::MAX).then_some((byte, bits.leading_ones())))?;

        let block_id = BitPos::encode(byte, bit as usize);
        // 末字节多出来的位不对应任何块
        if block_id >= self.len {
            return None;
        }

        self.bits[byte] |= 0x80 >> bit;
        Some(block_id as u32)
    }

    /// 释放一个块。释放空闲块只是警告，返回`false`。
    pub fn free(&mut self, block_id: u32) -> Result<bool> {
        if block_id as usize >= self.len {
            return Err(Error::Corrupted("block address beyond the block map"));
        }

        let (byte, mask) = BitPos(block_id as usize).decode();
        if self.bits[byte] & mask == 0 {
            log::warn!("attempt to free an already unallocated block {block_id}");
            return Ok(false);
        }

        self.bits[byte] &= !mask;
        Ok(true)
    }

    pub fn free_count(&self) -> usize {
        let used: usize = self.bits.iter().map(|bits| bits.count_ones() as usize).sum();
        self.len - used
    }

    /// 磁盘形式
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn load(
        block_device: &dyn BlockDevice,
        start_block_id: usize,
        len: usize,
    ) -> Result<Self> {
        let block_size = block_device.block_size();
        let mut map = Self::new(len);
        let mut buf = vec![0; block_size];

        for (block_index, chunk) in map.bits.chunks_mut(block_size).enumerate() {
            block_device.read_block(start_block_id + block_index, &mut buf)?;
            chunk.copy_from_slice(&buf[..chunk.len()]);
        }
        map.clear_tail();

        Ok(map)
    }

    /// 返回写入的块数
    pub fn store(&self, block_device: &dyn BlockDevice, start_block_id: usize) -> Result<usize> {
        let block_size = block_device.block_size();
        let mut written = 0;
        for (block_index, chunk) in self.bits.chunks(block_size).enumerate() {
            block_device.write_block_padded(start_block_id + block_index, chunk)?;
            written += 1;
        }

        Ok(written)
    }

    /// 清掉末字节中超出`len`的位
    fn clear_tail(&mut self) {
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= !(0xffu8 >> rem);
            }
        }
    }
}

impl BitPos {
    #[inline]
    fn encode(byte: usize, bit: usize) -> usize {
        byte * 8 + bit
    }

    /// 字节下标与掩码，字节内高位在前
    #[inline]
    fn decode(self) -> (usize, u8) {
        (self.0 / 8, 0x80 >> (self.0 % 8))
    }
}

/// 每 8 块一组以`|`分隔，每 64 块一行
impl fmt::Display for BlockMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block_id in 0..self.len {
            if block_id % 64 == 0 && block_id != 0 {
                writeln!(f)?;
            } else if block_id % 8 == 0 && block_id != 0 {
                write!(f, "|")?;
            }
            let bit = if self.is_allocated(block_id as u32) { '1' } else { '0' };
            write!(f, "{bit}")?;
        }

        Ok(())
    }
}
