//! # 块缓存层
//!
//! 以物理块号为键，缓存本次挂载期间读过或分配过的块：
//! 索引块保存解码后的指针数组，数据块保存原始字节。
//! 从设备读入的块只解码一次，之后对同一块的修改直接作用在缓存上，
//! 随后的查找无需再经过设备。
//!
//! 缓存由挂载的文件系统独占，卸载时写回所有脏块后整体丢弃。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::collections::btree_map::Entry;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::Result;
use crate::layout::{decode_pointers, encode_pointers};

/// 缓存的块内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedBlock {
    /// 索引块，长度为 P
    Pointers(Vec<u32>),
    /// 数据块
    Data(Box<[u8]>),
}

#[derive(Debug)]
struct Slot {
    block: CachedBlock,
    /// 是否为脏块
    dirty: bool,
}

#[derive(Debug)]
pub struct BlockCache {
    slots: BTreeMap<u32, Slot>,
    block_size: usize,
}

impl BlockCache {
    pub fn new(block_size: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            block_size,
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 放入新内容并标记为脏
    pub fn put(&mut self, block_id: u32, block: CachedBlock) {
        self.slots.insert(block_id, Slot { block, dirty: true });
    }

    /// 块被释放后，其缓存不再有意义
    #[inline]
    pub fn evict(&mut self, block_id: u32) {
        self.slots.remove(&block_id);
    }

    /// 以索引块的视角读取，首次访问时从设备读入
    pub fn pointers(&mut self, block_id: u32, block_device: &dyn BlockDevice) -> Result<&[u32]> {
        Ok(self.load(block_id, block_device)?.as_pointers())
    }

    /// 以索引块的视角修改，块随之变脏
    pub fn pointers_mut(
        &mut self,
        block_id: u32,
        block_device: &dyn BlockDevice,
    ) -> Result<&mut [u32]> {
        let slot = self.load(block_id, block_device)?;
        slot.dirty = true;
        Ok(slot.as_pointers())
    }

    /// 以数据块的视角读取，首次访问时从设备读入
    pub fn data(&mut self, block_id: u32, block_device: &dyn BlockDevice) -> Result<&[u8]> {
        Ok(self.load(block_id, block_device)?.as_data())
    }

    /// 以数据块的视角修改，块随之变脏
    pub fn data_mut(&mut self, block_id: u32, block_device: &dyn BlockDevice) -> Result<&mut [u8]> {
        let slot = self.load(block_id, block_device)?;
        slot.dirty = true;
        Ok(slot.as_data())
    }

    /// 把所有脏块编码后写回设备，然后清空缓存。返回写回的块数。
    pub fn flush(&mut self, block_device: &dyn BlockDevice) -> Result<usize> {
        let mut written = 0;
        for (&block_id, slot) in self.slots.iter().filter(|(_, slot)| slot.dirty) {
            match &slot.block {
                CachedBlock::Pointers(pointers) => {
                    block_device.write_block_padded(block_id as usize, &encode_pointers(pointers))?
                }
                CachedBlock::Data(data) => block_device.write_block(block_id as usize, data)?,
            }
            written += 1;
        }
        log::debug!("flushed {written} of {} cached blocks", self.slots.len());
        self.slots.clear();

        Ok(written)
    }
}

impl BlockCache {
    /// 尝试从缓冲区中读取块，没有则读入一个干净的块
    fn load(&mut self, block_id: u32, block_device: &dyn BlockDevice) -> Result<&mut Slot> {
        match self.slots.entry(block_id) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(vacant) => {
                let mut data = vec![0; self.block_size];
                block_device.read_block(block_id as usize, &mut data)?;
                Ok(vacant.insert(Slot {
                    block: CachedBlock::Data(data.into_boxed_slice()),
                    dirty: false,
                }))
            }
        }
    }
}

#[cfg(test)]
impl BlockCache {
    pub fn get(&self, block_id: u32) -> Option<&CachedBlock> {
        self.slots.get(&block_id).map(|slot| &slot.block)
    }

    pub fn is_dirty(&self, block_id: u32) -> bool {
        self.slots.get(&block_id).is_some_and(|slot| slot.dirty)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Slot {
    /// 原始字节只在第一次被当作索引块时解码
    fn as_pointers(&mut self) -> &mut [u32] {
        if let CachedBlock::Data(raw) = &self.block {
            self.block = CachedBlock::Pointers(decode_pointers(raw));
        }
        match &mut self.block {
            CachedBlock::Pointers(pointers) => pointers,
            CachedBlock::Data(_) => unreachable!(),
        }
    }

    fn as_data(&mut self) -> &mut [u8] {
        if let CachedBlock::Pointers(pointers) = &self.block {
            self.block = CachedBlock::Data(encode_pointers(pointers).into_boxed_slice());
        }
        match &mut self.block {
            CachedBlock::Data(data) => data,
            CachedBlock::Pointers(_) => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use block_dev::MemDisk;

    use super::*;
    use crate::layout::encode_pointers;

    #[test]
    fn decodes_once_and_memoizes() {
        let disk = MemDisk::new(4, 16);
        disk.write_block(2, &encode_pointers(&[5, 6, 7, 8])).unwrap();

        let mut cache = BlockCache::new(16);
        assert_eq!(cache.pointers(2, &disk).unwrap(), [5, 6, 7, 8]);
        assert!(!cache.is_dirty(2));

        cache.pointers_mut(2, &disk).unwrap()[1] = 60;
        // 设备上的内容变化对缓存不可见
        disk.write_block(2, &[0; 16]).unwrap();
        assert_eq!(cache.pointers(2, &disk).unwrap(), [5, 60, 7, 8]);
        assert!(cache.is_dirty(2));
    }

    #[test]
    fn flush_writes_only_dirty_blocks() {
        let disk = MemDisk::new(4, 16);
        disk.write_block(1, &[9; 16]).unwrap();

        let mut cache = BlockCache::new(16);
        assert_eq!(cache.data(1, &disk).unwrap(), [9; 16]);
        cache.put(3, CachedBlock::Pointers(vec![1, 2, 0, 0]));
        cache.data_mut(0, &disk).unwrap()[0] = 0xAA;

        // 干净块在刷回前被改写，刷回后设备上仍是改写后的内容
        disk.write_block(1, &[1; 16]).unwrap();
        assert_eq!(cache.flush(&disk).unwrap(), 2);
        assert!(cache.is_empty());

        let mut buf = [0; 16];
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [1; 16]);
        disk.read_block(3, &mut buf).unwrap();
        assert_eq!(buf[..8], [1, 0, 0, 0, 2, 0, 0, 0]);
        disk.read_block(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAA);
    }

    #[test]
    fn put_replaces_stale_contents() {
        let disk = MemDisk::new(2, 16);
        let mut cache = BlockCache::new(16);
        cache.pointers_mut(1, &disk).unwrap()[0] = 3;
        cache.put(1, CachedBlock::Data(vec![0; 16].into_boxed_slice()));
        assert_eq!(cache.get(1), Some(&CachedBlock::Data(vec![0; 16].into_boxed_slice())));

        cache.evict(1);
        assert_eq!(cache.get(1), None);
        assert!(!cache.is_dirty(1));
    }
}
