//! # 间接索引树
//!
//! inode 的顶层指针数组加上`level`，递归地解释为一棵索引树：
//! - 深度为 L 时，顶层的 K 个指针各指向一棵覆盖 P^L 个逻辑块的子树
//! - 索引块整块连续存储 P 个**块编号**，不带头部
//! - 总容量为 K·P^L 个逻辑块
//!
//! ## 块索引编码
//!
//! - 逻辑块号除以子树宽度 P^l，可得该层的槽位
//! - 逻辑块号模子树宽度 P^l，可得在子树内的逻辑块号
//!
//! ## 增长
//!
//! 写入超出容量时，分配一个新块，把整个顶层数组原样拷进去，
//! 再让顶层只剩 0 号槽位指向它，`level`加一。原有的块都还在原来的逻辑位置上。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;

use block_dev::BlockDevice;

use crate::block_cache::{BlockCache, CachedBlock};
use crate::layout::{BlockMap, Inode};
use crate::{BLOCK_PTRS_PER_INODE, Error, Result};

/// 某个 inode 的索引树在一次操作中所需的全部可变状态
pub struct IndirectTree<'a> {
    block_map: &'a mut BlockMap,
    cache: &'a mut BlockCache,
    block_device: &'a dyn BlockDevice,
    /// 每个索引块的指针数，即 P
    ptrs_per_block: usize,
}

/// 预演写入路径时的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    /// inode 自身的顶层数组
    Top,
    /// 第 n 次增长分配的块
    Grown(u8),
    /// 已存在的块
    Block(u32),
    /// 尚未分配
    Missing,
}

impl Node {
    #[inline]
    fn at(block_id: u32) -> Self {
        if block_id == 0 {
            Self::Missing
        } else {
            Self::Block(block_id)
        }
    }
}

impl<'a> IndirectTree<'a> {
    pub fn new(
        block_map: &'a mut BlockMap,
        cache: &'a mut BlockCache,
        block_device: &'a dyn BlockDevice,
        ptrs_per_block: usize,
    ) -> Self {
        debug_assert!(ptrs_per_block >= BLOCK_PTRS_PER_INODE);
        Self {
            block_map,
            cache,
            block_device,
            ptrs_per_block,
        }
    }

    /// 深度为`level`的子树覆盖的逻辑块数 P^level
    #[inline]
    pub fn width(&self, level: u8) -> u64 {
        (self.ptrs_per_block as u64).saturating_pow(level as u32)
    }

    /// 深度为`level`时可编号的逻辑块数 K·P^level
    #[inline]
    pub fn capacity(&self, level: u8) -> u64 {
        (BLOCK_PTRS_PER_INODE as u64).saturating_mul(self.width(level))
    }

    /// 逻辑块号到物理块号。
    ///
    /// `alloc`为假时绝不修改任何东西，超出容量或路径上有未分配的指针都返回`None`；
    /// 为真时按需增长并分配整条路径，所需块不足则在修改前返回 [`Error::NoSpace`]。
    pub fn resolve(&mut self, inode: &mut Inode, block_index: u32, alloc: bool) -> Result<Option<u32>> {
        if alloc {
            self.resolve_alloc(inode, block_index).map(Some)
        } else {
            self.lookup(inode, block_index)
        }
    }

    pub fn lookup(&mut self, inode: &Inode, block_index: u32) -> Result<Option<u32>> {
        let mut index = block_index as u64;
        if index >= self.capacity(inode.level) {
            return Ok(None);
        }

        let mut level = inode.level;
        let width = self.width(level);
        let mut block_id = inode.blocks[(index / width) as usize];
        index %= width;

        while level > 0 {
            if block_id == 0 {
                return Ok(None);
            }
            level -= 1;
            let width = self.width(level);
            block_id = self.cache.pointers(block_id, self.block_device)?[(index / width) as usize];
            index %= width;
        }

        Ok((block_id != 0).then_some(block_id))
    }

    fn resolve_alloc(&mut self, inode: &mut Inode, block_index: u32) -> Result<u32> {
        let needed = self.blocks_needed(inode, block_index)?;
        if needed > self.block_map.free_count() {
            log::warn!(
                "inode {} needs {needed} blocks for block {block_index}, only {} free",
                inode.id,
                self.block_map.free_count()
            );
            return Err(Error::NoSpace);
        }

        while block_index as u64 >= self.capacity(inode.level) {
            self.grow(inode)?;
        }

        let mut index = block_index as u64;
        let mut level = inode.level;
        let width = self.width(level);
        let slot = (index / width) as usize;
        index %= width;

        let mut block_id = inode.blocks[slot];
        if block_id == 0 {
            block_id = self.alloc_node(level)?;
            inode.blocks[slot] = block_id;
        }

        while level > 0 {
            level -= 1;
            let width = self.width(level);
            let slot = (index / width) as usize;
            index %= width;

            let parent = block_id;
            block_id = self.cache.pointers(parent, self.block_device)?[slot];
            if block_id == 0 {
                block_id = self.alloc_node(level)?;
                self.cache.pointers_mut(parent, self.block_device)?[slot] = block_id;
            }
        }

        Ok(block_id)
    }

    /// 加深一层：旧的顶层数组整体下沉到新块中
    fn grow(&mut self, inode: &mut Inode) -> Result<()> {
        let block_id = self.block_map.alloc().ok_or(Error::NoSpace)?;

        let mut pointers = vec![0; self.ptrs_per_block];
        pointers[..BLOCK_PTRS_PER_INODE].copy_from_slice(&inode.blocks);
        self.cache.put(block_id, CachedBlock::Pointers(pointers));

        inode.blocks = [0; BLOCK_PTRS_PER_INODE];
        inode.blocks[0] = block_id;
        inode.level += 1;

        log::debug!(
            "inode {} grew to level {} through block {block_id}",
            inode.id,
            inode.level
        );
        Ok(())
    }

    /// 新分配的块一律以全 0 内容进入缓存，不读设备
    fn alloc_node(&mut self, level: u8) -> Result<u32> {
        let block_id = self.block_map.alloc().ok_or(Error::NoSpace)?;
        let block = if level > 0 {
            CachedBlock::Pointers(vec![0; self.ptrs_per_block])
        } else {
            CachedBlock::Data(vec![0; self.cache.block_size()].into_boxed_slice())
        };
        self.cache.put(block_id, block);

        Ok(block_id)
    }

    /// 预演一次写入：需要增长的层数加上路径上缺失的块数
    fn blocks_needed(&mut self, inode: &Inode, block_index: u32) -> Result<usize> {
        let index = block_index as u64;
        let mut level = inode.level;
        let mut grown = 0u8;
        while index >= self.capacity(level) {
            level += 1;
            grown += 1;
        }

        let mut needed = grown as usize;
        let mut index = index;
        let mut node = Node::Top;
        loop {
            let width = self.width(level);
            let slot = (index / width) as usize;
            index %= width;

            let child = match node {
                Node::Top if grown > 0 => {
                    if slot == 0 { Node::Grown(grown) } else { Node::Missing }
                }
                Node::Top => Node::at(inode.blocks[slot]),
                // 第一次增长的块装着原先的顶层数组
                Node::Grown(1) => Node::at(inode.blocks.get(slot).copied().unwrap_or(0)),
                Node::Grown(n) => {
                    if slot == 0 { Node::Grown(n - 1) } else { Node::Missing }
                }
                Node::Block(block_id) => {
                    Node::at(self.cache.pointers(block_id, self.block_device)?[slot])
                }
                Node::Missing => Node::Missing,
            };
            if child == Node::Missing {
                needed += 1;
            }

            if level == 0 {
                break;
            }
            level -= 1;
            node = child;
        }

        Ok(needed)
    }

    /// 依次访问树中所有已分配的块：(深度, 块号, 是否为数据块)
    pub fn for_each_block(
        &mut self,
        inode: &Inode,
        f: &mut impl FnMut(u8, u32, bool),
    ) -> Result<()> {
        for &block_id in inode.blocks.iter().filter(|&&block_id| block_id != 0) {
            self.visit(block_id, inode.level, 0, f)?;
        }

        Ok(())
    }

    fn visit(
        &mut self,
        block_id: u32,
        level: u8,
        depth: u8,
        f: &mut impl FnMut(u8, u32, bool),
    ) -> Result<()> {
        f(depth, block_id, level == 0);
        if level == 0 {
            return Ok(());
        }

        let children: Vec<u32> = self
            .cache
            .pointers(block_id, self.block_device)?
            .iter()
            .copied()
            .filter(|&child| child != 0)
            .collect();
        for child in children {
            self.visit(child, level - 1, depth + 1, f)?;
        }

        Ok(())
    }

    /// 释放逻辑块号不小于`keep`的所有块，返回释放的块数。
    /// 整棵子树都落在`keep`之后的索引块连同指向它的指针一起清除，`level`不变。
    pub fn release_from(&mut self, inode: &mut Inode, keep: u64) -> Result<usize> {
        let width = self.width(inode.level);
        let mut freed = 0;
        for slot in 0..BLOCK_PTRS_PER_INODE {
            let block_id = inode.blocks[slot];
            let start = slot as u64 * width;
            if block_id == 0 || start + width <= keep {
                continue;
            }
            freed += self.release(block_id, inode.level, keep.saturating_sub(start))?;
            if start >= keep {
                inode.blocks[slot] = 0;
            }
        }

        if freed > 0 {
            log::debug!("inode {} released {freed} blocks from block {keep}", inode.id);
        }
        Ok(freed)
    }

    /// `keep`为子树内的逻辑块号，为 0 时整棵子树连同`block_id`自身一起释放
    fn release(&mut self, block_id: u32, level: u8, keep: u64) -> Result<usize> {
        let mut freed = 0;
        if level > 0 {
            let width = self.width(level - 1);
            let children = self.cache.pointers(block_id, self.block_device)?.to_vec();
            for (slot, child) in children.into_iter().enumerate() {
                let start = slot as u64 * width;
                if child == 0 || start + width <= keep {
                    continue;
                }
                freed += self.release(child, level - 1, keep.saturating_sub(start))?;
                if keep > 0 && start >= keep {
                    self.cache.pointers_mut(block_id, self.block_device)?[slot] = 0;
                }
            }
        }

        if keep == 0 {
            self.cache.evict(block_id);
            self.block_map.free(block_id)?;
            freed += 1;
        }
        Ok(freed)
    }

    /// 缩进形式的树，用于调试
    pub fn dump(&mut self, inode: &Inode) -> Result<String> {
        let mut out = String::new();
        self.for_each_block(inode, &mut |depth, block_id, is_data| {
            let kind = if is_data { "data" } else { "ptrs" };
            let _ = writeln!(out, "{:indent$}{block_id} ({kind})", "", indent = depth as usize * 2);
        })?;

        Ok(out)
    }
}
