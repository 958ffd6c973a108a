//! # 磁盘块管理器层
//!
//! 负责文件系统的创建、挂载与卸载，并持有挂载期间的全部内存状态：
//! 主记录、块位图、inode 表、块缓存与目录缓存。
//!
//! 卷的布局在创建时确定，之后全部从主记录中读回：
//!
//! ```text
//! | 主记录 | 块位图 | inode 表 | 数据块与索引块 |
//!   0       1
//! ```

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;

use block_dev::BlockDevice;

use crate::block_cache::BlockCache;
use crate::dir::Directory;
use crate::layout::{BlockMap, Inode, InodeKind, InodeMap, MasterRecord};
use crate::tree::IndirectTree;
use crate::{BLOCK_PTRS_PER_INODE, Error, POINTER_SIZE, Result};

/// 创建文件系统时可选的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub block_count: u32,
    /// 必须是 inode 记录大小的整数倍
    pub block_size: u16,
    pub inode_count: u16,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_count: 200,
            block_size: 1024,
            inode_count: 1024,
        }
    }
}

impl FormatOptions {
    /// 块大小的上限，主记录中该字段只有 16 位
    pub const MAX_BLOCK_SIZE: u16 = 32768;

    /// 块位图、inode 表以及主记录共占据的块数
    pub fn metadata_blocks(&self) -> usize {
        let block_size = self.block_size as usize;
        1 + BlockMap::blocks_for(self.block_count as usize, block_size)
            + InodeMap::blocks_for(self.inode_count as usize, block_size)
    }

    fn validate(&self, block_device: &dyn BlockDevice) -> Result<()> {
        let block_size = self.block_size as usize;
        if block_size == 0 || block_size % Inode::RECORD_SIZE != 0 {
            return Err(Error::BadGeometry(
                "block size must be a multiple of the inode record size",
            ));
        }
        if self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(Error::BadGeometry("block size is too large"));
        }
        // 增长时整个顶层数组要能放进一个索引块
        if block_size / POINTER_SIZE < BLOCK_PTRS_PER_INODE {
            return Err(Error::BadGeometry("pointer block can't hold the top-level array"));
        }
        if block_size != block_device.block_size() {
            return Err(Error::BadGeometry("block size doesn't match the device"));
        }
        if self.block_count as usize > block_device.block_count() {
            return Err(Error::BadGeometry("device is smaller than the block count"));
        }
        if self.inode_count == 0 {
            return Err(Error::BadGeometry("at least the root inode is needed"));
        }
        if self.metadata_blocks() >= self.block_count as usize {
            return Err(Error::BadGeometry("no room left for data blocks"));
        }

        Ok(())
    }
}

/// 一个挂载中的文件系统，独占其块设备
pub struct FileSystem {
    pub(crate) block_device: Arc<dyn BlockDevice>,
    pub(crate) master: MasterRecord,
    pub(crate) block_map: BlockMap,
    pub(crate) inode_map: InodeMap,
    pub(crate) cache: BlockCache,
    /// 已读入的目录
    pub(crate) dirs: BTreeMap<u16, Directory>,
    clock: fn() -> u32,
}

impl FileSystem {
    /// 在块设备上创建一个空的文件系统，只含根目录。
    /// 创建后主记录标记为已干净卸载，随后可直接挂载。
    pub fn format(block_device: Arc<dyn BlockDevice>, options: &FormatOptions) -> Result<()> {
        options.validate(&*block_device)?;

        let block_size = options.block_size as usize;
        let block_map_loc = 1;
        let inode_map_loc =
            block_map_loc + BlockMap::blocks_for(options.block_count as usize, block_size);

        let mut block_map = BlockMap::new(options.block_count as usize);
        block_map.reserve(options.metadata_blocks());

        let mut inode_map = InodeMap::new(options.inode_count);
        let root_inode = inode_map.alloc(InodeKind::Directory).ok_or(Error::NoInode)?;
        inode_map.get_mut(root_inode)?.reset(InodeKind::Directory, 0);

        block_map.store(&*block_device, block_map_loc)?;
        inode_map.store(&*block_device, inode_map_loc)?;

        let master = MasterRecord::new(
            options.block_count,
            options.block_size,
            options.inode_count,
            block_map_loc as u32,
            inode_map_loc as u32,
            root_inode as u32,
        );
        block_device.write_block_padded(0, &master.encode()?)?;

        log::info!(
            "formatted {} blocks of {block_size} bytes, {} inodes, data from block {}",
            options.block_count,
            options.inode_count,
            options.metadata_blocks()
        );
        Ok(())
    }

    /// 读入主记录与两张分配表，并把主记录标记为脏
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut buf = vec![0; block_device.block_size()];
        block_device.read_block(0, &mut buf)?;
        let mut master = MasterRecord::decode(&buf)?;

        if master.block_size as usize != block_device.block_size() {
            return Err(Error::BadGeometry("block size doesn't match the device"));
        }
        if master.block_count as usize > block_device.block_count() {
            return Err(Error::BadGeometry("device is smaller than the block count"));
        }
        if master.root_inode >= master.inode_count as u32 {
            return Err(Error::Corrupted("root inode beyond the inode map"));
        }
        if !master.is_clean() {
            log::warn!("file system was not cleanly unmounted");
        }

        let block_map = BlockMap::load(
            &*block_device,
            master.block_map_loc as usize,
            master.block_count as usize,
        )?;
        let inode_map = InodeMap::load(
            &*block_device,
            master.inode_map_loc as usize,
            master.inode_count,
        )?;

        master.dirty = 1;
        block_device.write_block_padded(0, &master.encode()?)?;

        log::info!(
            "mounted: {} of {} blocks free, {} of {} inodes free",
            block_map.free_count(),
            master.block_count,
            inode_map.free_count(),
            master.inode_count
        );
        Ok(Self {
            cache: BlockCache::new(master.block_size as usize),
            block_device,
            master,
            block_map,
            inode_map,
            dirs: BTreeMap::new(),
            clock: || 0,
        })
    }

    /// 写回目录、脏块与两张分配表，再清除脏标记并关闭设备。
    ///
    /// 有目录写回失败时其余内容照常写回，但主记录保持为脏。
    pub fn unmount(mut self) -> Result<()> {
        let dirs = self.flush_dirs();
        let blocks = self.cache.flush(&*self.block_device)?;
        self.block_map
            .store(&*self.block_device, self.master.block_map_loc as usize)?;
        self.inode_map
            .store(&*self.block_device, self.master.inode_map_loc as usize)?;

        let dirs = match dirs {
            Ok(dirs) => dirs,
            Err(err) => {
                log::error!("unmounted with stale directories, volume left dirty");
                self.block_device.close()?;
                return Err(err);
            }
        };

        self.master.dirty = 0;
        self.block_device
            .write_block_padded(0, &self.master.encode()?)?;
        self.block_device.close()?;

        log::info!("unmounted: {dirs} directories and {blocks} blocks written back");
        Ok(())
    }
}

impl FileSystem {
    #[inline]
    pub fn master(&self) -> &MasterRecord {
        &self.master
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.master.block_size as usize
    }

    #[inline]
    pub fn root_inode(&self) -> u16 {
        self.master.root_inode as u16
    }

    #[inline]
    pub fn block_map(&self) -> &BlockMap {
        &self.block_map
    }

    #[inline]
    pub fn inode_map(&self) -> &InodeMap {
        &self.inode_map
    }

    pub fn inode(&self, id: u16) -> Result<&Inode> {
        self.inode_map.get(id)
    }

    /// 设置时间戳的来源，默认恒为 0
    pub fn set_clock(&mut self, clock: fn() -> u32) {
        self.clock = clock;
    }

    #[inline]
    pub(crate) fn now(&self) -> u32 {
        (self.clock)()
    }

    /// 第一个可分配给文件的块
    #[inline]
    fn data_start(&self) -> usize {
        FormatOptions {
            block_count: self.master.block_count,
            block_size: self.master.block_size,
            inode_count: self.master.inode_count,
        }
        .metadata_blocks()
    }
}

/* 分配器 */
impl FileSystem {
    pub fn allocate_block(&mut self) -> Result<u32> {
        self.block_map.alloc().ok_or(Error::NoSpace)
    }

    /// 元数据区的块永不释放；重复释放只是警告
    pub fn free_block(&mut self, block_id: u32) -> Result<()> {
        if (block_id as usize) < self.data_start() {
            return Err(Error::Corrupted("metadata blocks are never freed"));
        }
        self.block_map.free(block_id)?;
        self.cache.evict(block_id);
        Ok(())
    }

    /// 只设置类型，块指针与长度由调用者重新初始化
    pub fn allocate_inode(&mut self, kind: InodeKind) -> Result<u16> {
        self.inode_map.alloc(kind).ok_or(Error::NoInode)
    }

    pub fn free_inode(&mut self, id: u16) -> Result<()> {
        if id == self.root_inode() {
            return Err(Error::Corrupted("the root directory is never freed"));
        }
        self.inode_map.free(id)?;
        self.dirs.remove(&id);
        Ok(())
    }

    #[inline]
    pub fn free_blocks(&self) -> usize {
        self.block_map.free_count()
    }

    #[inline]
    pub fn free_inodes(&self) -> usize {
        self.inode_map.free_count()
    }

    pub fn block_map_string(&self) -> String {
        self.block_map.to_string()
    }

    pub fn inode_map_string(&self) -> String {
        self.inode_map.to_string()
    }

    /// 分配一个 inode 并重新初始化为空对象
    pub(crate) fn new_inode(&mut self, kind: InodeKind) -> Result<u16> {
        let now = self.now();
        let id = self.allocate_inode(kind)?;
        self.inode_map.get_mut(id)?.reset(kind, now);
        Ok(id)
    }
}

/* 间接索引树 */
impl FileSystem {
    /// 逻辑块号到物理块号，见 [`IndirectTree::resolve`]
    pub fn resolve(&mut self, inode: u16, block_index: u32, alloc: bool) -> Result<Option<u32>> {
        let (mut tree, inodes) = self.tree();
        tree.resolve(inodes.get_mut(inode)?, block_index, alloc)
    }

    /// inode 的索引树中所有已分配的块，缩进表示深度
    pub fn block_tree(&mut self, inode: u16) -> Result<String> {
        let (mut tree, inodes) = self.tree();
        tree.dump(inodes.get(inode)?)
    }

    /// 数据块与索引块的总数
    pub(crate) fn allocated_blocks(&mut self, inode: u16) -> Result<usize> {
        let (mut tree, inodes) = self.tree();
        let mut count = 0;
        tree.for_each_block(inodes.get(inode)?, &mut |_, _, _| count += 1)?;
        Ok(count)
    }

    pub(crate) fn tree(&mut self) -> (IndirectTree<'_>, &mut InodeMap) {
        let ptrs_per_block = self.master.ptrs_per_block();
        (
            IndirectTree::new(
                &mut self.block_map,
                &mut self.cache,
                &*self.block_device,
                ptrs_per_block,
            ),
            &mut self.inode_map,
        )
    }
}

#[cfg(test)]
mod tests {
    use block_dev::MemDisk;

    use super::*;

    fn small() -> FormatOptions {
        FormatOptions {
            block_count: 64,
            block_size: 256,
            inode_count: 16,
        }
    }

    fn master_of(disk: &MemDisk) -> MasterRecord {
        MasterRecord::decode(&disk.snapshot()).unwrap()
    }

    #[test]
    fn format_lays_out_metadata() {
        let disk = Arc::new(MemDisk::new(64, 256));
        FileSystem::format(disk.clone(), &small()).unwrap();

        let master = master_of(&disk);
        assert_eq!(master.block_map_loc, 1);
        assert_eq!(master.inode_map_loc, 2);
        assert_eq!(master.root_inode, 0);
        assert!(master.is_clean());

        let fs = FileSystem::mount(disk.clone()).unwrap();
        // 主记录、1 块位图、8 块 inode 表
        assert_eq!(small().metadata_blocks(), 10);
        assert!((0..10).all(|block_id| fs.block_map().is_allocated(block_id)));
        assert!(!fs.block_map().is_allocated(10));
        assert!(fs.inode(0).unwrap().is_dir());
        assert_eq!(fs.free_inodes(), 15);
    }

    #[test]
    fn dirty_flag_lifecycle() {
        let disk = Arc::new(MemDisk::new(64, 256));
        FileSystem::format(disk.clone(), &small()).unwrap();

        let fs = FileSystem::mount(disk.clone()).unwrap();
        assert_eq!(master_of(&disk).dirty, 1);
        fs.unmount().unwrap();
        assert_eq!(master_of(&disk).dirty, 0);
        assert!(disk.is_closed());

        disk.reopen();
        let fs = FileSystem::mount(disk.clone()).unwrap();
        assert_eq!(master_of(&disk).dirty, 1);
        // 未卸载即重新挂载只会告警
        drop(fs);
        let fs = FileSystem::mount(disk.clone()).unwrap();
        fs.unmount().unwrap();
        assert_eq!(master_of(&disk).dirty, 0);
    }

    #[test]
    fn rejects_bad_geometry() {
        let disk: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(64, 256));
        let cases = [
            FormatOptions { block_size: 200, ..small() },
            FormatOptions { block_size: 512, ..small() },
            FormatOptions { block_count: 65, ..small() },
            FormatOptions { inode_count: 0, ..small() },
            FormatOptions { block_count: 10, ..small() },
        ];
        for options in cases {
            assert!(matches!(
                FileSystem::format(disk.clone(), &options),
                Err(Error::BadGeometry(_))
            ));
        }
    }

    #[test]
    fn mount_rejects_foreign_volume() {
        let disk = Arc::new(MemDisk::new(8, 128));
        assert!(matches!(
            FileSystem::mount(disk),
            Err(Error::BadMagic(0))
        ));
    }

    #[test]
    fn allocators_are_exclusive() {
        let disk = Arc::new(MemDisk::new(64, 256));
        FileSystem::format(disk.clone(), &small()).unwrap();
        let mut fs = FileSystem::mount(disk).unwrap();

        let a = fs.allocate_block().unwrap();
        let b = fs.allocate_block().unwrap();
        assert_eq!((a, b), (10, 11));
        fs.free_block(a).unwrap();
        assert_eq!(fs.allocate_block().unwrap(), a);
        assert!(fs.free_block(3).is_err());

        while fs.allocate_block().is_ok() {}
        assert_eq!(fs.free_blocks(), 0);
        assert_eq!(fs.allocate_block(), Err(Error::NoSpace));

        let i = fs.allocate_inode(InodeKind::File).unwrap();
        assert_eq!(i, 1);
        fs.free_inode(i).unwrap();
        assert_eq!(fs.allocate_inode(InodeKind::Directory).unwrap(), i);
        assert!(fs.free_inode(0).is_err());
        while fs.allocate_inode(InodeKind::File).is_ok() {}
        assert_eq!(fs.allocate_inode(InodeKind::File), Err(Error::NoInode));
    }

    #[test]
    fn free_block_evicts_cached_contents() {
        let disk = Arc::new(MemDisk::new(64, 256));
        FileSystem::format(disk.clone(), &small()).unwrap();
        let mut fs = FileSystem::mount(disk).unwrap();

        let ino = fs.new_inode(InodeKind::File).unwrap();
        let block_id = fs.resolve(ino, 0, true).unwrap().unwrap();
        assert!(fs.cache.is_dirty(block_id));
        fs.free_block(block_id).unwrap();
        assert!(fs.cache.get(block_id).is_none());
    }
}
