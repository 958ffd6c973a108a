#![no_std]

extern crate alloc;

/* level-fs 的整体架构，自上而下 */

// 索引节点层：路径解析、文件打开与目录操作
mod vfs;

// 目录层：目录内容的编解码与目录缓存
mod dir;

// 字节流层：把任意字节区间拆成块级操作
mod stream;

// 间接索引树：逻辑块号到物理块号的解析
mod tree;

// 磁盘块管理器层：挂载、卸载与分配
mod fs;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 块缓存层：内存上的索引块与数据块缓存
mod block_cache;

mod error;

pub use self::{
    error::{Error, Result},
    fs::{FileSystem, FormatOptions},
    layout::{Inode, InodeKind, MasterRecord, Permission},
    vfs::{DirEntry, File, OpenMode, Stat, Whence},
};

/// 主记录魔数
pub const MAGIC: u32 = 0xF00D_CAFE;
/// inode 记录魔数
pub const INODE_MAGIC: u32 = 0xD0D0_F00D;
/// inode 内顶层块指针的个数，即 K
pub const BLOCK_PTRS_PER_INODE: usize = 26;
/// 块指针的宽度
pub const POINTER_SIZE: usize = 4;
