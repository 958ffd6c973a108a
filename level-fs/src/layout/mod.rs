//! # 磁盘数据结构层
//!
//! level-fs 的磁盘布局：
//! 主记录 | 块位图 | inode 表 | 数据块与索引块
//!
//! 所有整数均为小端序。

mod master;
pub use master::MasterRecord;

mod block_map;
pub use block_map::BlockMap;

mod inode;
pub use inode::{Inode, InodeKind, Permission};

mod inode_map;
pub use inode_map::InodeMap;

use alloc::vec::Vec;

use crate::POINTER_SIZE;

/// 把整块字节解释为块指针数组
pub(crate) fn decode_pointers(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(POINTER_SIZE)
        .map(|ptr| u32::from_le_bytes([ptr[0], ptr[1], ptr[2], ptr[3]]))
        .collect()
}

/// 块指针数组的磁盘形式，不带任何头部
pub(crate) fn encode_pointers(pointers: &[u32]) -> Vec<u8> {
    pointers.iter().flat_map(|ptr| ptr.to_le_bytes()).collect()
}
