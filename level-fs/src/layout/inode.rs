//! inode 记录
//!
//! 顶层块指针数组与`level`一起构成间接索引树：
//! - `level == 0`：K 个指针直接指向文件的前 K 个数据块
//! - `level == L`：每个顶层指针指向一棵深度为 L 的子树，覆盖 P^L 个逻辑块
//!
//! 指针为 0 表示尚未分配。

use alloc::vec::Vec;

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite, binrw};
use enumflags2::{BitFlags, bitflags};

use crate::{BLOCK_PTRS_PER_INODE, Error, INODE_MAGIC, POINTER_SIZE, Result};

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// 与其在 inode 表中的下标相同
    pub id: u16,
    pub cdate: u32,
    pub mdate: u32,
    #[br(map = |bits: u16| BitFlags::from_bits_truncate(bits))]
    #[bw(map = |perms: &BitFlags<Permission>| perms.bits())]
    pub perms: BitFlags<Permission>,
    /// 间接索引树的深度
    pub level: u8,
    pub kind: InodeKind,
    /// 内容长度（字节）
    pub length: u32,
    #[br(temp)]
    #[bw(calc = INODE_MAGIC)]
    magic: u32,
    /// 顶层块指针
    pub blocks: [u32; BLOCK_PTRS_PER_INODE],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum InodeKind {
    #[default]
    Free = 0,
    File = 1,
    Directory = 2,
    Symlink = 3,
}

#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    OtherExec = 0o001,
    OtherWrite = 0o002,
    OtherRead = 0o004,
    GroupExec = 0o010,
    GroupWrite = 0o020,
    GroupRead = 0o040,
    OwnerExec = 0o100,
    OwnerWrite = 0o200,
    OwnerRead = 0o400,
}

impl Inode {
    /// 记录头部的字节数，之后紧跟 K 个块指针
    pub const HEADER_SIZE: usize = 22;
    /// 按块指针宽度向上取整后的记录大小
    pub const RECORD_SIZE: usize =
        (Self::HEADER_SIZE + POINTER_SIZE * BLOCK_PTRS_PER_INODE).next_multiple_of(POINTER_SIZE);
    const MAGIC_OFFSET: usize = 18;

    #[inline]
    pub fn new(id: u16) -> Self {
        Self {
            id,
            cdate: 0,
            mdate: 0,
            perms: BitFlags::empty(),
            level: 0,
            kind: InodeKind::Free,
            length: 0,
            blocks: [0; BLOCK_PTRS_PER_INODE],
        }
    }

    /// 重新初始化为一个空的`kind`对象
    pub fn reset(&mut self, kind: InodeKind, now: u32) {
        *self = Self {
            cdate: now,
            mdate: now,
            perms: kind.default_perms(),
            kind,
            ..Self::new(self.id)
        };
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == InodeKind::File
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// 解出一条记录，魔数不符即视为结构损坏
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::RECORD_SIZE {
            return Err(Error::Corrupted("inode record is truncated"));
        }
        let magic = u32::from_le_bytes([
            raw[Self::MAGIC_OFFSET],
            raw[Self::MAGIC_OFFSET + 1],
            raw[Self::MAGIC_OFFSET + 2],
            raw[Self::MAGIC_OFFSET + 3],
        ]);
        if magic != INODE_MAGIC {
            return Err(Error::BadInodeMagic {
                inode: u16::from_le_bytes([raw[0], raw[1]]),
                found: magic,
            });
        }

        Self::read_le(&mut Cursor::new(&raw[..Self::RECORD_SIZE]))
            .map_err(|_| Error::Corrupted("inode record"))
    }

    /// 写入`raw`的开头，记录尾部的填充字节置 0
    pub fn encode_into(&self, raw: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::RECORD_SIZE));
        self.write_le(&mut cursor)
            .map_err(|_| Error::Corrupted("inode record"))?;
        let bytes = cursor.into_inner();

        let record = &mut raw[..Self::RECORD_SIZE];
        record.fill(0);
        record[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }
}

impl InodeKind {
    /// `_ f d s`
    pub fn as_char(self) -> char {
        match self {
            InodeKind::Free => '_',
            InodeKind::File => 'f',
            InodeKind::Directory => 'd',
            InodeKind::Symlink => 's',
        }
    }

    pub fn default_perms(self) -> BitFlags<Permission> {
        match self {
            InodeKind::Free => BitFlags::empty(),
            InodeKind::File | InodeKind::Symlink => BitFlags::from_bits_truncate(0o644),
            InodeKind::Directory => BitFlags::from_bits_truncate(0o755),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_size() {
        assert_eq!(128, Inode::RECORD_SIZE);
    }

    #[test]
    fn record_layout() {
        let mut inode = Inode::new(7);
        inode.reset(InodeKind::Directory, 42);
        inode.length = 300;
        inode.level = 2;
        inode.blocks[0] = 99;
        inode.blocks[25] = 0xAABB_CCDD;

        let mut raw = [0xffu8; Inode::RECORD_SIZE];
        inode.encode_into(&mut raw).unwrap();
        assert_eq!(raw[..2], 7u16.to_le_bytes());
        assert_eq!(raw[2..6], 42u32.to_le_bytes());
        assert_eq!(raw[10..12], 0o755u16.to_le_bytes());
        assert_eq!(raw[12], 2);
        assert_eq!(raw[13], InodeKind::Directory as u8);
        assert_eq!(raw[14..18], 300u32.to_le_bytes());
        assert_eq!(raw[18..22], INODE_MAGIC.to_le_bytes());
        assert_eq!(raw[22..26], 99u32.to_le_bytes());
        assert_eq!(raw[122..126], 0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(raw[126..], [0, 0]);

        assert_eq!(Inode::decode(&raw).unwrap(), inode);
    }

    #[test]
    fn bad_inode_magic() {
        let mut raw = [0u8; Inode::RECORD_SIZE];
        Inode::new(3).encode_into(&mut raw).unwrap();
        raw[20] = 0;
        assert!(matches!(
            Inode::decode(&raw),
            Err(Error::BadInodeMagic { inode: 3, .. })
        ));
    }

    #[test]
    fn unknown_kind_tag() {
        let mut raw = [0u8; Inode::RECORD_SIZE];
        Inode::new(1).encode_into(&mut raw).unwrap();
        raw[13] = 9;
        assert_eq!(Inode::decode(&raw), Err(Error::Corrupted("inode record")));
    }
}
