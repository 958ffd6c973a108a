//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，块大小与块数在创建时确定。
//! [`BlockDevice`] 就是对读写块设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 0 号块永远留给文件系统的主记录。

#![no_std]

extern crate alloc;

mod mem_disk;

pub use mem_disk::MemDisk;

use alloc::vec;
use derive_more::Display;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "block {} is out of range", _0)]
    OutOfRange(usize),
    #[display(fmt = "buffer of {} bytes for a {}-byte block", len, expected)]
    BadBuffer { len: usize, expected: usize },
    /// 宿主端的 I/O 失败，细节在出错处记录日志
    #[display(fmt = "device I/O failure")]
    Io,
    #[display(fmt = "device is closed")]
    Closed,
}

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync {
    /// 每块的字节数
    fn block_size(&self) -> usize;

    /// 设备的总块数
    fn block_count(&self) -> usize;

    /// 以一整块的内容填满`buf`
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()>;

    /// `buf`必须恰好是一整块
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()>;

    /// 写入不足一块的数据，尾部以 0 补齐
    fn write_block_padded(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        let block_size = self.block_size();
        if buf.len() > block_size {
            return Err(Error::BadBuffer {
                len: buf.len(),
                expected: block_size,
            });
        }
        if buf.len() == block_size {
            return self.write_block(block_id, buf);
        }

        let mut block = vec![0; block_size];
        block[..buf.len()].copy_from_slice(buf);
        self.write_block(block_id, &block)
    }

    /// 释放底层资源，此后的读写均返回 [`Error::Closed`]
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// 检查块号与缓冲区长度
    fn check_access(&self, block_id: usize, len: usize) -> Result<()> {
        if block_id >= self.block_count() {
            log::error!("access to block {block_id} beyond {}", self.block_count());
            return Err(Error::OutOfRange(block_id));
        }
        if len != self.block_size() {
            return Err(Error::BadBuffer {
                len,
                expected: self.block_size(),
            });
        }

        Ok(())
    }
}
