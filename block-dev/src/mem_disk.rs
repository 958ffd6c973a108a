use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::{BlockDevice, Error, Result};

/// 位于内存中的块设备，用于测试与临时卷
#[derive(Debug)]
pub struct MemDisk {
    block_size: usize,
    block_count: usize,
    data: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl MemDisk {
    pub fn new(block_count: usize, block_size: usize) -> Self {
        Self {
            block_size,
            block_count,
            data: Mutex::new(vec![0; block_count * block_size]),
            closed: AtomicBool::new(false),
        }
    }

    /// 整个设备内容的拷贝
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 重新打开已关闭的设备，内容保持不变
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn range(&self, block_id: usize) -> core::ops::Range<usize> {
        let start = block_id * self.block_size;
        start..start + self.block_size
    }
}

impl BlockDevice for MemDisk {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.check_access(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[self.range(block_id)]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.check_access(block_id, buf.len())?;
        self.data.lock()[self.range(block_id)].copy_from_slice(buf);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
