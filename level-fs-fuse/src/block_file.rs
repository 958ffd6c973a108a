use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use block_dev::{BlockDevice, Error, Result};

/// 以宿主机上的普通文件作为块设备，文件长度恰为块数乘以块大小
#[derive(Debug)]
pub struct BlockFile {
    /// 关闭后为空
    file: Mutex<Option<File>>,
    block_size: usize,
    block_count: usize,
}

impl BlockFile {
    /// 创建或截断镜像文件
    pub fn create(path: &Path, block_count: usize, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .and_then(|fd| {
                fd.set_len((block_count * block_size) as u64)?;
                Ok(fd)
            })
            .map_err(|err| host_error("creating", path, err))?;

        Ok(Self::new(file, block_count, block_size))
    }

    /// 块数由文件长度推出
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| host_error("opening", path, err))?;
        let len = file
            .metadata()
            .map_err(|err| host_error("inspecting", path, err))?
            .len() as usize;

        Ok(Self::new(file, len / block_size, block_size))
    }

    fn new(file: File, block_count: usize, block_size: usize) -> Self {
        Self {
            file: Mutex::new(Some(file)),
            block_size,
            block_count,
        }
    }

    fn with_file<T>(
        &self,
        block_id: usize,
        f: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> Result<T> {
        let mut file = self.file.lock().map_err(|_| Error::Io)?;
        let file = file.as_mut().ok_or(Error::Closed)?;
        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))
            .and_then(|_| f(file))
            .map_err(|err| {
                log::error!("block {block_id}: {err}");
                Error::Io
            })
    }
}

impl BlockDevice for BlockFile {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()> {
        self.check_access(block_id, buf.len())?;
        self.with_file(block_id, |file| file.read_exact(buf))
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()> {
        self.check_access(block_id, buf.len())?;
        self.with_file(block_id, |file| file.write_all(buf))
    }

    fn close(&self) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| Error::Io)?;
        match file.take() {
            Some(file) => file.sync_all().map_err(|err| {
                log::error!("closing image: {err}");
                Error::Io
            }),
            None => Ok(()),
        }
    }
}

fn host_error(action: &str, path: &Path, err: io::Error) -> Error {
    log::error!("{action} {}: {err}", path.display());
    Error::Io
}
