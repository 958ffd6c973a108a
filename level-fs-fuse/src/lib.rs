//! 宿主机一侧：以镜像文件承载 level-fs，并提供按文件名创建与挂载的入口。

mod block_file;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use level_fs::{FileSystem, FormatOptions, MasterRecord, Result};

pub use self::block_file::BlockFile;

/// 创建镜像文件并在其上建立空的文件系统
pub fn create(filename: impl AsRef<Path>, options: &FormatOptions) -> Result<()> {
    let block_file = BlockFile::create(
        filename.as_ref(),
        options.block_count as usize,
        options.block_size as usize,
    )?;
    FileSystem::format(Arc::new(block_file), options)
}

/// 先读出主记录得知块大小，再以该块大小打开镜像并挂载。时间戳取宿主机时间。
pub fn mount(filename: impl AsRef<Path>) -> Result<FileSystem> {
    let path = filename.as_ref();
    let mut head = [0; MasterRecord::SIZE];
    File::open(path)
        .and_then(|mut fd| fd.read_exact(&mut head))
        .map_err(|err| {
            log::error!("reading master record of {}: {err}", path.display());
            block_dev::Error::Io
        })?;
    let master = MasterRecord::decode(&head)?;

    let block_file = BlockFile::open(path, master.block_size as usize)?;
    let mut fs = FileSystem::mount(Arc::new(block_file))?;
    fs.set_clock(unix_time);
    Ok(fs)
}

/// 自 UNIX 纪元起的秒数
fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as u32)
}
