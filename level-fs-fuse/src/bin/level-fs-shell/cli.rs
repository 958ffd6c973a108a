use std::path::PathBuf;

use clap::Parser;
use level_fs::FormatOptions;

#[derive(Parser)]
pub struct Cli {
    /// Disk image the shell operates on
    #[arg(long, short, default_value = "level-fs.img")]
    pub image: PathBuf,

    /// Block count used by `newfs`
    #[arg(long, default_value_t = 200)]
    pub blocks: u32,

    /// Block size used by `newfs`, a multiple of 128
    #[arg(long, default_value_t = 1024)]
    pub block_size: u16,

    /// Inode count used by `newfs`
    #[arg(long, default_value_t = 1024)]
    pub inodes: u16,

    /// Run the commands in this file instead of reading stdin
    #[arg(long, short)]
    pub script: Option<PathBuf>,
}

impl Cli {
    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            block_count: self.blocks,
            block_size: self.block_size,
            inode_count: self.inodes,
        }
    }
}
