#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use level_fs::FormatOptions;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 每次调用都得到一个不同的镜像路径，结束时删除
pub struct Image(pub PathBuf);

impl Image {
    pub fn new(tag: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        init_logger();
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(std::env::temp_dir().join(format!(
            "level-fs-{tag}-{}-{n}.img",
            std::process::id()
        )))
    }

    pub fn create(tag: &str, options: &FormatOptions) -> Self {
        let image = Self::new(tag);
        level_fs_fuse::create(&image.0, options).unwrap();
        image
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
