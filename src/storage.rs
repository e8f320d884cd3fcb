//! Where recordings land

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::avi::Truncate;

/// File system seen by the timelapse controller.
///
/// `create` truncates an existing file, `create_new` refuses one with
/// [`io::ErrorKind::AlreadyExists`]. Files are handed back through
/// [`close`](Storage::close) so implementations can flush them to the medium.
pub trait Storage: Send + Sync + 'static {
    type File: Read + Write + Seek + Truncate + Send + 'static;

    fn create(&self, path: &Path) -> io::Result<Self::File>;

    fn create_new(&self, path: &Path) -> io::Result<Self::File>;

    fn close(&self, file: Self::File) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Host file system, optionally rooted at a directory for relative paths.
#[derive(Debug, Clone, Default)]
pub struct FsStorage {
    root: Option<PathBuf>,
}

impl FsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn open(&self, path: &Path, options: &OpenOptions) -> io::Result<File> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!("Creating {}", path.display());
        options.open(path)
    }
}

impl Storage for FsStorage {
    type File = File;

    fn create(&self, path: &Path) -> io::Result<File> {
        self.open(
            path,
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true),
        )
    }

    fn create_new(&self, path: &Path) -> io::Result<File> {
        self.open(path, OpenOptions::new().read(true).write(true).create_new(true))
    }

    fn close(&self, mut file: File) -> io::Result<()> {
        file.flush()?;
        file.sync_all()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }
}
