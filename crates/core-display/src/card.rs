//! Thin device-node wrapper implementing the drm crate's device traits.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;

/// An open DRM device minor.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl drm::control::Device for Card {}

impl Card {
    /// Open `/dev/dri/card<minor>`.
    pub fn open_minor(minor: u32) -> io::Result<Self> {
        let path: PathBuf = format!("/dev/dri/card{minor}").into();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(file))
    }
}
