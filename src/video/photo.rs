//! Still-photo archive.
//!
//! Photos go to `<root>/<yyyy.mm.dd>/image_<seq>_Time_<HH_MM_SS>.jpg`. The day
//! directory is created on the first save of that day.

use crate::error::{AppResult, HubError};
use chrono::{DateTime, Local};
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Writes still photos with a process-wide sequence number.
#[derive(Debug, Clone)]
pub struct PhotoArchive {
    root: PathBuf,
    sequence: Arc<AtomicU64>,
    saved: Arc<AtomicU64>,
}

impl PhotoArchive {
    /// Archive under `root`. Nothing is created until the first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: Arc::new(AtomicU64::new(0)),
            saved: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Archive root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory photos taken at `now` go to.
    pub fn directory_for(&self, now: DateTime<Local>) -> PathBuf {
        self.root.join(now.format("%Y.%m.%d").to_string())
    }

    /// Photos written to disk so far.
    pub fn saved(&self) -> u64 {
        self.saved.load(Ordering::Acquire)
    }

    /// Encode `image` as JPEG into today's directory. Blocking; call it from
    /// `spawn_blocking`.
    pub fn save(&self, image: &DynamicImage, now: DateTime<Local>) -> AppResult<PathBuf> {
        let directory = self.directory_for(now);
        std::fs::create_dir_all(&directory)?;

        let number = self.sequence.fetch_add(1, Ordering::AcqRel);
        let path = directory.join(format!(
            "image_{number}_Time_{}.jpg",
            now.format("%H_%M_%S")
        ));

        // JPEG has no alpha channel
        image
            .to_rgb8()
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| HubError::Io(std::io::Error::other(e)))?;
        self.saved.fetch_add(1, Ordering::AcqRel);
        Ok(path)
    }
}
