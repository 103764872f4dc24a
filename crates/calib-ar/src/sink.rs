//! Frame recorders and displays.

use image::RgbImage;
use log::{debug, trace};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot create output directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write frame {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Recorder of a frame stream.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    /// Flush and close. Idempotent.
    fn release(&mut self);
}

/// Where composited frames are shown to the user.
pub trait DisplaySink {
    fn show_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    fn release(&mut self);
}

/// Numbered PNG files (`frame_000000.png`, ...) in one directory.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: u64,
    released: bool,
}

impl PngSequenceSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| SinkError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            written: 0,
            released: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        frame
            .save(&path)
            .map_err(|source| SinkError::Write { path, source })?;
        self.written += 1;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!("recorded {} frame(s) to {}", self.written, self.dir.display());
        }
    }
}

/// Display for non-interactive runs: frames are counted and dropped.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        self.shown += 1;
        trace!("frame {} ({}x{})", self.shown, frame.width(), frame.height());
        Ok(())
    }

    fn release(&mut self) {}
}
