//! Audio segments and segment planning.
//!
//! A mix is cut into overlapping fixed-length windows; each window is handed
//! to the identification pipeline as an [`AudioSegment`].

mod ffmpeg;
mod hash;

pub use ffmpeg::{ffmpeg_args, is_tool_available, segment_filename, FfmpegSegmenter};
pub use hash::compute_file_hash;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from probing and slicing audio.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("{0} not found. Please install ffmpeg: https://ffmpeg.org/download.html")]
    ToolMissing(String),

    #[error("Failed to probe {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("ffmpeg failed for segment at {start:.0}s: {message}")]
    Extract { start: f64, message: String },

    #[error("Invalid segmentation: {0}")]
    InvalidPlan(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A slice of the input recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub path: PathBuf,
    /// Position of the slice in the mix
    pub start: Duration,
    pub duration: Duration,
}

impl AudioSegment {
    pub fn new(path: impl Into<PathBuf>, start: Duration, duration: Duration) -> Self {
        Self {
            path: path.into(),
            start,
            duration,
        }
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    /// Content hash of the segment file, computed off the async runtime.
    pub async fn content_hash(&self) -> std::io::Result<String> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || compute_file_hash(&path))
            .await
            .map_err(std::io::Error::other)?
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// Segmentation section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub segment_length_secs: f64,
    pub overlap_secs: f64,
    /// Trailing segments shorter than this are dropped
    pub min_segment_length_secs: f64,
    /// Concurrent ffmpeg processes
    pub workers: usize,
    /// Where segment files go; `None` uses a directory next to the cache
    pub output_dir: Option<PathBuf>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segment_length_secs: 60.0,
            overlap_secs: 10.0,
            min_segment_length_secs: 10.0,
            workers: 4,
            output_dir: None,
        }
    }
}

impl SegmentationConfig {
    pub fn plan(&self, total: Duration) -> Result<SegmentPlan, SegmentError> {
        SegmentPlan::new(
            total,
            self.segment_length_secs,
            self.overlap_secs,
            self.min_segment_length_secs,
        )
    }

    /// Resolved segment directory for an input file.
    pub fn output_dir_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input");
        self.output_dir
            .clone()
            .unwrap_or_else(|| crate::cache::default_cache_dir().join("segments"))
            .join(stem)
    }
}

/// `(start, length)` windows covering a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    windows: Vec<(Duration, Duration)>,
}

impl SegmentPlan {
    /// Step by `segment_length - overlap`, truncating the last window at the
    /// end of the recording. Windows shorter than `min_segment_length` are
    /// dropped unless nothing else would remain.
    pub fn new(
        total: Duration,
        segment_length: f64,
        overlap: f64,
        min_segment_length: f64,
    ) -> Result<Self, SegmentError> {
        if !(segment_length.is_finite() && segment_length > 0.0) {
            return Err(SegmentError::InvalidPlan(format!(
                "segment length must be positive, got {segment_length}"
            )));
        }
        if !(overlap.is_finite() && overlap >= 0.0 && overlap < segment_length) {
            return Err(SegmentError::InvalidPlan(format!(
                "overlap {overlap} must be in [0, {segment_length})"
            )));
        }

        let total_secs = total.as_secs_f64();
        let step = segment_length - overlap;
        let mut windows = Vec::new();
        let mut start = 0.0;
        while start < total_secs {
            let length = segment_length.min(total_secs - start);
            windows.push((start, length));
            start += step;
        }

        let kept: Vec<_> = windows
            .iter()
            .copied()
            .filter(|&(_, length)| length >= min_segment_length)
            .collect();
        let windows = if kept.is_empty() {
            windows.into_iter().take(1).collect()
        } else {
            kept
        };

        Ok(Self {
            windows: windows
                .into_iter()
                .map(|(s, l)| (Duration::from_secs_f64(s), Duration::from_secs_f64(l)))
                .collect(),
        })
    }

    pub fn windows(&self) -> &[(Duration, Duration)] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(plan: &SegmentPlan) -> Vec<(f64, f64)> {
        plan.windows()
            .iter()
            .map(|(s, l)| (s.as_secs_f64(), l.as_secs_f64()))
            .collect()
    }

    #[test]
    fn test_plan_steps_with_overlap() {
        let plan = SegmentPlan::new(Duration::from_secs(150), 60.0, 10.0, 10.0).unwrap();
        assert_eq!(
            secs(&plan),
            vec![(0.0, 60.0), (50.0, 60.0), (100.0, 50.0)]
        );
    }

    #[test]
    fn test_plan_drops_short_tail() {
        let plan = SegmentPlan::new(Duration::from_secs(105), 60.0, 0.0, 10.0).unwrap();
        assert_eq!(secs(&plan), vec![(0.0, 60.0)]);
    }

    #[test]
    fn test_plan_keeps_single_short_segment() {
        let plan = SegmentPlan::new(Duration::from_secs(5), 60.0, 10.0, 10.0).unwrap();
        assert_eq!(secs(&plan), vec![(0.0, 5.0)]);
    }

    #[test]
    fn test_plan_empty_recording() {
        let plan = SegmentPlan::new(Duration::ZERO, 60.0, 10.0, 10.0).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_rejects_bad_overlap() {
        assert!(SegmentPlan::new(Duration::from_secs(100), 30.0, 30.0, 10.0).is_err());
        assert!(SegmentPlan::new(Duration::from_secs(100), 0.0, 0.0, 10.0).is_err());
        assert!(SegmentPlan::new(Duration::from_secs(100), 30.0, -1.0, 10.0).is_err());
    }

    #[test]
    fn test_segment_end() {
        let segment = AudioSegment::new("a.mp3", Duration::from_secs(50), Duration::from_secs(60));
        assert_eq!(segment.end(), Duration::from_secs(110));
    }

    #[test]
    fn test_output_dir_uses_input_stem() {
        let config = SegmentationConfig {
            output_dir: Some(PathBuf::from("/tmp/segs")),
            ..Default::default()
        };
        assert_eq!(
            config.output_dir_for(Path::new("/music/mix.mp3")),
            PathBuf::from("/tmp/segs/mix")
        );
    }
}
