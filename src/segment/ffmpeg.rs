//! ffmpeg-backed segmenter.
//!
//! Shells out to `ffprobe` for the recording length and to `ffmpeg` for each
//! slice. Slices are cut by a bounded pool of worker tasks and streamed back
//! as they finish, so identification can start before slicing is done.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};

use super::{AudioSegment, SegmentError, SegmentationConfig};

/// Extra audio kept on each side of a slice.
const PADDING_SECS: f64 = 0.5;

/// Existing segment files at least this large are reused.
const MIN_REUSABLE_BYTES: u64 = 1000;

/// `segment_<start>_<length>.mp3`
pub fn segment_filename(start: Duration, length: Duration) -> String {
    format!(
        "segment_{:.0}_{:.0}.mp3",
        start.as_secs_f64(),
        length.as_secs_f64()
    )
}

/// ffmpeg arguments for one padded slice: 44.1 kHz stereo VBR MP3.
pub fn ffmpeg_args(input: &Path, output: &Path, start: Duration, length: Duration) -> Vec<String> {
    let padded_start = (start.as_secs_f64() - PADDING_SECS).max(0.0);
    let lead = start.as_secs_f64() - padded_start;
    let padded_length = length.as_secs_f64() + lead + PADDING_SECS;

    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-ar".into(),
        "44100".into(),
        "-ac".into(),
        "2".into(),
        "-c:a".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "5".into(),
        "-map".into(),
        "0:a".into(),
        "-ss".into(),
        format!("{padded_start:.3}"),
        "-t".into(),
        format!("{padded_length:.3}"),
        "-y".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Whether `tool -version` runs successfully.
pub async fn is_tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Slices recordings into [`AudioSegment`]s.
#[derive(Debug, Clone)]
pub struct FfmpegSegmenter {
    config: SegmentationConfig,
}

impl FfmpegSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Length of a recording according to ffprobe.
    pub async fn probe_duration(input: &Path) -> Result<Duration, SegmentError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SegmentError::ToolMissing("ffprobe".into()),
                _ => SegmentError::Probe {
                    path: input.to_path_buf(),
                    message: e.to_string(),
                },
            })?;

        if !output.status.success() {
            return Err(SegmentError::Probe {
                path: input.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            SegmentError::Probe {
                path: input.to_path_buf(),
                message: "ffprobe returned no duration".into(),
            }
        })
    }

    /// Probe, plan and start slicing `input`.
    ///
    /// Returns the recording length and a channel yielding segments in
    /// completion order. Failed slices arrive as errors; the channel closes
    /// once every window has been attempted.
    pub async fn split(
        &self,
        input: &Path,
    ) -> Result<(Duration, mpsc::Receiver<Result<AudioSegment, SegmentError>>), SegmentError> {
        let total = Self::probe_duration(input).await?;
        let plan = self.config.plan(total)?;
        let output_dir = self.config.output_dir_for(input);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| SegmentError::Io {
                path: output_dir.clone(),
                source,
            })?;

        tracing::info!(
            "Splitting {} ({:.0}s) into {} segments",
            input.display(),
            total.as_secs_f64(),
            plan.len()
        );

        let (tx, rx) = mpsc::channel(plan.len().max(1));
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let input: Arc<PathBuf> = Arc::new(input.to_path_buf());
        let output_dir = Arc::new(output_dir);

        for &(start, length) in plan.windows() {
            let tx = tx.clone();
            let workers = Arc::clone(&workers);
            let input = Arc::clone(&input);
            let output_dir = Arc::clone(&output_dir);
            tokio::spawn(async move {
                let Ok(_slot) = workers.acquire_owned().await else {
                    return;
                };
                let result = extract_segment(&input, &output_dir, start, length).await;
                if let Err(ref e) = result {
                    tracing::warn!("{}", e);
                }
                let _ = tx.send(result).await;
            });
        }

        Ok((total, rx))
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let secs: f64 = text.trim().lines().next()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

async fn extract_segment(
    input: &Path,
    output_dir: &Path,
    start: Duration,
    length: Duration,
) -> Result<AudioSegment, SegmentError> {
    let output = output_dir.join(segment_filename(start, length));

    if let Ok(meta) = tokio::fs::metadata(&output).await
        && meta.len() > MIN_REUSABLE_BYTES
    {
        tracing::debug!("Reusing existing segment {}", output.display());
        return Ok(AudioSegment::new(output, start, length));
    }

    let result = Command::new("ffmpeg")
        .args(ffmpeg_args(input, &output, start, length))
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SegmentError::ToolMissing("ffmpeg".into()),
            _ => SegmentError::Extract {
                start: start.as_secs_f64(),
                message: e.to_string(),
            },
        })?;

    if !result.status.success() {
        return Err(SegmentError::Extract {
            start: start.as_secs_f64(),
            message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }

    tracing::debug!("Created segment {}", output.display());
    Ok(AudioSegment::new(output, start, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_filename() {
        assert_eq!(
            segment_filename(Duration::from_secs(50), Duration::from_secs(60)),
            "segment_50_60.mp3"
        );
    }

    #[test]
    fn test_ffmpeg_args_pad_both_sides() {
        let args = ffmpeg_args(
            Path::new("mix.mp3"),
            Path::new("out.mp3"),
            Duration::from_secs(50),
            Duration::from_secs(60),
        );
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[ss + 1], "49.500");
        assert_eq!(args[t + 1], "61.000");
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }

    #[test]
    fn test_ffmpeg_args_clamp_at_zero() {
        let args = ffmpeg_args(
            Path::new("mix.mp3"),
            Path::new("out.mp3"),
            Duration::ZERO,
            Duration::from_secs(60),
        );
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "0.000");
        assert_eq!(args[ss + 3], "60.500");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3725.120000\n"), Some(Duration::from_secs_f64(3725.12)));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[tokio::test]
    async fn test_existing_segment_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let start = Duration::from_secs(10);
        let length = Duration::from_secs(60);
        let path = dir.path().join(segment_filename(start, length));
        std::fs::write(&path, vec![1u8; 2000]).unwrap();

        let segment = extract_segment(Path::new("/nonexistent/mix.mp3"), dir.path(), start, length)
            .await
            .unwrap();
        assert_eq!(segment.path, path);
        assert_eq!(segment.start, start);
    }

    #[tokio::test]
    async fn test_probe_missing_file_fails() {
        assert!(FfmpegSegmenter::probe_duration(Path::new("/nonexistent/mix.mp3"))
            .await
            .is_err());
    }
}
