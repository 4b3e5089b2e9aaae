//! Chromaprint fingerprints of segment files, produced by `fpcalc`.
//!
//! Install fpcalc:
//! - Windows: `winget install AcoustID.Chromaprint`
//! - macOS: `brew install chromaprint`
//! - Linux: `apt install libchromaprint-tools` or equivalent

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use serde::Deserialize;

use super::ProviderError;

/// Longest segment the configuration allows. fpcalc stops at 120 s unless told
/// otherwise.
const MAX_SAMPLE_SECS: u32 = 300;

/// Chromaprint fingerprint of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFingerprint {
    pub fingerprint: String,
    pub duration_secs: u32,
}

#[cfg(windows)]
const CANDIDATES: &[&str] = &[
    "fpcalc",
    r"C:\Program Files\Chromaprint\fpcalc.exe",
    r"C:\Program Files\MusicBrainz Picard\fpcalc.exe",
];

#[cfg(not(windows))]
const CANDIDATES: &[&str] = &[
    "fpcalc",
    "/usr/bin/fpcalc",
    "/usr/local/bin/fpcalc",
    "/opt/homebrew/bin/fpcalc",
];

/// Located once per process; every segment of a run reuses it.
fn fpcalc_binary() -> Option<&'static str> {
    static BINARY: OnceLock<Option<&'static str>> = OnceLock::new();
    *BINARY.get_or_init(|| {
        let found = CANDIDATES.iter().copied().find(|candidate| {
            Command::new(candidate)
                .arg("-version")
                .output()
                .is_ok_and(|o| o.status.success())
        });
        match found {
            Some(path) => tracing::debug!("Using fpcalc at {}", path),
            None => tracing::debug!("fpcalc not found in {:?}", CANDIDATES),
        }
        found
    })
}

/// Fingerprint a segment file. Blocking; call from `spawn_blocking`.
pub fn generate_fingerprint(path: &Path) -> Result<AudioFingerprint, ProviderError> {
    let fpcalc = fpcalc_binary().ok_or_else(|| {
        ProviderError::Fingerprint(
            "fpcalc not found. Please install Chromaprint: https://acoustid.org/chromaprint"
                .to_string(),
        )
    })?;

    let output = Command::new(fpcalc)
        .arg("-json")
        .arg("-length")
        .arg(MAX_SAMPLE_SECS.to_string())
        .arg(path)
        .output()
        .map_err(|e| ProviderError::Fingerprint(format!("Failed to run fpcalc: {e}")))?;

    if !output.status.success() {
        return Err(ProviderError::Fingerprint(format!(
            "fpcalc failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_output(&output.stdout)
}

#[derive(Deserialize)]
struct FpcalcJson {
    fingerprint: String,
    duration: f64,
}

fn parse_output(stdout: &[u8]) -> Result<AudioFingerprint, ProviderError> {
    let parsed: FpcalcJson = serde_json::from_slice(stdout)
        .map_err(|e| ProviderError::Fingerprint(format!("Unreadable fpcalc output: {e}")))?;

    if parsed.fingerprint.is_empty() {
        return Err(ProviderError::Fingerprint("fpcalc returned an empty fingerprint".into()));
    }

    Ok(AudioFingerprint {
        fingerprint: parsed.fingerprint,
        duration_secs: parsed.duration.max(0.0).round() as u32,
    })
}

pub fn is_fpcalc_available() -> bool {
    fpcalc_binary().is_some()
}

/// fpcalc version string, for `check-tools`.
pub fn fpcalc_version() -> Option<String> {
    let output = Command::new(fpcalc_binary()?).arg("-version").output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output() {
        let json = br#"{"duration": 59.6, "fingerprint": "AQADtNIyRUkkZUqS"}"#;
        let result = parse_output(json).unwrap();
        assert_eq!(result.fingerprint, "AQADtNIyRUkkZUqS");
        assert_eq!(result.duration_secs, 60);
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        assert!(matches!(
            parse_output(br#"{"error": "invalid"}"#),
            Err(ProviderError::Fingerprint(_))
        ));
        assert!(matches!(
            parse_output(br#"{"duration": 30.0, "fingerprint": ""}"#),
            Err(ProviderError::Fingerprint(_))
        ));
    }

    #[test]
    fn test_fingerprint_nonexistent_file() {
        // Fails whether or not fpcalc is installed
        assert!(generate_fingerprint(Path::new("/nonexistent/segment.mp3")).is_err());
    }
}
