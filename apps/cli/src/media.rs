use std::process::Output;

use async_trait::async_trait;
use slidecast_core::{
    capabilities::{FrameRenderer, MediaMaterializer, MediaProbe},
    error::{MaterializeError, ProbeError, RenderError},
    types::{ChunkWindow, ProbeInfo, SourceAsset},
};
use tokio::process::Command;
use tracing::debug;

/// Media capabilities backed by the `ffprobe` and `ffmpeg` binaries.
/// Output is read from stdout, nothing is written to disk.
pub struct Ffmpeg;

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Reads duration and bitrate from `ffprobe -of json -show_entries format=...`.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<ProbeInfo, String> {
    let value: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;
    let format = &value["format"];

    let number = |key: &str| -> Option<f64> {
        match &format[key] {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };

    Ok(ProbeInfo {
        duration_secs: number("duration").filter(|d| d.is_finite() && *d > 0.0),
        estimated_bitrate_bps: number("bit_rate")
            .filter(|b| b.is_finite() && *b > 0.0)
            .map(|b| b as u64),
    })
}

#[async_trait]
impl MediaProbe for Ffmpeg {
    async fn probe(&self, asset: &SourceAsset) -> Result<ProbeInfo, ProbeError> {
        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration,bit_rate")
            .arg("-of")
            .arg("json")
            .arg(&asset.location)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                location: asset.location.display().to_string(),
                reason: stderr_of(&output),
            });
        }

        let info = parse_ffprobe_output(&output.stdout).map_err(|reason| ProbeError::Failed {
            location: asset.location.display().to_string(),
            reason,
        })?;
        debug!(?info, "probed");
        Ok(info)
    }
}

#[async_trait]
impl MediaMaterializer for Ffmpeg {
    async fn materialize(
        &self,
        asset: &SourceAsset,
        window: &ChunkWindow,
    ) -> Result<Vec<u8>, MaterializeError> {
        let output = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", window.start))
            .arg("-t")
            .arg(format!("{:.3}", window.duration))
            .arg("-i")
            .arg(&asset.location)
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg("16000")
            .arg("-b:a")
            .arg("64k")
            .arg("-f")
            .arg("mp3")
            .arg("pipe:1")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(MaterializeError::Failed {
                index: window.index,
                reason: stderr_of(&output),
            });
        }

        Ok(output.stdout)
    }

    fn output_extension(&self) -> &str {
        "mp3"
    }
}

#[async_trait]
impl FrameRenderer for Ffmpeg {
    async fn render_frame_at(
        &self,
        asset: &SourceAsset,
        timestamp: f64,
    ) -> Result<Vec<u8>, RenderError> {
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(RenderError::InvalidTimestamp(timestamp));
        }

        let output = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", timestamp))
            .arg("-i")
            .arg(&asset.location)
            .arg("-frames:v")
            .arg("1")
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg("mjpeg")
            .arg("pipe:1")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(RenderError::Failed {
                timestamp,
                reason: stderr_of(&output),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_encoded_numbers() {
        let info = parse_ffprobe_output(
            br#"{"format": {"duration": "125.040000", "bit_rate": "2683746"}}"#,
        )
        .unwrap();

        assert_eq!(info.duration_secs, Some(125.04));
        assert_eq!(info.estimated_bitrate_bps, Some(2_683_746));
    }

    #[test]
    fn missing_fields_are_unknown() {
        let info = parse_ffprobe_output(br#"{"format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(info, ProbeInfo::default());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_ffprobe_output(b"not json").is_err());
    }
}
