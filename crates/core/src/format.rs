use std::time::Duration;

use crate::{
    frames::FrameLibrary,
    transcription::{MergedTranscript, TranscriptEntry},
};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// Format merged transcript entries with timestamps, one line each
pub fn format_transcript_with_timestamps(transcript: &MergedTranscript) -> String {
    transcript
        .entries
        .iter()
        .map(|entry| match entry {
            TranscriptEntry::Segment(seg) => {
                format!("[{}] {}", format_timestamp(seg.start), seg.text.trim())
            }
            TranscriptEntry::Gap { start, end, .. } => format!(
                "[gap {}-{}]",
                format_timestamp(*start),
                format_timestamp(*end)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_frame_list(library: &FrameLibrary) -> String {
    library
        .frames()
        .iter()
        .map(|frame| {
            format!(
                "[{}] {:>9.3}s  {}",
                format_timestamp(frame.timestamp),
                frame.timestamp,
                frame.image_ref
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(125.9), "02:05");
        assert_eq!(format_timestamp(3725.0), "62:05");
        assert_eq!(format_timestamp(-3.0), "00:00");
        assert_eq!(format_timestamp(f64::NAN), "00:00");
    }

    #[test]
    fn durations_switch_to_minutes() {
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
