//! Media file classification and video timestamp extraction.

use crate::api_client::SmugError;
use chrono::{DateTime, NaiveDateTime};

/// Seconds between 1904-01-01 (the QuickTime epoch) and 1970-01-01.
const QUICKTIME_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Recognized media extensions, partitioned further into videos.
#[derive(Debug, Clone)]
pub struct MediaTypes {
    media: Vec<String>,
    video: Vec<String>,
}

impl MediaTypes {
    pub fn new(media: &[String], video: &[String]) -> Self {
        Self {
            media: media.iter().map(|e| e.trim().to_lowercase()).collect(),
            video: video.iter().map(|e| e.trim().to_lowercase()).collect(),
        }
    }

    pub fn is_media(&self, file_name: &str) -> bool {
        self.media.contains(&extension(file_name))
    }

    /// Whether `format` (a remote `Format` or a local extension) is a video.
    pub fn is_video_format(&self, format: &str) -> bool {
        self.video.contains(&format.trim().to_lowercase())
    }
}

/// Lowercased extension of `file_name`, whitespace trimmed.
pub fn extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.trim().is_empty() => ext.trim().to_lowercase(),
        _ => String::new(),
    }
}

/// Splits `file_name` into its stem and its extension (with the dot).
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, ""),
        Some(dot) => file_name.split_at(dot),
    }
}

/// Reads the last modification time recorded inside an MP4/QuickTime file.
///
/// The `mvhd` box under `moov` carries both a creation and a modification
/// time; the later of the two is returned.
pub fn extract_last_modified(data: &[u8]) -> Result<NaiveDateTime, SmugError> {
    let moov = find_box(data, b"moov").ok_or_else(|| missing("moov"))?;
    let mvhd = find_box(moov, b"mvhd").ok_or_else(|| missing("mvhd"))?;

    let version = *mvhd.first().ok_or_else(|| missing("mvhd version"))?;
    let (created, modified) = match version {
        0 => (read_u32(mvhd, 4)?, read_u32(mvhd, 8)?),
        1 => (read_u64(mvhd, 4)?, read_u64(mvhd, 12)?),
        other => {
            return Err(SmugError::ExtractMetadata(format!(
                "Unsupported mvhd version {}.",
                other
            )))
        }
    };

    let latest = created.max(modified);
    if latest == 0 {
        return Err(SmugError::ExtractMetadata(
            "Video has no recorded timestamp.".to_string(),
        ));
    }
    let seconds = i64::try_from(latest)
        .map_err(|_| SmugError::ExtractMetadata("Timestamp out of range.".to_string()))?
        - QUICKTIME_EPOCH_OFFSET;
    DateTime::from_timestamp(seconds, 0)
        .map(|time| time.naive_utc())
        .ok_or_else(|| SmugError::ExtractMetadata("Timestamp out of range.".to_string()))
}

/// Returns the payload of the first box named `name` at this level.
fn find_box<'a>(mut data: &'a [u8], name: &[u8; 4]) -> Option<&'a [u8]> {
    while data.len() >= 8 {
        let size = u32::from_be_bytes(data[0..4].try_into().ok()?) as u64;
        let kind = &data[4..8];
        let (header, size) = match size {
            0 => (8, data.len() as u64),
            1 => {
                let large = u64::from_be_bytes(data.get(8..16)?.try_into().ok()?);
                (16, large)
            }
            _ => (8, size),
        };
        let size = usize::try_from(size).ok()?;
        if size < header || size > data.len() {
            return None;
        }
        if kind == name {
            return Some(&data[header..size]);
        }
        data = &data[size..];
    }
    None
}

fn read_u32(data: &[u8], at: usize) -> Result<u64, SmugError> {
    let bytes = data.get(at..at + 4).ok_or_else(|| missing("mvhd timestamps"))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf) as u64)
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, SmugError> {
    let bytes = data.get(at..at + 8).ok_or_else(|| missing("mvhd timestamps"))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

fn missing(what: &str) -> SmugError {
    SmugError::ExtractMetadata(format!("No {} found in video.", what))
}
