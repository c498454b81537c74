//! Decides whether a local media file must be uploaded.
//!
//! The remote copy is looked up under the names SmugMug gives converted
//! files, then compared in the way that still works after the conversion:
//!
//! * images: the archived MD5 against the local bytes,
//! * videos: the recorded modification time, since the server re-encodes them,
//! * HEIC: never re-uploaded. The server turns them into JPEGs and keeps no
//!   signal that would reveal a local change.

use crate::api_client::node::RemoteNode;
use crate::api_client::SmugError;
use crate::foundation::console::Console;
use crate::foundation::media::{extension, extract_last_modified, split_extension, MediaTypes};
use chrono::{DateTime, Local, NaiveDateTime};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Timestamp format of `ImageMetadata.DateTimeModified`.
const REMOTE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Allowed drift between the remote and the local video timestamps.
const VIDEO_TIME_TOLERANCE_SECS: i64 = 1;

#[derive(Debug)]
pub enum SyncDecision {
    /// The remote file is up to date.
    Skip,
    /// No remote file yet.
    Upload,
    /// The remote file is outdated.
    Replace(Arc<RemoteNode>),
}

/// Finds the remote counterpart of `file_name` in `album`.
///
/// HEIC files are stored as `<stem>.JPG` and MP4 files as `<stem>_mp4.MP4`
/// or `<stem>.MP4`; those names are tried before the original one.
pub fn find_remote_match(
    album: &Arc<RemoteNode>,
    file_name: &str,
) -> Result<Option<Arc<RemoteNode>>, SmugError> {
    let (stem, _) = split_extension(file_name);
    let renamed = match extension(file_name).as_str() {
        "heic" => vec![format!("{}.JPG", stem)],
        "mp4" => vec![format!("{}_mp4.MP4", stem), format!("{}.MP4", stem)],
        _ => Vec::new(),
    };

    for candidate in renamed.iter().map(String::as_str).chain([file_name]) {
        if let Some(remote) = album.get_child(candidate)? {
            return Ok(Some(remote));
        }
    }
    Ok(None)
}

/// Compares the local file at `path` (read into `content`) with `remote`.
pub fn decide(
    remote: Option<Arc<RemoteNode>>,
    path: &Path,
    content: &[u8],
    media: &MediaTypes,
    console: &Console,
) -> Result<SyncDecision, SmugError> {
    let Some(remote) = remote else {
        return Ok(SyncDecision::Upload);
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let same_file = if media.is_video_format(remote.format().unwrap_or_default()) {
        same_video(&remote, path, content, console)?
    } else if extension(&file_name) == "heic" {
        true
    } else {
        remote.archived_md5() == Some(format!("{:x}", md5::compute(content)).as_str())
    };

    Ok(if same_file {
        SyncDecision::Skip
    } else {
        SyncDecision::Replace(remote)
    })
}

fn same_video(
    remote: &Arc<RemoteNode>,
    path: &Path,
    content: &[u8],
    console: &Console,
) -> Result<bool, SmugError> {
    let metadata = remote.get_node("ImageMetadata")?;
    let remote_time = match metadata.get("DateTimeModified") {
        Some(Value::String(time)) => NaiveDateTime::parse_from_str(time, REMOTE_TIME_FORMAT)
            .map_err(|e| {
                SmugError::UnexpectedResponse(format!(
                    "Invalid modification time \"{}\" for \"{}\": {}",
                    time,
                    remote.path(),
                    e
                ))
            })?,
        _ => {
            return Err(SmugError::UnexpectedResponse(format!(
                "No modification time recorded for \"{}\".",
                remote.path()
            )))
        }
    };

    let local_time = match extract_last_modified(content) {
        Ok(time) => time,
        Err(_) => {
            console.println(format!(
                "Failed extracting metadata for file \"{}\".",
                path.display()
            ));
            DateTime::<Local>::from(fs::metadata(path)?.modified()?).naive_local()
        }
    };

    let delta = (remote_time - local_time).num_seconds().abs();
    Ok(delta <= VIDEO_TIME_TOLERANCE_SECS)
}
