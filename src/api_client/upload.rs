//! Uploading media files, either as sync tasks reporting to the status
//! footer or as a batch from the `upload` command with progress bars.

use crate::api_client::node::RemoteNode;
use crate::api_client::transport::ProgressFn;
use crate::api_client::SmugError;
use crate::foundation::console::Console;
use crate::foundation::status::StatusDisplay;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One file to send to an album during a sync.
pub struct UploadTask {
    pub album: Arc<RemoteNode>,
    /// The outdated remote copy, if any.
    pub replace: Option<Arc<RemoteNode>>,
    /// Local path, as shown to the user.
    pub file_path: String,
    pub file_name: String,
    pub content: Vec<u8>,
    /// Replace the remote image instead of deleting it first.
    pub in_place: bool,
}

/// Uploads `task`, showing its progress in the status footer.
///
/// An outdated remote copy is deleted first unless the upload replaces it
/// in place. The transfer stops as soon as `aborting` is set.
pub fn upload_media(
    task: UploadTask,
    status: &Arc<StatusDisplay>,
    console: &Console,
    aborting: &Arc<AtomicBool>,
) -> Result<(), SmugError> {
    if aborting.load(Ordering::SeqCst) {
        return Ok(());
    }

    let mut replace_image_uri = None;
    let label = match &task.replace {
        Some(remote) => {
            if task.in_place {
                console.println(format!(
                    "File \"{}\" exists, but has changed. Upload in place.",
                    task.file_path
                ));
                replace_image_uri = Some(remote.uri("Image")?);
            } else {
                console.println(format!(
                    "File \"{}\" exists, but has changed. Deleting old version.",
                    task.file_path
                ));
                remote.delete()?;
            }
            format!("+ Re-uploading \"{}\"", task.file_path)
        }
        None => format!("+ Uploading \"{}\"", task.file_path),
    };

    {
        let progress_task = status.start_task(0, label);
        let handle = progress_task.handle();
        let aborting = aborting.clone();
        let progress: ProgressFn = Box::new(move |percent| {
            handle.update_status(&format!(": {:.1}%", percent));
            aborting.load(Ordering::SeqCst)
        });
        task.album.upload(
            "Album",
            &task.file_name,
            task.content,
            Some(progress),
            replace_image_uri,
        )?;
    }

    if task.replace.is_some() {
        console.println(format!("Re-uploaded \"{}\".", task.file_path));
    } else {
        console.println(format!("Uploaded \"{}\".", task.file_path));
    }
    Ok(())
}

/// Uploads `files` to `album`, skipping names already present.
///
/// Shows an overall bar and one bar per file. A failing file is reported
/// and the next one is tried.
///
/// # Arguments
///
/// * `album` - The album receiving the files.
/// * `album_label` - How the album is named in messages.
/// * `files` - Local paths of the files to upload.
/// * `console` - Where skip and failure messages go.
/// * `aborting` - Stops the batch, and the running transfer, once set.
///
/// # Returns
///
/// `Ok` once every file was tried, or an error when the album listing
/// itself fails.
pub fn upload_files(
    album: &Arc<RemoteNode>,
    album_label: &str,
    files: &[String],
    console: &Console,
    aborting: &Arc<AtomicBool>,
) -> Result<(), SmugError> {
    let multi_progress = MultiProgress::new();
    let overall_progress = add_bar(&multi_progress, files.len() as u64, BATCH_TEMPLATE);

    for file in files {
        if aborting.load(Ordering::SeqCst) {
            break;
        }
        let file_name = Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().trim().to_string())
            .unwrap_or_default();
        if album.get_child(&file_name)?.is_some() {
            console.println(format!(
                "Skipping \"{}\", file already exists in Album \"{}\".",
                file, album_label
            ));
            overall_progress.inc(1);
            continue;
        }

        console.println(format!("Uploading \"{}\" to \"{}\"...", file, album_label));
        overall_progress.set_message(format!("Uploading: {file_name}"));
        let file_progress = add_bar(&multi_progress, 100, FILE_TEMPLATE);
        file_progress.set_message(file_name.clone());

        let result = fs::read(file).map_err(SmugError::from).and_then(|content| {
            album.upload(
                "Album",
                &file_name,
                content,
                Some(bar_progress(file_progress.clone(), aborting.clone())),
                None,
            )
        });
        match result {
            Ok(_) => {
                file_progress.finish_with_message(format!("Uploaded: {file_name}"));
                overall_progress.inc(1);
            }
            Err(e) => {
                file_progress.abandon_with_message(format!("Failed: {file_name}"));
                console.println(format!("Failed to upload \"{}\": {}", file, e));
            }
        }
    }

    overall_progress.finish_with_message("All uploads completed");
    Ok(())
}

const BATCH_TEMPLATE: &str = "{elapsed_precise} [{bar:40.cyan/blue}] {pos}/{len} files {msg}";
const FILE_TEMPLATE: &str = "  [{bar:30.green/white}] {pos:>3}% {msg}";

fn add_bar(multi_progress: &MultiProgress, total: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    multi_progress.add(ProgressBar::new(total).with_style(style))
}

fn bar_progress(bar: ProgressBar, aborting: Arc<AtomicBool>) -> ProgressFn {
    Box::new(move |percent| {
        bar.set_position(percent.round() as u64);
        aborting.load(Ordering::SeqCst)
    })
}
