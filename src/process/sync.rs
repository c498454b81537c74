//! Mirroring local folders onto the account.
//!
//! Work flows through three pools: folder jobs map a local directory to a
//! remote album (creating it when needed) and queue its media files, file
//! jobs compare a file with its remote copy, and upload jobs transfer what
//! changed. Every job checks the abort flag before starting.

use crate::api_client::{
    decide, find_remote_match, upload_media, NodeKind, Privacy, RemoteNode, SmugError,
    SyncDecision, UploadTask,
};
use crate::foundation::console::Console;
use crate::foundation::media::MediaTypes;
use crate::foundation::pool::WorkerPool;
use crate::foundation::status::StatusDisplay;
use crate::foundation::utils::normalize_name;
use crate::process::paths::{common_path, match_nodes, path_to_node, split_path};
use crate::process::tree::match_or_create_nodes;
use crate::process::walk::{ignore_list, walk_source, WalkStep};
use crate::process::SmugFs;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Slack added to the thread counts when sizing the children cache.
const CACHE_HEADROOM: usize = 5;

pub struct SyncOptions {
    pub user: Option<String>,
    /// Positional arguments. Without an explicit `target`, the last of two or
    /// more is the target.
    pub sources: Vec<String>,
    pub target: Option<String>,
    pub deprecated_target: Option<String>,
    pub force: bool,
    pub privacy: Privacy,
    pub folder_threads: usize,
    pub file_threads: usize,
    pub upload_threads: usize,
    pub set_defaults: bool,
    pub in_place: bool,
}

impl SyncOptions {
    fn sources_and_target(&self) -> (Vec<String>, String) {
        let mut sources = self.sources.clone();
        let target = match &self.target {
            Some(target) => target.clone(),
            None if sources.len() >= 2 => sources.pop().unwrap_or_else(|| "/".to_string()),
            None => "/".to_string(),
        };
        if sources.is_empty() {
            sources.push(".".to_string());
        }
        (sources, target)
    }
}

/// Where a batch of walk steps comes from.
enum SourceWalk {
    Dir(PathBuf),
    Files(PathBuf, Vec<String>),
}

/// State shared by the jobs of one sync.
struct SyncContext {
    console: Console,
    status: Arc<StatusDisplay>,
    media: MediaTypes,
    aborting: Arc<AtomicBool>,
    target: String,
    privacy: Privacy,
    in_place: bool,
    depth_limit: usize,
    file_pool: Arc<WorkerPool>,
    upload_pool: Arc<WorkerPool>,
}

impl SyncContext {
    fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }
}

/// Joins the pools in pipeline order when the sync ends, however it ends.
struct Pipeline {
    folder: Arc<WorkerPool>,
    file: Arc<WorkerPool>,
    upload: Arc<WorkerPool>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.folder.join();
        self.file.join();
        self.upload.join();
    }
}

impl SmugFs {
    /// Mirrors local folders and files onto the account.
    ///
    /// Each local folder holding media maps to an album below the target;
    /// files missing or changed remotely are uploaded. Unless `force` is set
    /// the user confirms first. Errors met while syncing one folder or file
    /// are printed and the sync goes on.
    ///
    /// # Arguments
    ///
    /// * `options` - Sources and target, thread counts and flags of the
    ///   `sync` command.
    ///
    /// # Returns
    ///
    /// `Ok` when the sync ran, or stopped early after printing why (missing
    /// sources, unusable target, declined confirmation). An error when the
    /// account or the target path can't be read.
    pub fn sync(&self, options: SyncOptions) -> Result<(), SmugError> {
        if options.set_defaults {
            let state = self.smugmug.state();
            state.set("folder_threads", options.folder_threads)?;
            state.set("file_threads", options.file_threads)?;
            state.set("upload_threads", options.upload_threads)?;
            self.console.println("Defaults updated.");
            return Ok(());
        }

        if options.deprecated_target.is_some() {
            self.console.println("-t/--target argument no longer exists.");
            self.console
                .println("Specify the target folder as the last positional argument.");
            return Ok(());
        }

        let (sources, target) = options.sources_and_target();
        self.smugmug
            .garbage_collector()
            .set_max_nodes(options.folder_threads + options.file_threads + CACHE_HEADROOM);

        let mut all_sources = Vec::new();
        let mut not_found = Vec::new();
        for source in &sources {
            let matches = expand_glob(source)?;
            if matches.is_empty() {
                not_found.push(source.clone());
            }
            all_sources.extend(matches);
        }
        if !not_found.is_empty() {
            self.console.println(format!(
                "File{} not found:\n  {}",
                if not_found.len() > 1 { "s" } else { "" },
                not_found.join("\n  ")
            ));
            return Ok(());
        }

        let file_sources: Vec<&String> = all_sources
            .iter()
            .filter(|source| Path::new(source.as_str()).is_file())
            .collect();
        let dir_sources: Vec<&String> = all_sources
            .iter()
            .filter(|source| Path::new(source.as_str()).is_dir())
            .collect();

        let mut files_by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in &file_sources {
            let path = Path::new(file.as_str());
            let dir = path
                .parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .filter(|dir| !dir.is_empty())
                .unwrap_or_else(|| ".".to_string());
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            files_by_dir.entry(dir).or_default().push(name);
        }

        let user = self.user(options.user.as_deref())?;
        let target = if target.starts_with('/') {
            target
        } else {
            format!("/{}", target)
        };
        let found = path_to_node(&self.smugmug, &user, &target)?;
        if !found.is_complete() {
            self.console
                .println(format!("Target folder not found: \"{}\".", target));
            return Ok(());
        }

        let target_kind = found.last().kind();
        match target_kind {
            NodeKind::Folder if !file_sources.is_empty() => {
                self.console
                    .println("Can't upload files to folder. Please sync to an album node.");
                return Ok(());
            }
            NodeKind::Album if dir_sources.iter().any(|dir| !dir.ends_with('/')) => {
                self.console
                    .println("Can't upload folders to an album. Please sync to a folder node.");
                return Ok(());
            }
            NodeKind::File => {
                self.console.println("Can't sync to a file node.");
                return Ok(());
            }
            _ => {}
        }

        let type_name = target_kind.as_str().to_lowercase();
        if all_sources.len() == 1 {
            self.console.println(format!(
                "Syncing \"{}\" to SmugMug {} \"{}\".",
                all_sources[0], type_name, target
            ));
        } else {
            self.console.println(format!(
                "Syncing:\n  {}\nto SmugMug {} \"{}\".",
                all_sources.join("\n  "),
                type_name,
                target
            ));
        }
        if !options.force && !self.console.ask("Proceed (yes/no)? ") {
            return Ok(());
        }

        let mut walks: Vec<(String, SourceWalk)> = dir_sources
            .iter()
            .map(|dir| (dir.to_string(), SourceWalk::Dir(PathBuf::from(dir.as_str()))))
            .chain(files_by_dir.into_iter().map(|(dir, files)| {
                (format!("{}/", dir), SourceWalk::Files(PathBuf::from(dir), files))
            }))
            .collect();
        walks.sort_by(|a, b| a.0.cmp(&b.0));

        {
            let status = StatusDisplay::new(self.console.sink());
            let _intercept = self.console.intercept(status.clone());
            let pipeline = Pipeline {
                upload: WorkerPool::new("upload", options.upload_threads, self.console.clone()),
                file: WorkerPool::new("file", options.file_threads, self.console.clone()),
                folder: WorkerPool::new("folder", options.folder_threads, self.console.clone()),
            };
            let context = Arc::new(SyncContext {
                console: self.console.clone(),
                status,
                media: self.media.clone(),
                aborting: self.aborting.clone(),
                target,
                privacy: options.privacy,
                in_place: options.in_place,
                depth_limit: self.folder_depth_limit,
                file_pool: pipeline.file.clone(),
                upload_pool: pipeline.upload.clone(),
            });
            let matched = found.matched().to_vec();

            for (source, walk) in walks {
                let steps = match self.read_walk(walk) {
                    Ok(Some(steps)) => steps,
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        self.console.println(e.to_string());
                        continue;
                    }
                };
                for step in steps {
                    if self.is_aborting() {
                        return Ok(());
                    }
                    let context = context.clone();
                    let source = source.clone();
                    let matched = matched.clone();
                    pipeline
                        .folder
                        .add(move || sync_folder(&context, &source, step, &matched));
                }
            }
        }

        self.console.println("Sync complete.");
        Ok(())
    }

    fn read_walk(&self, walk: SourceWalk) -> Result<Option<Vec<WalkStep>>, SmugError> {
        match walk {
            SourceWalk::Dir(dir) => walk_source(&dir, &self.aborting),
            SourceWalk::Files(dir, files) => {
                let ignored = ignore_list(&dir)?;
                let mut files: Vec<String> = files
                    .into_iter()
                    .filter(|file| !ignored.contains(file))
                    .collect();
                files.sort();
                Ok(Some(vec![WalkStep {
                    dir,
                    dirs: Vec::new(),
                    files,
                }]))
            }
        }
    }
}

/// Glob matches of `pattern`, keeping a trailing separator the pattern had.
fn expand_glob(pattern: &str) -> Result<Vec<String>, SmugError> {
    let paths = glob::glob(pattern).map_err(|e| {
        SmugError::InvalidArgument(format!("Invalid pattern \"{}\": {}", pattern, e))
    })?;
    Ok(paths
        .filter_map(Result::ok)
        .map(|path| {
            let mut path = path.to_string_lossy().into_owned();
            if pattern.ends_with('/') && !path.ends_with('/') {
                path.push('/');
            }
            path
        })
        .collect())
}

/// Segments of `dir` below the directory a sync `source` is relative to.
///
/// A source with a trailing separator contributes only its content; without
/// one its own name is kept as the first segment.
fn relative_segments(dir: &Path, source: &str) -> Vec<String> {
    let base = if source.ends_with('/') {
        PathBuf::from(source.trim_end_matches('/'))
    } else {
        Path::new(source)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    };
    let relative = dir.strip_prefix(&base).unwrap_or(dir);

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
            Component::ParentDir => {
                segments.pop();
            }
            _ => {}
        }
    }
    segments
}

/// Remote path segments of the album receiving the media files of `step`.
fn album_segments(target: &str, source: &str, step: &WalkStep) -> Vec<String> {
    let mut segments: Vec<String> = split_path(target)
        .into_iter()
        .chain(relative_segments(&step.dir, source))
        .map(|segment| normalize_name(&segment))
        .collect();
    if !step.dirs.is_empty() {
        if let Some(last) = segments.last().cloned() {
            segments.push(format!("Images from folder {}", last));
        }
    }
    segments
}

fn sync_folder(
    context: &Arc<SyncContext>,
    source: &str,
    step: WalkStep,
    matched: &[Arc<RemoteNode>],
) -> Result<(), SmugError> {
    if context.is_aborting() {
        return Ok(());
    }
    let mut media_files: Vec<&String> = step
        .files
        .iter()
        .filter(|file| context.media.is_media(file))
        .collect();
    if media_files.is_empty() {
        return Ok(());
    }

    let segments = album_segments(&context.target, source, &step);
    if segments.is_empty() {
        return Err(SmugError::InvalidPath(format!(
            "Can't upload files from \"{}\" to the root folder. Please sync to an album node.",
            step.dir.display()
        )));
    }

    let found = common_path(matched, &segments).ok_or_else(|| {
        SmugError::Other("Sync target has no root node.".to_string())
    })?;
    let mut found = match_nodes(found)?;
    if found.is_complete() {
        context.console.println(format!(
            "Found matching remote album \"{}\".",
            segments.join("/")
        ));
    } else {
        found = match_or_create_nodes(found, NodeKind::Album, context.privacy, context.depth_limit)?;
    }

    let album = found.last().clone();
    if album.kind() != NodeKind::Album {
        return Err(SmugError::RemoteData(format!(
            "Cannot sync files to \"{}\": it is a {}, not an album.",
            album.path(),
            album.kind()
        )));
    }

    media_files.sort();
    debug!(dir = %step.dir.display(), files = media_files.len(), "queueing files");
    for file in media_files {
        if context.is_aborting() {
            return Ok(());
        }
        let job_context = context.clone();
        let path = step.dir.join(file);
        let album = album.clone();
        context
            .file_pool
            .add(move || sync_file(&job_context, &path, &album));
    }
    Ok(())
}

fn sync_file(
    context: &Arc<SyncContext>,
    path: &Path,
    album: &Arc<RemoteNode>,
) -> Result<(), SmugError> {
    if context.is_aborting() {
        return Ok(());
    }
    let file_path = path.display().to_string();
    let _task = context
        .status
        .start_task(1, format!("* Syncing file \"{}\"...", file_path));

    let file_name = path
        .file_name()
        .map(|name| normalize_name(&name.to_string_lossy()))
        .unwrap_or_default();
    let content = fs::read(path)?;
    let remote = find_remote_match(album, &file_name)?;
    let replace = match decide(remote, path, &content, &context.media, &context.console)? {
        SyncDecision::Skip => return Ok(()),
        SyncDecision::Upload => None,
        SyncDecision::Replace(remote) => Some(remote),
    };
    if context.is_aborting() {
        return Ok(());
    }

    let task = UploadTask {
        album: album.clone(),
        replace,
        file_path,
        file_name,
        content,
        in_place: context.in_place,
    };
    let upload_context = context.clone();
    context.upload_pool.add(move || {
        upload_media(
            task,
            &upload_context.status,
            &upload_context.console,
            &upload_context.aborting,
        )
    });
    Ok(())
}
