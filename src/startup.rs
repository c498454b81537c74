//! # Command Dispatch
//!
//! Builds the SmugMug client from the configuration folder, wires the abort
//! flag to termination signals and runs one command, or a shell reading
//! commands until `exit`.
//!
//! Errors raised by a command are printed through the console; only a
//! failure to install the signal handler reaches the caller.
use crate::api_client::{HttpTransport, NodeKind, Privacy, SmugError, SmugMug};
use crate::cli::{build_cli, rewrite_legacy_flags};
use crate::configuration::{create_config, load_settings, ConfigFolder, Settings};
use crate::foundation::console::Console;
use crate::foundation::media::MediaTypes;
use crate::foundation::persistent::PersistentDict;
use crate::foundation::utils::split_command_line;
use crate::process::{SmugFs, SyncOptions};
use clap::ArgMatches;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const SHELL_PROMPT: &str = "(smugmug) ";

/// Sets the abort flag when the command returns, so workers still running
/// stop picking up work.
struct AbortOnExit(Arc<AtomicBool>);

impl Drop for AbortOnExit {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct App {
    fs: SmugFs,
    settings: Settings,
    config_folder: ConfigFolder,
    console: Console,
}

pub fn run(config_folder: ConfigFolder, matches: &ArgMatches) -> anyhow::Result<()> {
    let console = Console::stdout();
    let Some((name, args)) = matches.subcommand() else {
        build_cli().print_help()?;
        return Ok(());
    };
    if name == "config" {
        if let Err(e) = create_config(&config_folder, &console) {
            console.println(e.to_string());
        }
        return Ok(());
    }

    let app = match App::new(config_folder, console.clone()) {
        Ok(app) => app,
        Err(e) => {
            console.println(e.to_string());
            return Ok(());
        }
    };

    let abort = app.fs.abort_flag();
    let handler_console = console.clone();
    ctrlc::set_handler(move || {
        handler_console.println("Aborting...");
        abort.store(true, Ordering::SeqCst);
    })?;
    let _abort_on_exit = AbortOnExit(app.fs.abort_flag());

    app.execute(name, args);
    Ok(())
}

impl App {
    pub fn new(config_folder: ConfigFolder, console: Console) -> Result<Self, SmugError> {
        let settings = load_settings(&config_folder)?;
        let state = Arc::new(PersistentDict::open(&config_folder.state_file)?);
        let transport = Arc::new(HttpTransport::new(&settings.api_settings, state.clone()));
        let smugmug = SmugMug::new(transport, state, console.clone(), settings.page_size);
        let media = MediaTypes::new(&settings.media_extensions, &settings.video_extensions);
        let fs = SmugFs::new(smugmug, media, settings.folder_depth_limit);
        Ok(Self {
            fs,
            settings,
            config_folder,
            console,
        })
    }

    /// Runs the subcommand `name`, printing any error it returns.
    pub fn execute(&self, name: &str, args: &ArgMatches) {
        debug!(command = name, "running command");
        if let Err(e) = self.dispatch(name, args) {
            match &e {
                SmugError::NotLoggedIn(_) => warn!("{}", e),
                _ => debug!("command failed: {:?}", e),
            }
            self.console.println(e.to_string());
        }
    }

    fn dispatch(&self, name: &str, args: &ArgMatches) -> Result<(), SmugError> {
        match name {
            "login" => self.fs.login(string(args, "key"), string(args, "secret")),
            "logout" => self.fs.logout(),
            "get" => self.fs.get(string(args, "url")),
            "ls" => self.fs.ls(
                user(args),
                string(args, "path"),
                args.get_flag("l"),
                args.get_one::<String>("query").map(String::as_str),
            ),
            "mkdir" | "mkalbum" => {
                let kind = if name == "mkdir" {
                    NodeKind::Folder
                } else {
                    NodeKind::Album
                };
                self.fs.make_node(
                    user(args),
                    &strings(args, "paths"),
                    args.get_flag("parents"),
                    kind,
                    privacy(args)?,
                )
            }
            "rmdir" => self
                .fs
                .rmdir(user(args), args.get_flag("parents"), &strings(args, "dirs")),
            "rm" => self.fs.rm(
                user(args),
                args.get_flag("force"),
                args.get_flag("recursive"),
                &strings(args, "paths"),
            ),
            "upload" => {
                let mut files = strings(args, "paths");
                let album = files.pop().unwrap_or_default();
                self.fs.upload(
                    user(args),
                    &files,
                    &album,
                    args.get_flag("parents"),
                    privacy(args)?,
                )
            }
            "sync" => self.fs.sync(self.sync_options(args)?),
            "ignore" => self.fs.ignore_or_include(&strings(args, "paths"), true),
            "include" => self.fs.ignore_or_include(&strings(args, "paths"), false),
            "shell" => {
                self.shell();
                Ok(())
            }
            "config" => create_config(&self.config_folder, &self.console),
            other => Err(SmugError::InvalidArgument(format!(
                "Unknown command \"{}\".",
                other
            ))),
        }
    }

    fn sync_options(&self, args: &ArgMatches) -> Result<SyncOptions, SmugError> {
        let threads = &self.settings.threads;
        Ok(SyncOptions {
            user: user(args).map(str::to_string),
            sources: strings(args, "paths"),
            target: None,
            deprecated_target: args.get_one::<String>("deprecated_target").cloned(),
            force: args.get_flag("force"),
            privacy: privacy(args)?,
            folder_threads: self.thread_count(args, "folder_threads", threads.folder),
            file_threads: self.thread_count(args, "file_threads", threads.file),
            upload_threads: self.thread_count(args, "upload_threads", threads.upload),
            set_defaults: args.get_flag("set_defaults"),
            in_place: args.get_flag("in_place"),
        })
    }

    /// The `name` flag, else the saved default, else the configured count.
    fn thread_count(&self, args: &ArgMatches, name: &str, configured: usize) -> usize {
        args.get_one::<usize>(name)
            .copied()
            .or_else(|| self.fs.smugmug().state().get::<usize>(name))
            .unwrap_or(configured)
    }

    /// Reads commands from the console until `exit`, `quit` or end of input.
    pub fn shell(&self) {
        self.console
            .println("Welcome to the SmugMug shell. Type help to list commands, exit to leave.");
        loop {
            let Ok(line) = self.console.prompt(SHELL_PROMPT) else {
                self.console.println("");
                break;
            };
            let words = match split_command_line(&line) {
                Ok(words) => words,
                Err(e) => {
                    self.console.println(format!("Command failed: {}", e));
                    continue;
                }
            };
            match words.first().map(String::as_str) {
                None => continue,
                Some("exit") | Some("quit") => break,
                Some("shell") => {
                    self.console.println("Already in the shell.");
                    continue;
                }
                Some("help") => {
                    self.console
                        .println(build_cli().no_binary_name(true).render_help().to_string());
                    continue;
                }
                Some(_) => {}
            }

            let parsed = build_cli()
                .no_binary_name(true)
                .try_get_matches_from(rewrite_legacy_flags(words));
            match parsed {
                Ok(matches) => {
                    if let Some((name, args)) = matches.subcommand() {
                        self.fs.reset_abort();
                        self.execute(name, args);
                    }
                }
                Err(e) => self.console.println(e.render().to_string()),
            }
        }
    }
}

fn string<'a>(args: &'a ArgMatches, name: &str) -> &'a str {
    args.get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn strings(args: &ArgMatches, name: &str) -> Vec<String> {
    args.get_many::<String>(name)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn user(args: &ArgMatches) -> Option<&str> {
    args.get_one::<String>("user")
        .map(String::as_str)
        .filter(|user| !user.is_empty())
}

fn privacy(args: &ArgMatches) -> Result<Privacy, SmugError> {
    string(args, "privacy").parse()
}
