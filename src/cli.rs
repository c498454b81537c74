//! Command-line grammar, shared by the binary and the interactive shell.

use clap::{value_parser, Arg, ArgAction, Command};

const PRIVACY_VALUES: [&str; 3] = ["public", "private", "unlisted"];

const USER_HELP: &str =
    "User whose SmugMug account is to be accessed. Uses the logged-in user by default.";

/// Rewrites the short thread-count spellings (`-Ft`, `-ft`, `-ut`), which
/// clap can't express as short flags, to their long forms.
pub fn rewrite_legacy_flags<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| match arg.as_str() {
            "-Ft" => "--folder_threads".to_string(),
            "-ft" => "--file_threads".to_string(),
            "-ut" => "--upload_threads".to_string(),
            _ => arg,
        })
        .collect()
}

pub fn build_cli() -> Command {
    Command::new("smugsync")
        .about("Mirror local photo and video folders onto a SmugMug account")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Log diagnostics to stderr."),
        )
        .subcommand(
            Command::new("login")
                .about("Log into the SmugMug service")
                .long_about(
                    "Before using smugsync, run this command with a valid API key. Visit \
                     https://api.smugmug.com/api/developer/apply to generate your own key \
                     and secret.",
                )
                .arg(Arg::new("key").long("key").required(true).help("SmugMug API key"))
                .arg(
                    Arg::new("secret")
                        .long("secret")
                        .required(true)
                        .help("SmugMug API secret"),
                ),
        )
        .subcommand(Command::new("logout").about("Logout of the SmugMug service"))
        .subcommand(
            Command::new("get")
                .about("Do a GET request to SmugMug using the API V2 URL")
                .arg(
                    Arg::new("url")
                        .required(true)
                        .help("A SmugMug V2 API URL, as listed by `ls -l`"),
                ),
        )
        .subcommand(
            Command::new("ls")
                .about("List the content of a folder or album")
                .arg(Arg::new("path").default_value("/").help("Path to list."))
                .arg(
                    Arg::new("l")
                        .short('l')
                        .action(ArgAction::SetTrue)
                        .help("Show the full JSON description of the nodes listed."),
                )
                .arg(
                    Arg::new("query")
                        .short('q')
                        .long("query")
                        .value_name("JSON_POINTER")
                        .help("Print the value at this JSON pointer for each node, e.g. /Uri."),
                )
                .arg(user_arg()),
        )
        .subcommand(make_node_command("mkdir", "folder"))
        .subcommand(make_node_command("mkalbum", "album"))
        .subcommand(
            Command::new("rmdir")
                .about("Remove folders or albums if they are empty")
                .arg(
                    Arg::new("parents")
                        .short('p')
                        .long("parents")
                        .action(ArgAction::SetTrue)
                        .help("Remove parent folders as well if they are empty."),
                )
                .arg(user_arg())
                .arg(
                    Arg::new("dirs")
                        .required(true)
                        .num_args(1..)
                        .help("Folders or albums to remove."),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove files, albums or folders from SmugMug")
                .arg(user_arg())
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Do not prompt before deleting."),
                )
                .arg(
                    Arg::new("recursive")
                        .short('r')
                        .long("recursive")
                        .action(ArgAction::SetTrue)
                        .help("Also delete folders and albums that aren't empty."),
                )
                .arg(
                    Arg::new("paths")
                        .required(true)
                        .num_args(1..)
                        .help("Paths to remove."),
                ),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload files to a SmugMug album")
                .arg(
                    Arg::new("paths")
                        .required(true)
                        .num_args(2..)
                        .value_name("FILES... ALBUM")
                        .help("Files to upload (glob patterns allowed), then the album path."),
                )
                .arg(parents_arg("Create the album and its parents if they are missing."))
                .arg(privacy_arg())
                .arg(user_arg()),
        )
        .subcommand(
            Command::new("sync")
                .about("Synchronize local folders and files with SmugMug")
                .arg(
                    Arg::new("paths")
                        .num_args(0..)
                        .value_name("SOURCE... TARGET")
                        .help(
                            "Folders/files to recursively sync, then the SmugMug folder or \
                             album to sync them to (\"/\" by default). For sources ending \
                             with \"/\", the content of the folder is synced instead of \
                             the folder itself.",
                        ),
                )
                .arg(
                    Arg::new("deprecated_target")
                        .short('t')
                        .long("target")
                        .value_name("TARGET")
                        .help("DEPRECATED. Specify the target as the last positional argument."),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation before starting the sync."),
                )
                .arg(privacy_arg())
                .arg(user_arg())
                .arg(thread_arg("folder_threads", "Number of folders scanned in parallel."))
                .arg(thread_arg(
                    "file_threads",
                    "Number of files read and compared with SmugMug in parallel.",
                ))
                .arg(thread_arg("upload_threads", "Number of uploads running in parallel."))
                .arg(
                    Arg::new("set_defaults")
                        .long("set_defaults")
                        .action(ArgAction::SetTrue)
                        .help("Save the thread counts as defaults for the next runs."),
                )
                .arg(
                    Arg::new("in_place")
                        .long("in_place")
                        .action(ArgAction::SetTrue)
                        .help("Replace changed files in place instead of deleting them first."),
                ),
        )
        .subcommand(
            Command::new("ignore")
                .about("Mark paths to be ignored during sync")
                .arg(Arg::new("paths").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("include")
                .about("Mark paths to be included during sync again")
                .arg(Arg::new("paths").required(true).num_args(1..)),
        )
        .subcommand(Command::new("shell").about("Start smugsync in interactive shell mode"))
        .subcommand(Command::new("config").about("Create or update the configuration file"))
}

fn make_node_command(name: &'static str, kind: &str) -> Command {
    Command::new(name)
        .about(format!("Create a {}", kind))
        .arg(
            Arg::new("paths")
                .required(true)
                .num_args(1..)
                .help(format!("Paths of the {}s to create.", kind)),
        )
        .arg(parents_arg("Create parents if they are missing."))
        .arg(privacy_arg())
        .arg(user_arg())
}

fn user_arg() -> Arg {
    Arg::new("user").short('u').long("user").help(USER_HELP)
}

fn parents_arg(help: &'static str) -> Arg {
    Arg::new("parents")
        .short('p')
        .action(ArgAction::SetTrue)
        .help(help)
}

fn privacy_arg() -> Arg {
    Arg::new("privacy")
        .long("privacy")
        .value_parser(PRIVACY_VALUES)
        .default_value("public")
        .help("Access control for the created folders and albums.")
}

fn thread_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("N")
        .value_parser(value_parser!(usize))
        .help(help)
}
