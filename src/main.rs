use smugsync::cli::{build_cli, rewrite_legacy_flags};
use smugsync::configuration::ConfigFolder;
use smugsync::startup::run;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches_from(rewrite_legacy_flags(std::env::args()));
    init_tracing(matches.get_flag("verbose"));

    let cfg_folder = ConfigFolder::new()?;
    run(cfg_folder, &matches)
}

/// Diagnostics go to stderr, filtered by `SMUGSYNC_LOG` (`warn` by default,
/// `debug` with `-v`).
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SMUGSYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
