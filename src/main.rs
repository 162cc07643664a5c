// remate: open a local file in a remote editor over TCP, then persist the
// save events the editor streams back until it closes the session.

use anyhow::{Context, Result};
use log::info;
use remate::session::{client, config, lock, sink};

fn print_help() {
    println!(
        r#"remate - open a local file in a remote editor

USAGE:
    remate [OPTIONS] <file> [more files are ignored]

OPTIONS:
    -H, --host <host>     Editor host (default: localhost, env: REMATE_HOST)
    -p, --port <port>     Editor port (default: 52698, env: REMATE_PORT)
    -m, --name <name>     Display name shown by the editor
    -f, --force           Take over a session that already has the file open
    -w, --wait            Accepted for compatibility; remate always waits
    -n, --new-window      Accepted for compatibility
    -t, --type <ft>       Accepted for compatibility
    -l, --line <n>        Accepted for compatibility
        --minimal-headers Send the minimal open-frame header set
    -v, --verbose         Log progress to stderr
    -h, --help            Show this help message

Only one file is edited per session; extra paths are ignored. If another
remate instance already has the file open, remate exits quietly with
status 0 unless --force is given.
"#
    );
}

fn configure_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Off
    });
    builder.format_timestamp_secs();
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match config::Config::parse(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run 'remate --help' for usage.");
            std::process::exit(1);
        }
    };

    if config.help {
        print_help();
        return Ok(());
    }

    configure_logging(config.verbose);

    let Some(target) = config.files.first().cloned() else {
        eprintln!("Error: no file path provided.");
        print_help();
        std::process::exit(1);
    };
    if config.files.len() > 1 {
        info!(
            "multiple files given, only {} will be opened",
            target.display()
        );
    }

    sink::ensure_file_exists(&target)
        .with_context(|| format!("failed to prepare {}", target.display()))?;

    let lock_dir = config::lock_dir();
    let mut lock = match lock::acquire(&target, config.force, &lock_dir) {
        Ok(lock) => lock,
        Err(e) if e.is_already_running() => {
            info!("{e}, exiting");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to acquire instance lock"),
    };

    let result = client::run_session(&config, &target).await;

    // Teardown order: the session closed its connection already; the lock
    // goes last, on every exit path.
    lock.release();
    result
}
