//! Command-line driver for the feed server.
//!
//! `twitter` with no arguments runs the sequential driver; `twitter
//! <workers> <block>` spawns a worker pool of that size draining the
//! queue in blocks of that size. Any other invocation prints a usage
//! message and exits cleanly — this thin argument dispatch, the line
//! scanner, and the JSON encoding are the external collaborators named as
//! out of scope for the concurrency core itself.

use std::io::{self, BufReader};
use std::process::ExitCode;
use std::sync::Arc;
use twitter_feed::error::CliError;
use twitter_feed::feed::Feed;
use twitter_feed::{run_concurrent, run_sequential};

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage) => {
            println!("{}", CliError::Usage);
            ExitCode::SUCCESS
        }
        Err(CliError::Io(e)) => {
            log::error!("fatal I/O error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let feed = Arc::new(Feed::new());
    let stdin = io::stdin();
    let stdout = io::stdout();

    match args.as_slice() {
        [] => run_sequential(&feed, BufReader::new(stdin.lock()), stdout.lock())?,
        [workers, block] => {
            let workers: usize = workers.parse().map_err(|_| CliError::Usage)?;
            let block: usize = block.parse().map_err(|_| CliError::Usage)?;
            if workers == 0 || block == 0 {
                return Err(CliError::Usage);
            }
            run_concurrent(
                feed,
                workers,
                block,
                BufReader::new(stdin.lock()),
                stdout,
            )?;
        }
        _ => return Err(CliError::Usage),
    }

    Ok(())
}
