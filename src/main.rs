//! gametrics - Show a Google Analytics metric inline in wiki pages
//!
//! Command-line front end standing in for the wiki's parser hook: fetches a
//! metric, expands markup in a page body, or purges expired cache entries.

use std::fs;
use std::io::{self, Read};

use clap::Parser;
use tracing::debug;

use gametrics::cli::{build_parser_function, open_cache, Cli, Command};
use gametrics::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging();

    let config = cli.load_config()?;
    let cache = open_cache(&config)?;
    debug!(cache_dir = %cache.dir().display(), "Using cache directory");

    if let Command::Purge = cli.command {
        let removed = cache.purge_expired()?;
        println!("{}", removed);
        return Ok(());
    }

    let function = build_parser_function(config, cache)?;

    match &cli.command {
        Command::Fetch { .. } => {
            let args = cli.invocation_args().unwrap_or_default();
            println!("{}", function.invoke(&args).await?);
        }
        Command::Render { file } => {
            let text = match file {
                Some(path) => fs::read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            print!("{}", function.expand(&text).await?);
        }
        Command::Purge => {}
    }

    Ok(())
}
