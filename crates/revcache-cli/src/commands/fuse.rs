use anyhow::Result;
use clap::Args;
use revcache::{FuseOptions, RevCache};

use super::open_repo;
use crate::Cli;

#[derive(Args)]
pub struct FuseArgs {
    /// Leave slices of at least this many bytes alone
    /// (25 MiB when the value is omitted)
    #[arg(
        long = "ignore-size",
        value_name = "BYTES",
        num_args = 0..=1,
        default_missing_value = "26214400"
    )]
    ignore_size: Option<u64>,
}

pub fn run(args: &FuseArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo(cli)?;
    let store = repo.odb();
    let mut cache = RevCache::open(&store, repo.rev_cache_dir())?;

    let opts = FuseOptions {
        ignore_size: args.ignore_size,
    };
    match cache.fuse(&opts)? {
        Some(outcome) => {
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            eprintln!("fused {} slices", outcome.fused);
            println!("{}", outcome.hash);
            Ok(0)
        }
        None => {
            println!("nothing to fuse");
            Ok(1)
        }
    }
}
