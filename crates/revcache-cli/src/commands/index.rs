use anyhow::Result;
use clap::Args;
use revcache::RevCache;

use super::open_repo;
use crate::Cli;

#[derive(Args)]
pub struct IndexArgs {}

pub fn run(_args: &IndexArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo(cli)?;
    let store = repo.odb();
    let mut cache = RevCache::open(&store, repo.rev_cache_dir())?;

    let outcome = cache.regenerate_index()?;
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    println!(
        "indexed {} slices, {} commits",
        outcome.slices,
        cache.index().len()
    );

    Ok(0)
}
