use std::io::BufRead;

use anyhow::{bail, Result};
use clap::Args;
use revcache::{GenerateOptions, RevCache};
use revcache_store::ObjectStore;

use super::{all_ref_commits, open_repo, parse_revision_list};
use crate::Cli;

#[derive(Args)]
pub struct AddArgs {
    /// Cache everything reachable from any ref
    #[arg(long)]
    all: bool,

    /// Exclude history already covered by a slice
    #[arg(long)]
    fresh: bool,

    /// Also read revisions from stdin (same form as the command line)
    #[arg(long)]
    stdin: bool,

    /// Extend the boundary until every parent set is uniform
    #[arg(long)]
    legs: bool,

    /// Record commits only, no tree or blob entries
    #[arg(long)]
    noobjects: bool,

    /// Revisions to cache; `--not` flips polarity for what follows
    #[arg(value_name = "REVISION", allow_hyphen_values = true)]
    revisions: Vec<String>,
}

pub fn run(args: &AddArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo(cli)?;
    let store = repo.odb();
    let refs = repo.refs();

    let mut starts = Vec::new();
    let mut ends = Vec::new();
    parse_revision_list(&store, &refs, &args.revisions, &mut starts, &mut ends)?;

    if args.stdin {
        let stdin = std::io::stdin();
        let mut words = Vec::new();
        for line in stdin.lock().lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            words.push(line.to_string());
        }
        parse_revision_list(&store, &refs, &words, &mut starts, &mut ends)?;
    }

    if args.all {
        starts.extend(all_ref_commits(&store, &refs)?);
    }

    let mut cache = RevCache::open(&store, repo.rev_cache_dir())?;

    if args.fresh {
        for id in cache.index().starts_in(&[]) {
            if store.contains(&id) {
                ends.push(id);
            }
        }
    }

    if starts.is_empty() {
        bail!("no revisions to cache");
    }

    let opts = GenerateOptions {
        objects: !args.noobjects,
        legs: args.legs,
        ..GenerateOptions::default()
    };
    let outcome = cache.make_slice(&starts, &ends, &opts)?;

    eprintln!("objects: {}", outcome.object_nr);
    eprintln!("paths: {}", outcome.path_nr);
    println!("{}", outcome.hash);

    Ok(0)
}
