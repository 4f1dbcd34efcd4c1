pub mod add;
pub mod fuse;
pub mod index;
pub mod walk;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use revcache_hash::ObjectId;
use revcache_store::{peel_to_commit, LooseStore, RefStore, Repository};

use crate::Cli;

#[derive(Subcommand)]
pub enum Commands {
    /// Cache revisions into a new slice
    Add(add::AddArgs),
    /// Replay a cache slice for a set of commits
    Walk(walk::WalkArgs),
    /// Coalesce small slices into one
    Fuse(fuse::FuseArgs),
    /// Rebuild the slice index from the files on disk
    Index(index::IndexArgs),
}

pub fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Add(args) => add::run(args, &cli),
        Commands::Walk(args) => walk::run(args, &cli),
        Commands::Fuse(args) => fuse::run(args, &cli),
        Commands::Index(args) => index::run(args, &cli),
    }
}

pub fn open_repo(_cli: &Cli) -> Result<Repository> {
    let cwd = std::env::current_dir()?;
    Ok(Repository::discover(&cwd)?)
}

/// Resolve a revision argument to a commit id, peeling tags.
pub fn resolve_commit(store: &LooseStore, refs: &RefStore, name: &str) -> Result<ObjectId> {
    let oid = refs
        .resolve(name)?
        .ok_or_else(|| anyhow!("unknown revision '{name}'"))?;
    Ok(peel_to_commit(store, &oid)?)
}

/// Parse a revision word list the way the porcelain reads arguments:
/// `--not` flips the polarity for everything that follows.
pub fn parse_revision_list(
    store: &LooseStore,
    refs: &RefStore,
    words: &[String],
    starts: &mut Vec<ObjectId>,
    ends: &mut Vec<ObjectId>,
) -> Result<()> {
    let mut negated = false;
    for word in words {
        if word == "--not" {
            negated = !negated;
            continue;
        }
        let id = if let Some(stripped) = word.strip_prefix('^') {
            ends.push(resolve_commit(store, refs, stripped)?);
            continue;
        } else {
            resolve_commit(store, refs, word)?
        };
        if negated {
            ends.push(id);
        } else {
            starts.push(id);
        }
    }
    Ok(())
}

/// Every ref that peels to a commit, for `--all`.
pub fn all_ref_commits(store: &LooseStore, refs: &RefStore) -> Result<Vec<ObjectId>> {
    let mut commits = Vec::new();
    for (_, oid) in refs.iter_all()? {
        if let Ok(commit) = peel_to_commit(store, &oid) {
            commits.push(commit);
        }
    }
    commits.sort();
    commits.dedup();
    Ok(commits)
}
