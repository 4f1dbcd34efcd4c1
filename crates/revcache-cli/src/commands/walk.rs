use anyhow::{anyhow, bail, Result};
use clap::Args;
use revcache::{push_work, ReplayOptions, ReplayState, RevCache, WorkItem};
use revcache_hash::ObjectId;
use revcache_store::read_commit;

use super::{open_repo, parse_revision_list};
use crate::Cli;

#[derive(Args)]
pub struct WalkArgs {
    /// Also report tree and blob objects
    #[arg(long)]
    objects: bool,

    /// Revisions to replay; `--not` flips polarity for what follows
    #[arg(value_name = "REVISION", allow_hyphen_values = true)]
    revisions: Vec<String>,
}

pub fn run(args: &WalkArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo(cli)?;
    let store = repo.odb();
    let refs = repo.refs();

    let mut starts = Vec::new();
    let mut ends = Vec::new();
    parse_revision_list(&store, &refs, &args.revisions, &mut starts, &mut ends)?;
    if starts.is_empty() {
        bail!("nothing to traverse");
    }

    let cache = RevCache::open(&store, repo.rev_cache_dir())?;

    // The porcelain replays one slice: every named commit must be
    // covered by the same one.
    let mut slice_hash: Option<ObjectId> = None;
    let mut work: Vec<WorkItem> = Vec::new();
    for (id, uninteresting) in starts
        .iter()
        .map(|id| (*id, false))
        .chain(ends.iter().map(|id| (*id, true)))
    {
        let date = read_commit(&store, &id)?.date().clamp(0, u32::MAX as i64) as u32;
        let covering = cache
            .slice_for(&id, date)
            .ok_or_else(|| anyhow!("{id}: not in a cache slice"))?;
        match slice_hash {
            None => slice_hash = Some(covering),
            Some(existing) if existing != covering => {
                bail!("commits are spread over several cache slices")
            }
            _ => {}
        }
        push_work(&mut work, WorkItem { id, date, uninteresting });
    }
    let slice_hash = slice_hash.ok_or_else(|| anyhow!("nothing to traverse"))?;

    // Seed from the newest interesting commit; the rest transfers in
    // during setup.
    let seed_at = work
        .iter()
        .position(|w| !w.uninteresting)
        .ok_or_else(|| anyhow!("nothing to traverse"))?;
    let seed = work.remove(seed_at).id;

    let slice = cache.open_slice(&slice_hash)?;
    let mut state = ReplayState::new();
    let opts = ReplayOptions {
        trees: args.objects,
        blobs: args.objects,
        ..ReplayOptions::default()
    };
    cache.replay(&slice, &seed, &mut state, &mut work, &opts)?;

    println!("queue:");
    for id in &state.queue {
        println!("{id}");
    }
    println!("work:");
    for item in &work {
        println!("{}", item.id);
    }
    if args.objects {
        println!("objects:");
        for object in &state.objects {
            println!("{} {}", object.id, object.kind);
        }
    }

    Ok(0)
}
