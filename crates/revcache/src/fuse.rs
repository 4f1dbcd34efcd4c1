//! Coalescing many small slices into one.
//!
//! The fusable slices contribute their start commits as interesting
//! seeds; pointer files and slices above the size threshold are left
//! alone but contribute their starts as UNINTERESTING seeds so the
//! fused slice does not re-cover their territory. Generation runs with
//! verbatim reuse of the sources' object runs, the index is rebuilt
//! with the inputs excluded, and only then are the inputs deleted.

use std::fs;
use std::io::Read;
use std::path::Path;

use revcache_hash::ObjectId;
use revcache_store::ObjectStore;
use revcache_walk::BoundaryWalk;

use crate::codec::POINTER_SIGNATURE;
use crate::generate::{self, FuseReuse, GenerateOptions};
use crate::index::CacheIndex;
use crate::slice::SliceFile;
use crate::CacheError;

/// Knobs for a fuse run.
#[derive(Debug, Clone, Default)]
pub struct FuseOptions {
    /// Leave slices of at least this many bytes alone.
    pub ignore_size: Option<u64>,
}

/// What a fuse run produced.
#[derive(Debug)]
pub struct FuseOutcome {
    /// Hash of the fused slice.
    pub hash: ObjectId,
    /// Input slices consumed and deleted.
    pub fused: usize,
    /// Non-fatal reports (unreadable files, skipped seeds).
    pub warnings: Vec<String>,
}

pub(crate) fn fuse_slices(
    store: &dyn ObjectStore,
    dir: &Path,
    index: &mut CacheIndex,
    opts: &FuseOptions,
) -> Result<Option<FuseOutcome>, CacheError> {
    let mut warnings = Vec::new();

    // Partition the cache directory into fusable and kept slices.
    let mut fusable: Vec<ObjectId> = Vec::new();
    let mut kept: Vec<ObjectId> = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(hash) = ObjectId::from_hex(name) else { continue };

        if is_pointer(&dirent.path()) {
            kept.push(hash);
        } else if opts
            .ignore_size
            .is_some_and(|limit| dirent.metadata().map_or(false, |m| m.len() >= limit))
        {
            kept.push(hash);
        } else {
            fusable.push(hash);
        }
    }
    fusable.sort();
    if fusable.len() <= 1 {
        return Ok(None);
    }

    // Seeds come from the index: starts of the fusable slices walk
    // forward, starts of the kept slices bound the walk.
    let mut starts = index.starts_in(&fusable);
    starts.retain(|id| {
        let present = store.contains(id);
        if !present {
            warnings.push(format!("start commit {id} missing from the object store"));
        }
        present
    });
    let mut bounds = index.starts_in(&kept);
    bounds.retain(|id| store.contains(id));

    let walk = BoundaryWalk::new(store, &starts, &bounds)?;

    // Map the sources by their index position for verbatim reuse.
    let mut sources: Vec<Option<SliceFile>> = Vec::new();
    for hash in index.slices() {
        if fusable.contains(hash) {
            match SliceFile::open(dir, hash) {
                Ok(slice) => sources.push(Some(slice)),
                Err(e) => {
                    warnings.push(format!("cannot reuse slice {hash}: {e}"));
                    sources.push(None);
                }
            }
        } else {
            sources.push(None);
        }
    }
    let mut reuse = FuseReuse::new(sources);

    let gen_opts = GenerateOptions {
        objects: true,
        legs: false,
        make_index: false,
        overwrite_all: false,
    };
    let outcome = generate::write_slice(store, dir, index, &walk, &gen_opts, Some(&mut reuse))?;
    drop(reuse);

    // Commit the replacement index before touching the inputs. Should
    // the fused hash collide with an input, that file now *is* the
    // fused slice and must survive both steps.
    let exclude: Vec<ObjectId> = fusable
        .iter()
        .filter(|h| **h != outcome.hash)
        .copied()
        .collect();
    let regen = index.regenerate(dir, &exclude)?;
    warnings.extend(regen.warnings);

    let mut fused = 0;
    for hash in &exclude {
        match fs::remove_file(dir.join(hash.to_hex())) {
            Ok(()) => fused += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warnings.push(format!("cannot remove fused slice {hash}: {e}")),
        }
    }

    Ok(Some(FuseOutcome {
        hash: outcome.hash,
        fused,
        warnings,
    }))
}

fn is_pointer(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut signature = [0u8; 8];
    file.read_exact(&mut signature).is_ok() && signature == *POINTER_SIGNATURE
}
