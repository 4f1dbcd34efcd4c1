use std::cmp::Ordering;

use revcache_hash::ObjectId;
use revcache_object::TreeEntry;
use revcache_store::{read_tree, ObjectStore};

use crate::WalkError;

/// Collect the objects that exist on the new side of a tree-to-tree diff:
/// additions and the new-side hashes of changed entries, recursively.
///
/// Added directories are emitted as objects themselves and their whole
/// closure follows; changed directories are emitted and descended.
/// Deletions and gitlink entries are ignored.
pub fn new_side_objects(
    store: &dyn ObjectStore,
    old_tree: &ObjectId,
    new_tree: &ObjectId,
    out: &mut Vec<ObjectId>,
) -> Result<(), WalkError> {
    if old_tree == new_tree {
        return Ok(());
    }
    let old = read_tree(store, old_tree)?;
    let new = read_tree(store, new_tree)?;
    diff_entries(store, &old.entries, &new.entries, out)
}

/// Collect every tree and blob reachable beneath `tree`, excluding the
/// tree itself. Used for commits with no parents, where everything is
/// new.
pub fn tree_closure(
    store: &dyn ObjectStore,
    tree: &ObjectId,
    out: &mut Vec<ObjectId>,
) -> Result<(), WalkError> {
    let tree = read_tree(store, tree)?;
    for entry in &tree.entries {
        if entry.mode.is_gitlink() {
            continue;
        }
        out.push(entry.oid);
        if entry.mode.is_tree() {
            tree_closure(store, &entry.oid, out)?;
        }
    }
    Ok(())
}

fn diff_entries(
    store: &dyn ObjectStore,
    old_entries: &[TreeEntry],
    new_entries: &[TreeEntry],
    out: &mut Vec<ObjectId>,
) -> Result<(), WalkError> {
    let mut oi = 0;
    let mut ni = 0;

    while oi < old_entries.len() || ni < new_entries.len() {
        match (old_entries.get(oi), new_entries.get(ni)) {
            (Some(old), Some(new)) => match TreeEntry::cmp_entries(old, new) {
                Ordering::Less => {
                    // Deleted; nothing new on this side.
                    oi += 1;
                }
                Ordering::Greater => {
                    record_added(store, new, out)?;
                    ni += 1;
                }
                Ordering::Equal => {
                    if old.oid != new.oid {
                        record_changed(store, old, new, out)?;
                    }
                    oi += 1;
                    ni += 1;
                }
            },
            (Some(_), None) => {
                oi += 1;
            }
            (None, Some(new)) => {
                record_added(store, new, out)?;
                ni += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    Ok(())
}

fn record_added(
    store: &dyn ObjectStore,
    entry: &TreeEntry,
    out: &mut Vec<ObjectId>,
) -> Result<(), WalkError> {
    if entry.mode.is_gitlink() {
        return Ok(());
    }
    out.push(entry.oid);
    if entry.mode.is_tree() {
        tree_closure(store, &entry.oid, out)?;
    }
    Ok(())
}

fn record_changed(
    store: &dyn ObjectStore,
    old: &TreeEntry,
    new: &TreeEntry,
    out: &mut Vec<ObjectId>,
) -> Result<(), WalkError> {
    if new.mode.is_gitlink() {
        return Ok(());
    }
    out.push(new.oid);
    if new.mode.is_tree() {
        if old.mode.is_tree() && !old.mode.is_gitlink() {
            let old_tree = read_tree(store, &old.oid)?;
            let new_tree = read_tree(store, &new.oid)?;
            diff_entries(store, &old_tree.entries, &new_tree.entries, out)?;
        } else {
            // Type change: the whole new directory is fresh.
            tree_closure(store, &new.oid, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use revcache_object::{Blob, FileMode, Object, Tree};
    use revcache_store::MemoryStore;

    fn blob(store: &mut MemoryStore, data: &[u8]) -> ObjectId {
        store.insert(&Object::Blob(Blob::new(data.to_vec())))
    }

    fn tree(store: &mut MemoryStore, entries: Vec<(FileMode, &str, ObjectId)>) -> ObjectId {
        store.insert(&Object::Tree(Tree {
            entries: entries
                .into_iter()
                .map(|(mode, name, oid)| TreeEntry {
                    mode,
                    name: BString::from(name),
                    oid,
                })
                .collect(),
        }))
    }

    #[test]
    fn addition_is_recorded_with_closure() {
        let mut store = MemoryStore::new();
        let old_blob = blob(&mut store, b"one");
        let new_blob = blob(&mut store, b"two");
        let sub = tree(&mut store, vec![(FileMode::Regular, "inner", new_blob)]);

        let old = tree(&mut store, vec![(FileMode::Regular, "a", old_blob)]);
        let new = tree(
            &mut store,
            vec![
                (FileMode::Regular, "a", old_blob),
                (FileMode::Tree, "dir", sub),
            ],
        );

        let mut out = Vec::new();
        new_side_objects(&store, &old, &new, &mut out).unwrap();
        out.sort();
        let mut expected = vec![sub, new_blob];
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn modification_records_new_side_only() {
        let mut store = MemoryStore::new();
        let v1 = blob(&mut store, b"v1");
        let v2 = blob(&mut store, b"v2");
        let old = tree(&mut store, vec![(FileMode::Regular, "f", v1)]);
        let new = tree(&mut store, vec![(FileMode::Regular, "f", v2)]);

        let mut out = Vec::new();
        new_side_objects(&store, &old, &new, &mut out).unwrap();
        assert_eq!(out, vec![v2]);
    }

    #[test]
    fn deletion_records_nothing() {
        let mut store = MemoryStore::new();
        let v1 = blob(&mut store, b"v1");
        let old = tree(&mut store, vec![(FileMode::Regular, "f", v1)]);
        let new = tree(&mut store, vec![]);

        let mut out = Vec::new();
        new_side_objects(&store, &old, &new, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn changed_directory_is_emitted_and_descended() {
        let mut store = MemoryStore::new();
        let v1 = blob(&mut store, b"v1");
        let v2 = blob(&mut store, b"v2");
        let sub_old = tree(&mut store, vec![(FileMode::Regular, "f", v1)]);
        let sub_new = tree(&mut store, vec![(FileMode::Regular, "f", v2)]);
        let old = tree(&mut store, vec![(FileMode::Tree, "d", sub_old)]);
        let new = tree(&mut store, vec![(FileMode::Tree, "d", sub_new)]);

        let mut out = Vec::new();
        new_side_objects(&store, &old, &new, &mut out).unwrap();
        out.sort();
        let mut expected = vec![sub_new, v2];
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn identical_trees_diff_empty() {
        let mut store = MemoryStore::new();
        let v1 = blob(&mut store, b"v1");
        let t = tree(&mut store, vec![(FileMode::Regular, "f", v1)]);

        let mut out = Vec::new();
        new_side_objects(&store, &t, &t, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn closure_lists_everything_beneath() {
        let mut store = MemoryStore::new();
        let b1 = blob(&mut store, b"1");
        let b2 = blob(&mut store, b"2");
        let sub = tree(&mut store, vec![(FileMode::Regular, "y", b2)]);
        let root = tree(
            &mut store,
            vec![(FileMode::Regular, "x", b1), (FileMode::Tree, "d", sub)],
        );

        let mut out = Vec::new();
        tree_closure(&store, &root, &mut out).unwrap();
        out.sort();
        let mut expected = vec![b1, b2, sub];
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn gitlinks_are_skipped() {
        let mut store = MemoryStore::new();
        let fake = ObjectId::from_hex("9999999999999999999999999999999999999999").unwrap();
        let old = tree(&mut store, vec![]);
        let new = tree(&mut store, vec![(FileMode::Gitlink, "sub", fake)]);

        let mut out = Vec::new();
        new_side_objects(&store, &old, &new, &mut out).unwrap();
        assert!(out.is_empty());
    }
}
