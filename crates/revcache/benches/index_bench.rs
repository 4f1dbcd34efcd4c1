use criterion::{black_box, criterion_group, criterion_main, Criterion};
use revcache::codec::{ObjectEntry, SliceHeader, SLICE_HEADER_LEN, SLICE_VERSION};
use revcache::CacheIndex;
use revcache_hash::{Hasher, ObjectId};
use revcache_object::ObjectType;

/// Build a synthetic slice holding `count` commit entries with
/// well-scattered ids.
fn synthetic_slice(count: u32) -> (ObjectId, Vec<u8>, Vec<ObjectId>) {
    let mut body = Vec::new();
    let mut ids = Vec::with_capacity(count as usize);
    for n in 0..count {
        let id = Hasher::digest(&n.to_be_bytes());
        ids.push(id);
        ObjectEntry {
            id,
            kind: ObjectType::Commit,
            is_start: n == 0,
            is_end: false,
            uninteresting: false,
            date: n,
            path: 1,
            merge_paths: vec![],
            split_paths: vec![],
            size: 200,
        }
        .encode(&mut body)
        .unwrap();
    }
    let hash = Hasher::digest(b"bench slice");
    let head = SliceHeader {
        version: SLICE_VERSION,
        ofs_objects: SLICE_HEADER_LEN as u32,
        object_nr: count,
        size: (SLICE_HEADER_LEN + body.len()) as u32,
        path_nr: 2,
        hash,
    };
    let mut data = head.encode().to_vec();
    data.extend_from_slice(&body);
    (hash, data, ids)
}

fn bench_lookup(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut index = CacheIndex::open(dir.path()).unwrap();
    let (hash, data, ids) = synthetic_slice(50_000);
    index.append_slice(&hash, &data, false).unwrap();

    let present = ids[ids.len() / 2];
    let absent = Hasher::digest(b"never inserted");

    c.bench_function("index_lookup_hit", |b| {
        b.iter(|| black_box(index.lookup(black_box(&present))))
    });
    c.bench_function("index_lookup_miss", |b| {
        b.iter(|| black_box(index.lookup(black_box(&absent))))
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
