use std::collections::HashMap;

use revcache_hash::ObjectId;
use revcache_object::{Object, ObjectType};

use crate::{ObjectStore, StoreError};

/// An in-memory object store keyed by id.
///
/// Objects are stored as canonical content bytes so sizes and re-parses
/// behave exactly like an on-disk store. Used by the test suites and
/// useful for embedding.
#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<ObjectId, (ObjectType, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, returning its computed id.
    pub fn insert(&mut self, obj: &Object) -> ObjectId {
        let oid = obj.id();
        self.objects
            .insert(oid, (obj.object_type(), obj.serialize()));
        oid
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn contains(&self, oid: &ObjectId) -> bool {
        self.objects.contains_key(oid)
    }

    fn read(&self, oid: &ObjectId) -> Result<Option<Object>, StoreError> {
        match self.objects.get(oid) {
            Some((obj_type, content)) => {
                Ok(Some(Object::parse_content(*obj_type, content)?))
            }
            None => Ok(None),
        }
    }

    fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, u64)>, StoreError> {
        Ok(self
            .objects
            .get(oid)
            .map(|(obj_type, content)| (*obj_type, content.len() as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revcache_object::Blob;

    #[test]
    fn insert_and_read_back() {
        let mut store = MemoryStore::new();
        let oid = store.insert(&Object::Blob(Blob::new(b"hello".to_vec())));

        assert!(store.contains(&oid));
        let obj = store.read(&oid).unwrap().unwrap();
        assert_eq!(obj.id(), oid);
        assert_eq!(store.read_header(&oid).unwrap(), Some((ObjectType::Blob, 5)));
    }

    #[test]
    fn missing_object_reads_none() {
        let store = MemoryStore::new();
        assert!(!store.contains(&ObjectId::NULL));
        assert!(store.read(&ObjectId::NULL).unwrap().is_none());
        assert!(store.read_header(&ObjectId::NULL).unwrap().is_none());
    }
}
