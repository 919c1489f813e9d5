//! Generate corpora of randomly-filled test objects.
use rand::prelude::*;
use sha2::Digest;
use std::collections::HashMap;

/// Spec for one test object: a key and a size.
#[derive(Clone, Debug)]
pub struct TestObject {
    pub key: String,
    pub size: usize,
}

impl TestObject {
    /// Make a new test object spec with the size specified as a string so we can use
    /// human-friendly units like "10 KB" or "20 MiB"
    pub fn new(key: impl Into<String>, size: impl AsRef<str>) -> Self {
        let size = byte_unit::Byte::from_str(size.as_ref()).unwrap();

        Self {
            key: key.into(),
            size: size.get_bytes() as usize,
        }
    }
}

/// The same test object spec as in [`TestObject`], but with generated data and its hash.
#[derive(Clone, Debug)]
pub struct TestObjectWithData {
    pub key: String,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

/// Generate random contents for each test object spec, keyed by object key.
pub fn make_test_data(
    objects: impl IntoIterator<Item = TestObject>,
) -> HashMap<String, TestObjectWithData> {
    let mut rng = rand::thread_rng();
    let mut test_objects = HashMap::new();

    for object in objects {
        let mut data = vec![0u8; object.size];
        rng.fill_bytes(&mut data);

        let mut hasher = sha2::Sha256::new();
        hasher.update(&data);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());

        let key = object.key;
        let object = TestObjectWithData {
            key: key.clone(),
            data,
            hash,
        };
        assert!(
            test_objects.insert(key.clone(), object).is_none(),
            "BUG: test data contains the same key '{}' more than once",
            key
        );
    }

    test_objects
}

/// Hash arbitrary bytes the same way [`make_test_data`] does, for comparisons.
pub fn hash_of(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}
