use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{now_ms, LocalStore, Record, StoreError};

/// Root namespace all collections live under.
const DB_ROOT: &str = "local-database";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Collection-oriented facade over [`LocalStore`].
///
/// A collection is just a directory of records; ids are file stems. `save`
/// without an id generates one from the clock plus a short random suffix —
/// collisions are possible in principle and accepted; callers that need
/// guaranteed uniqueness supply their own ids.
#[derive(Clone)]
pub struct DocStore {
    store: LocalStore,
}

impl DocStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn find_all<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<Record<T>>, StoreError> {
        self.store
            .list_collection(&format!("{DB_ROOT}/{collection}"))
    }

    pub fn find_by_id<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Option<T> {
        self.store.get(&format!("{DB_ROOT}/{collection}/{id}"))
    }

    /// Persist `value`; generates an id when none is given and returns the
    /// id actually used.
    pub fn save<T: Serialize>(
        &self,
        collection: &str,
        id: Option<&str>,
        value: &T,
    ) -> Result<String, StoreError> {
        if collection.is_empty() {
            return Err(StoreError::InvalidArgument("collection name required".into()));
        }
        let id = match id {
            Some(id) => id.to_string(),
            None => generate_id(),
        };
        self.store
            .put(&format!("{DB_ROOT}/{collection}/{id}"), value)?;
        Ok(id)
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if collection.is_empty() || id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "collection name and id required".into(),
            ));
        }
        self.store.delete(&format!("{DB_ROOT}/{collection}/{id}"))
    }
}

/// `base36(now_ms)` plus `-` plus 4 random base36 chars.
fn generate_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| BASE36[rng.random_range(0..36)] as char)
        .collect();
    format!("{}-{suffix}", to_base36(now_ms()))
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 digits are ascii")
}
