use super::{Error, ObjectMeta, ObjectStore, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory object store used by test harnesses.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All live keys, in order. For test assertions.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| ObjectMeta {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_ordered() {
        let store = MemoryStore::new();
        for key in ["b/2", "a/1", "b/1", "ba"] {
            store.put(key, Bytes::from_static(b"xy")).await.unwrap();
        }

        let listed = store.list("b/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectMeta { key: "b/1".to_string(), size: 2 },
                ObjectMeta { key: "b/2".to_string(), size: 2 },
            ]
        );

        store.delete(&["b/1".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(store.keys(), vec!["a/1", "b/2", "ba"]);

        assert!(matches!(
            store.get("b/1").await,
            Err(Error::NotFound(_))
        ));
    }
}
