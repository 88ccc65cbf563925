//! In-memory document store
//!
//! One async mutex over a flat map. Every operation holds the lock for its
//! full duration, so increments and transactions are linearized across all
//! callers in the process. Used by tests and the CLI demo; a production
//! deployment plugs a real backend into the same trait.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use super::patch::{apply_patch, get_path};
use super::{DocId, Document, DocumentStore, Patch, Query, SortDir, StoreError, TxnAction, TxnFn};

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents (test helper).
    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(&id.path()).cloned())
    }

    async fn create(&self, id: &DocId, doc: Document) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        let key = id.path();
        if docs.contains_key(&key) {
            return Err(StoreError::AlreadyExists { id: key });
        }
        docs.insert(key, doc);
        Ok(())
    }

    async fn update(&self, id: &DocId, patch: Patch) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        let key = id.path();
        let doc = docs
            .get_mut(&key)
            .ok_or(StoreError::NotFound { id: key })?;
        apply_patch(doc, &patch)
    }

    async fn delete(&self, id: &DocId) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        docs.remove(&id.path());
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<Vec<(DocId, Document)>, StoreError> {
        let docs = self.docs.lock().await;
        let prefix = format!("{}/", query.collection_name());

        let mut results: Vec<(DocId, Document)> = docs
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, doc)| {
                query
                    .filters()
                    .iter()
                    .all(|(path, expected)| get_path(doc, path) == Some(expected))
            })
            .map(|(key, doc)| {
                let id = &key[prefix.len()..];
                (DocId::new(query.collection_name(), id), doc.clone())
            })
            .collect();

        if let Some((path, dir)) = query.order() {
            results.sort_by(|(_, a), (_, b)| {
                let av = numeric(a, path);
                let bv = numeric(b, path);
                let ord = av.total_cmp(&bv);
                match dir {
                    SortDir::Asc => ord,
                    SortDir::Desc => ord.reverse(),
                }
            });
        } else {
            // Stable output for unordered scans
            results.sort_by(|(a, _), (b, _)| a.id().cmp(b.id()));
        }

        if let Some(limit) = query.limit_value() {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn transact(&self, id: &DocId, op: TxnFn) -> Result<Document, StoreError> {
        let mut docs = self.docs.lock().await;
        let key = id.path();

        let action = op(docs.get(&key)).map_err(|abort| StoreError::TxnAborted {
            code: abort.code.to_string(),
            message: abort.message,
        })?;

        match action {
            TxnAction::Create(doc) => {
                if docs.contains_key(&key) {
                    return Err(StoreError::AlreadyExists { id: key });
                }
                docs.insert(key, doc.clone());
                Ok(doc)
            }
            TxnAction::Patch(patch) => {
                let doc = docs
                    .get_mut(&key)
                    .ok_or(StoreError::NotFound { id: key })?;
                apply_patch(doc, &patch)?;
                Ok(doc.clone())
            }
        }
    }
}

fn numeric(doc: &Value, path: &str) -> f64 {
    get_path(doc, path).and_then(Value::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(collection: &str, id_str: &str) -> DocId {
        DocId::new(collection, id_str)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryStore::new();
        let doc_id = id("bosses", "g1:ash");
        store.create(&doc_id, json!({"hp": 100})).await.unwrap();

        let fetched = store.get(&doc_id).await.unwrap().unwrap();
        assert_eq!(fetched, json!({"hp": 100}));

        let err = store.create(&doc_id, json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = MemoryStore::new();
        let err = store
            .update(&id("bosses", "nope"), Patch::new().set("hp", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let doc_id = id("bosses", "g1:ash");
        store.create(&doc_id, json!({"total": 0})).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let doc_id = doc_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(&doc_id, Patch::new().increment("total", 7))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let doc = store.get(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc["total"], json!(350));
    }

    #[tokio::test]
    async fn test_query_filter_order_limit() {
        let store = MemoryStore::new();
        for (name, guild, power) in [
            ("a", "g1", 30),
            ("b", "g1", 90),
            ("c", "g2", 60),
            ("d", "g1", 10),
        ] {
            store
                .create(
                    &id("members", name),
                    json!({"guild_id": guild, "power": power}),
                )
                .await
                .unwrap();
        }

        let results = store
            .query(
                Query::collection("members")
                    .filter("guild_id", "g1")
                    .order_by("power", SortDir::Desc)
                    .limit(2),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|(id, _)| id.id()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_transact_abort_writes_nothing() {
        let store = MemoryStore::new();
        let doc_id = id("tickets", "t1");
        store.create(&doc_id, json!({"consumed": false})).await.unwrap();

        let err = store
            .transact(
                &doc_id,
                Box::new(|_| Err(super::super::TxnAbort::new("TICKET_CONSUMED", ""))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TxnAborted { .. }));

        let doc = store.get(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc["consumed"], json!(false));
    }

    #[tokio::test]
    async fn test_transact_patch_returns_post_document() {
        let store = MemoryStore::new();
        let doc_id = id("bosses", "g1:ash");
        store.create(&doc_id, json!({"hp": 10})).await.unwrap();

        let after = store
            .transact(
                &doc_id,
                Box::new(|doc| {
                    assert!(doc.is_some());
                    Ok(TxnAction::Patch(Patch::new().increment("hp", -4)))
                }),
            )
            .await
            .unwrap();
        assert_eq!(after["hp"], json!(6));
    }
}
