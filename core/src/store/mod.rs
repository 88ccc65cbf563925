//! Document store contract
//!
//! The raid pipeline consumes persistence through this narrow contract:
//! get / create-if-absent / partial update with atomic increments / query,
//! plus optional single-document transactions. The backing store is an
//! external collaborator; `MemoryStore` is the in-process implementation used
//! by tests and the CLI demo.

mod error;
mod memory;
mod patch;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use patch::{apply_patch, get_path, FieldOp, Patch};

use async_trait::async_trait;
use serde_json::Value;

/// A JSON object document.
pub type Document = Value;

/// Document address: collection plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocId {
    collection: String,
    id: String,
}

impl DocId {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Flat storage key, `collection/id`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Collection query: equality filters, optional numeric ordering and limit.
#[derive(Debug, Clone)]
pub struct Query {
    collection: String,
    filters: Vec<(String, Value)>,
    order_by: Option<(String, SortDir)>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Equality filter on a dotted field path.
    pub fn filter(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((path.into(), value.into()));
        self
    }

    /// Order by a numeric field, missing values sort as 0.
    pub fn order_by(mut self, path: impl Into<String>, dir: SortDir) -> Self {
        self.order_by = Some((path.into(), dir));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn order(&self) -> Option<(&str, SortDir)> {
        self.order_by.as_ref().map(|(p, d)| (p.as_str(), *d))
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }
}

/// Outcome of a transaction closure.
#[derive(Debug)]
pub enum TxnAction {
    /// Create the document (must be absent).
    Create(Document),
    /// Apply a patch to the existing document.
    Patch(Patch),
}

/// Domain-level abort raised from inside a transaction closure.
#[derive(Debug, Clone)]
pub struct TxnAbort {
    pub code: &'static str,
    pub message: String,
}

impl TxnAbort {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Read-modify-write closure over one document. Receives the freshly read
/// document (or `None` if absent) and decides the write.
pub type TxnFn =
    Box<dyn FnOnce(Option<&Document>) -> Result<TxnAction, TxnAbort> + Send>;

/// Persistence contract consumed by the raid pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if absent.
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError>;

    /// Create a document, failing with `AlreadyExists` if present.
    async fn create(&self, id: &DocId, doc: Document) -> Result<(), StoreError>;

    /// Apply a partial update, failing with `NotFound` if absent.
    /// `FieldOp::Increment` is atomic against the stored value.
    async fn update(&self, id: &DocId, patch: Patch) -> Result<(), StoreError>;

    /// Delete a document; deleting an absent document is not an error.
    async fn delete(&self, id: &DocId) -> Result<(), StoreError>;

    /// Scan a collection.
    async fn query(&self, query: Query) -> Result<Vec<(DocId, Document)>, StoreError>;

    /// Whether `transact` is available. Callers choose their concurrency
    /// strategy from this capability.
    fn supports_transactions(&self) -> bool {
        false
    }

    /// Atomic single-document read-modify-write. Returns the document after
    /// the write. A `TxnAbort` from the closure surfaces as
    /// `StoreError::TxnAborted` without writing anything.
    async fn transact(&self, id: &DocId, op: TxnFn) -> Result<Document, StoreError> {
        let _ = (id, op);
        Err(StoreError::TransactionsUnsupported)
    }
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        (**self).get(id).await
    }

    async fn create(&self, id: &DocId, doc: Document) -> Result<(), StoreError> {
        (**self).create(id, doc).await
    }

    async fn update(&self, id: &DocId, patch: Patch) -> Result<(), StoreError> {
        (**self).update(id, patch).await
    }

    async fn delete(&self, id: &DocId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn query(&self, query: Query) -> Result<Vec<(DocId, Document)>, StoreError> {
        (**self).query(query).await
    }

    fn supports_transactions(&self) -> bool {
        (**self).supports_transactions()
    }

    async fn transact(&self, id: &DocId, op: TxnFn) -> Result<Document, StoreError> {
        (**self).transact(id, op).await
    }
}
