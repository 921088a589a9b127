//! ContextProvider trait and its object-safe wrapper.
//!
//! A context provider is an optional external memory/vector store. The node
//! executor consults it before a node runs (best effort, timeout-bounded) and
//! feeds it node results afterwards (fire-and-forget). Neither direction can
//! fail a workflow.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use uuid::Uuid;

/// Errors reported by a context provider. Always logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context provider unavailable: {0}")]
    Unavailable(String),

    #[error("context provider error: {0}")]
    Provider(String),
}

/// What a node is about to work on, used to look up relevant memory.
#[derive(Debug, Clone)]
pub struct ContextQuery {
    pub execution_id: Uuid,
    pub definition_id: String,
    pub node_id: String,
    pub input: Value,
    pub context: Value,
}

/// A completed node's output offered for ingestion.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub execution_id: Uuid,
    pub definition_id: String,
    pub node_id: String,
    pub data: Value,
}

pub trait ContextProvider: Send + Sync {
    /// Retrieve memory relevant to `query`. `Value::Null` means nothing found.
    fn retrieve(
        &self,
        query: &ContextQuery,
    ) -> impl Future<Output = Result<Value, ContextError>> + Send;

    /// Store a node result for later retrieval.
    fn ingest(&self, record: IngestRecord) -> impl Future<Output = Result<(), ContextError>> + Send;
}

/// Object-safe version of [`ContextProvider`] with boxed futures.
pub trait ContextProviderDyn: Send + Sync {
    fn retrieve_boxed<'a>(
        &'a self,
        query: &'a ContextQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ContextError>> + Send + 'a>>;

    fn ingest_boxed(
        &self,
        record: IngestRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ContextError>> + Send + '_>>;
}

impl<T: ContextProvider> ContextProviderDyn for T {
    fn retrieve_boxed<'a>(
        &'a self,
        query: &'a ContextQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ContextError>> + Send + 'a>> {
        Box::pin(self.retrieve(query))
    }

    fn ingest_boxed(
        &self,
        record: IngestRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ContextError>> + Send + '_>> {
        Box::pin(self.ingest(record))
    }
}

/// Type-erased context provider shared by the node executor.
pub struct BoxContextProvider {
    inner: Box<dyn ContextProviderDyn + Send + Sync>,
}

impl BoxContextProvider {
    pub fn new<T: ContextProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub async fn retrieve(&self, query: &ContextQuery) -> Result<Value, ContextError> {
        self.inner.retrieve_boxed(query).await
    }

    pub async fn ingest(&self, record: IngestRecord) -> Result<(), ContextError> {
        self.inner.ingest_boxed(record).await
    }
}
