use futures::future::BoxFuture;

use crate::config::RunConfig;
use crate::failure::Failure;
use crate::types::*;

/// Result of a capability call. Failures are already classified.
pub type CapabilityResult<T> = std::result::Result<T, Failure>;

/// Document source: resolves a reference to raw bytes for an authorized requester.
pub trait DocumentSource: Send + Sync + 'static {
    /// Fetch `reference` on behalf of `requester`.
    ///
    /// Must fail with `AccessDenied` before touching storage when the
    /// requester does not own the reference.
    fn fetch<'a>(
        &'a self,
        reference: &'a str,
        requester: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Content>>;
}

/// Classification capability: is this document a resume?
pub trait Classifier: Send + Sync + 'static {
    fn classify<'a>(
        &'a self,
        content: &'a Content,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<Verdict>>;
}

/// Structured extraction capability.
pub trait Extractor: Send + Sync + 'static {
    fn extract<'a>(
        &'a self,
        content: &'a Content,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, CapabilityResult<ResumeRecord>>;
}

/// Generation capability: one model call, raw text out.
///
/// Structured callers request [`OutputFormat::Json`] and validate the text
/// themselves.
pub trait Generator: Send + Sync + 'static {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, CapabilityResult<String>>;
}

/// One collection of a vector index.
///
/// Every operation is partitioned by a scope key. Writes whose documents are
/// owned by a different identity than `scope` are rejected.
pub trait VectorIndex: Send + Sync + 'static {
    /// Insert documents and return their new ids, in input order.
    fn upsert<'a>(
        &'a self,
        scope: &'a ScopeKey,
        documents: Vec<Document>,
    ) -> BoxFuture<'a, CapabilityResult<Vec<String>>>;

    /// Delete every document in `scope`. Returns how many were removed.
    fn delete_where<'a>(&'a self, scope: &'a ScopeKey) -> BoxFuture<'a, CapabilityResult<usize>>;

    /// Top-`k` documents in `scope` ranked by similarity to `text`.
    fn query<'a>(
        &'a self,
        text: &'a str,
        scope: &'a ScopeKey,
        k: usize,
    ) -> BoxFuture<'a, CapabilityResult<Vec<ScoredDocument>>>;

    /// Look up documents by id. Ids outside `scope` are silently absent.
    fn get_by_ids<'a>(
        &'a self,
        ids: &'a [String],
        scope: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Vec<StoredDocument>>>;

    /// Replace everything in `scope` with `documents`.
    ///
    /// The default deletes then inserts. Backends that can do both in one
    /// transaction should override it.
    fn replace_scope<'a>(
        &'a self,
        scope: &'a ScopeKey,
        documents: Vec<Document>,
    ) -> BoxFuture<'a, CapabilityResult<Vec<String>>> {
        Box::pin(async move {
            self.delete_where(scope).await?;
            self.upsert(scope, documents).await
        })
    }
}
