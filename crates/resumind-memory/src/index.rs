use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use resumind_core::error::{Result, ResumindError};
use resumind_core::failure::{Failure, IndexCause};
use resumind_core::traits::{CapabilityResult, VectorIndex};
use resumind_core::types::{Document, DocumentMetadata, ScopeKey, ScoredDocument, StoredDocument};

use crate::embeddings::{cosine_similarity, from_blob, to_blob, EmbeddingProvider};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        scope TEXT NOT NULL,
        body TEXT NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_scope
        ON documents(collection, scope);";

/// SQLite-backed vector store. Holds every collection in one table,
/// partitioned by `(collection, scope)`.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteIndex {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ResumindError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| ResumindError::Database(e.to_string()))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ResumindError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ResumindError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Vector index opened");
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| ResumindError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ResumindError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Handle onto one named collection.
    pub fn collection(self: &Arc<Self>, name: &str) -> SqliteCollection {
        SqliteCollection {
            index: Arc::clone(self),
            name: name.to_string(),
        }
    }

    /// Number of documents in `collection`, optionally restricted to one scope.
    pub fn count(&self, collection: &str, scope: Option<&ScopeKey>) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ResumindError::Database(e.to_string()))?;
        let n: i64 = match scope {
            Some(scope) => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1 AND scope = ?2",
                params![collection, scope.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            ),
        }
        .map_err(|e| ResumindError::Database(e.to_string()))?;
        Ok(n as usize)
    }

    /// Insert prepared rows, optionally clearing the scope first, in one transaction.
    fn write(
        &self,
        collection: &str,
        scope: &ScopeKey,
        rows: &[(String, Document, Vec<f32>)],
        clear_first: bool,
    ) -> CapabilityResult<usize> {
        let mut conn = self.conn.lock().map_err(db_failure)?;
        let tx = conn.transaction().map_err(db_failure)?;

        let mut deleted = 0;
        if clear_first {
            deleted = tx
                .execute(
                    "DELETE FROM documents WHERE collection = ?1 AND scope = ?2",
                    params![collection, scope.as_str()],
                )
                .map_err(db_failure)?;
        }

        let now = Utc::now().to_rfc3339();
        for (id, doc, embedding) in rows {
            let metadata = serde_json::to_string(&doc.metadata).map_err(db_failure)?;
            tx.execute(
                "INSERT INTO documents (id, collection, scope, body, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, collection, scope.as_str(), doc.body, metadata, to_blob(embedding), now],
            )
            .map_err(db_failure)?;
        }

        tx.commit().map_err(db_failure)?;
        Ok(deleted)
    }

    fn delete(&self, collection: &str, scope: &ScopeKey) -> CapabilityResult<usize> {
        let conn = self.conn.lock().map_err(db_failure)?;
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND scope = ?2",
            params![collection, scope.as_str()],
        )
        .map_err(db_failure)
    }

    fn scan(&self, collection: &str, scope: &ScopeKey) -> CapabilityResult<Vec<(String, Document, Vec<f32>)>> {
        let conn = self.conn.lock().map_err(db_failure)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, body, metadata, embedding FROM documents
                 WHERE collection = ?1 AND scope = ?2
                 ORDER BY rowid ASC",
            )
            .map_err(db_failure)?;

        let rows = stmt
            .query_map(params![collection, scope.as_str()], |row| {
                let id: String = row.get(0)?;
                let body: String = row.get(1)?;
                let metadata: String = row.get(2)?;
                let blob: Vec<u8> = row.get(3)?;
                Ok((id, body, metadata, blob))
            })
            .map_err(db_failure)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, body, metadata, blob) = row.map_err(db_failure)?;
            let metadata: DocumentMetadata = serde_json::from_str(&metadata).map_err(db_failure)?;
            out.push((id, Document { body, metadata }, from_blob(&blob)));
        }
        Ok(out)
    }

    fn get(&self, collection: &str, scope: &ScopeKey, id: &str) -> CapabilityResult<Option<StoredDocument>> {
        let conn = self.conn.lock().map_err(db_failure)?;
        let row = conn
            .query_row(
                "SELECT body, metadata FROM documents
                 WHERE collection = ?1 AND scope = ?2 AND id = ?3",
                params![collection, scope.as_str(), id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(db_failure)?;

        match row {
            Some((body, metadata)) => {
                let metadata = serde_json::from_str(&metadata).map_err(db_failure)?;
                Ok(Some(StoredDocument {
                    id: id.to_string(),
                    document: Document { body, metadata },
                }))
            }
            None => Ok(None),
        }
    }
}

fn db_failure(e: impl std::fmt::Display) -> Failure {
    Failure::index(IndexCause::Connection, e.to_string())
}

/// One named collection of a [`SqliteIndex`].
pub struct SqliteCollection {
    index: Arc<SqliteIndex>,
    name: String,
}

impl SqliteCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reject documents owned by anyone other than `scope`.
    fn check_owner(scope: &ScopeKey, documents: &[Document]) -> CapabilityResult<()> {
        if scope.as_str().is_empty() {
            return Err(Failure::index(IndexCause::Scope, "empty scope key"));
        }
        match documents.iter().find(|d| d.metadata.owner != scope.as_str()) {
            Some(doc) => Err(Failure::index(
                IndexCause::Scope,
                format!(
                    "document owned by '{}' cannot be written to scope '{}'",
                    doc.metadata.owner, scope
                ),
            )),
            None => Ok(()),
        }
    }

    /// Embed every document and pair it with a fresh id.
    async fn prepare(&self, documents: Vec<Document>) -> CapabilityResult<Vec<(String, Document, Vec<f32>)>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = documents.iter().map(|d| d.body.clone()).collect();
        let vectors = self
            .index
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| Failure::index(IndexCause::Embedding, e))?;
        if vectors.len() != documents.len() {
            return Err(Failure::index(
                IndexCause::Embedding,
                format!("{} embeddings for {} documents", vectors.len(), documents.len()),
            ));
        }
        Ok(documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, v)| (Uuid::new_v4().to_string(), doc, v))
            .collect())
    }
}

impl VectorIndex for SqliteCollection {
    fn upsert<'a>(
        &'a self,
        scope: &'a ScopeKey,
        documents: Vec<Document>,
    ) -> BoxFuture<'a, CapabilityResult<Vec<String>>> {
        Box::pin(async move {
            Self::check_owner(scope, &documents)?;
            let rows = self.prepare(documents).await?;
            self.index.write(&self.name, scope, &rows, false)?;
            debug!(collection = %self.name, scope = %scope, count = rows.len(), "Upserted documents");
            Ok(rows.into_iter().map(|(id, _, _)| id).collect())
        })
    }

    fn delete_where<'a>(&'a self, scope: &'a ScopeKey) -> BoxFuture<'a, CapabilityResult<usize>> {
        Box::pin(async move {
            if scope.as_str().is_empty() {
                return Err(Failure::index(IndexCause::Scope, "empty scope key"));
            }
            let deleted = self.index.delete(&self.name, scope)?;
            debug!(collection = %self.name, scope = %scope, deleted, "Deleted scope");
            Ok(deleted)
        })
    }

    fn query<'a>(
        &'a self,
        text: &'a str,
        scope: &'a ScopeKey,
        k: usize,
    ) -> BoxFuture<'a, CapabilityResult<Vec<ScoredDocument>>> {
        Box::pin(async move {
            if k == 0 {
                return Ok(vec![]);
            }
            let query_vec = self
                .index
                .embedder
                .embed(&[text.to_string()])
                .await
                .map_err(|e| Failure::index(IndexCause::Embedding, e))?
                .into_iter()
                .next()
                .ok_or_else(|| Failure::index(IndexCause::Embedding, "empty embedding response"))?;

            let mut scored: Vec<ScoredDocument> = self
                .index
                .scan(&self.name, scope)?
                .into_iter()
                .map(|(id, document, embedding)| ScoredDocument {
                    score: cosine_similarity(&query_vec, &embedding),
                    id,
                    document,
                })
                .collect();

            // Sort by similarity descending
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
    }

    fn get_by_ids<'a>(
        &'a self,
        ids: &'a [String],
        scope: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Vec<StoredDocument>>> {
        Box::pin(async move {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                match self.index.get(&self.name, scope, id)? {
                    Some(doc) => found.push(doc),
                    None => warn!(collection = %self.name, scope = %scope, id = %id, "Document not in scope"),
                }
            }
            Ok(found)
        })
    }

    fn replace_scope<'a>(
        &'a self,
        scope: &'a ScopeKey,
        documents: Vec<Document>,
    ) -> BoxFuture<'a, CapabilityResult<Vec<String>>> {
        Box::pin(async move {
            Self::check_owner(scope, &documents)?;
            // Embed before touching the scope so a failed embedding leaves
            // the previous documents in place.
            let rows = self.prepare(documents).await?;
            let deleted = self.index.write(&self.name, scope, &rows, true)?;
            debug!(
                collection = %self.name,
                scope = %scope,
                deleted,
                inserted = rows.len(),
                "Replaced scope"
            );
            Ok(rows.into_iter().map(|(id, _, _)| id).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::types::DocumentCategory;

    /// Bag-of-letters embedder: deterministic and good enough to rank.
    struct LetterEmbedder;

    impl EmbeddingProvider for LetterEmbedder {
        fn embed(&self, texts: &[String]) -> BoxFuture<'_, std::result::Result<Vec<Vec<f32>>, String>> {
            let out = texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for c in t.to_ascii_lowercase().bytes().filter(|b| b.is_ascii_lowercase()) {
                        v[(c - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect();
            Box::pin(async move { Ok(out) })
        }

        fn dimensions(&self) -> usize {
            26
        }
    }

    struct BrokenEmbedder;

    impl EmbeddingProvider for BrokenEmbedder {
        fn embed(&self, _texts: &[String]) -> BoxFuture<'_, std::result::Result<Vec<Vec<f32>>, String>> {
            Box::pin(async { Err("embedding endpoint down".to_string()) })
        }

        fn dimensions(&self) -> usize {
            0
        }
    }

    fn doc(owner: &str, body: &str) -> Document {
        Document {
            body: body.to_string(),
            metadata: DocumentMetadata::new(
                DocumentCategory::CareerExperience,
                &ScopeKey::new(owner),
                "0.0.1",
            ),
        }
    }

    fn index() -> Arc<SqliteIndex> {
        Arc::new(SqliteIndex::in_memory(Arc::new(LetterEmbedder)).unwrap())
    }

    #[tokio::test]
    async fn test_upsert_and_query_scoped() {
        let index = index();
        let docs = index.collection("apply_docs");
        let alice = ScopeKey::new("alice");
        let bob = ScopeKey::new("bob");

        docs.upsert(&alice, vec![doc("alice", "rust backend"), doc("alice", "zzz")])
            .await
            .unwrap();
        docs.upsert(&bob, vec![doc("bob", "rust backend")]).await.unwrap();

        let hits = docs.query("rust", &alice, 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.body, "rust backend");
        assert!(hits.iter().all(|h| h.document.metadata.owner == "alice"));

        let top = docs.query("rust", &alice, 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_foreign_owner() {
        let index = index();
        let docs = index.collection("apply_docs");
        let err = docs
            .upsert(&ScopeKey::new("alice"), vec![doc("bob", "x")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, resumind_core::FailureKind::Index(IndexCause::Scope));
        assert_eq!(index.count("apply_docs", None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_scope_leaves_other_scopes() {
        let index = index();
        let docs = index.collection("apply_docs");
        let alice = ScopeKey::new("alice");
        let bob = ScopeKey::new("bob");

        docs.upsert(&bob, vec![doc("bob", "keep me")]).await.unwrap();
        docs.replace_scope(&alice, vec![doc("alice", "a"), doc("alice", "b")])
            .await
            .unwrap();
        docs.replace_scope(&alice, vec![doc("alice", "a"), doc("alice", "b")])
            .await
            .unwrap();

        assert_eq!(index.count("apply_docs", Some(&alice)).unwrap(), 2);
        assert_eq!(index.count("apply_docs", Some(&bob)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_scope_keeps_old_documents_when_embedding_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let alice = ScopeKey::new("alice");
        {
            let index = Arc::new(SqliteIndex::open(&path, Arc::new(LetterEmbedder)).unwrap());
            index
                .collection("apply_docs")
                .upsert(&alice, vec![doc("alice", "old")])
                .await
                .unwrap();
        }

        let index = Arc::new(SqliteIndex::open(&path, Arc::new(BrokenEmbedder)).unwrap());
        let err = index
            .collection("apply_docs")
            .replace_scope(&alice, vec![doc("alice", "new")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, resumind_core::FailureKind::Index(IndexCause::Embedding));
        assert_eq!(index.count("apply_docs", Some(&alice)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_by_ids_respects_scope() {
        let index = index();
        let docs = index.collection("apply_docs");
        let ids = docs
            .upsert(&ScopeKey::new("alice"), vec![doc("alice", "profile")])
            .await
            .unwrap();

        let mine = docs.get_by_ids(&ids, &ScopeKey::new("alice")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, ids[0]);

        let theirs = docs.get_by_ids(&ids, &ScopeKey::new("bob")).await.unwrap();
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let index = index();
        let alice = ScopeKey::new("alice");
        index
            .collection("apply_docs")
            .upsert(&alice, vec![doc("alice", "a")])
            .await
            .unwrap();
        let deleted = index
            .collection("personalized_questions")
            .delete_where(&alice)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(index.count("apply_docs", Some(&alice)).unwrap(), 1);
    }
}
