pub mod embeddings;
pub mod index;
pub mod source;

pub use embeddings::{cosine_similarity, EmbeddingProvider, HttpEmbeddingProvider};
pub use index::{SqliteCollection, SqliteIndex};
pub use source::FsDocumentSource;
