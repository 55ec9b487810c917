use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use resumind_core::failure::Failure;
use resumind_core::traits::{CapabilityResult, DocumentSource};
use resumind_core::types::{Content, ScopeKey};

/// Documents stored on disk as `<root>/<owner>/<path>`.
///
/// A reference is `<owner>/<path>`; only `owner` may fetch it.
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Split a reference into its owner and a safe relative path.
    fn resolve(&self, reference: &str, requester: &ScopeKey) -> CapabilityResult<PathBuf> {
        let (owner, rest) = reference
            .split_once('/')
            .ok_or_else(|| Failure::not_found(format!("malformed reference '{}'", reference)))?;

        if owner != requester.as_str() {
            return Err(Failure::access_denied(format!(
                "'{}' may not read documents owned by '{}'",
                requester, owner
            )));
        }

        let relative = Path::new(rest);
        if rest.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(Failure::access_denied(format!(
                "reference '{}' escapes the owner's directory",
                reference
            )));
        }

        Ok(self.root.join(owner).join(relative))
    }
}

impl DocumentSource for FsDocumentSource {
    fn fetch<'a>(
        &'a self,
        reference: &'a str,
        requester: &'a ScopeKey,
    ) -> BoxFuture<'a, CapabilityResult<Content>> {
        Box::pin(async move {
            let path = self.resolve(reference, requester)?;

            // Symlinks inside the owner's directory must not lead out of it.
            let owner_dir = self.root.join(requester.as_str());
            if let (Ok(real), Ok(base)) = (
                tokio::fs::canonicalize(&path).await,
                tokio::fs::canonicalize(&owner_dir).await,
            ) {
                if !real.starts_with(&base) {
                    return Err(Failure::access_denied(format!(
                        "reference '{}' resolves outside the owner's directory",
                        reference
                    )));
                }
            }

            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(reference = %reference, bytes = bytes.len(), "Fetched document");
                    Ok(Arc::from(bytes))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Failure::not_found(format!("document '{}' does not exist", reference)))
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    Err(Failure::access_denied(e.to_string()))
                }
                Err(e) => Err(Failure::download(format!("reading '{}': {}", reference, e))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::FailureKind;

    fn setup() -> (tempfile::TempDir, FsDocumentSource) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("user-42/uploads")).unwrap();
        std::fs::write(dir.path().join("user-42/uploads/cv.pdf"), b"%PDF-1.7").unwrap();
        std::fs::create_dir_all(dir.path().join("user-7")).unwrap();
        std::fs::write(dir.path().join("user-7/secret.pdf"), b"secret").unwrap();
        let source = FsDocumentSource::new(dir.path());
        (dir, source)
    }

    #[tokio::test]
    async fn test_owner_can_fetch() {
        let (_dir, source) = setup();
        let bytes = source
            .fetch("user-42/uploads/cv.pdf", &ScopeKey::new("user-42"))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_other_owner_is_denied() {
        let (_dir, source) = setup();
        let err = source
            .fetch("user-7/secret.pdf", &ScopeKey::new("user-42"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::AccessDenied);
    }

    #[tokio::test]
    async fn test_traversal_is_denied() {
        let (_dir, source) = setup();
        let err = source
            .fetch("user-42/../user-7/secret.pdf", &ScopeKey::new("user-42"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::AccessDenied);
    }

    #[tokio::test]
    async fn test_missing_document() {
        let (_dir, source) = setup();
        let err = source
            .fetch("user-42/nope.pdf", &ScopeKey::new("user-42"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);

        let err = source
            .fetch("no-slash", &ScopeKey::new("user-42"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);
    }
}
