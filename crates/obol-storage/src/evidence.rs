//! Screenshot evidence storage: hash-named files under a per-user,
//! per-provider path, written atomically.

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use obol_core::ProviderId;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredEvidence {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// File-backed evidence store. Paths are keyed by user id, provider id and
/// capture timestamp; the content hash suffix deduplicates identical repeats.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn evidence_relative_path(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        captured_at: DateTime<Utc>,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = captured_at.format("%Y%m%d_%H%M%S").to_string();
        let short_hash = &content_hash[..content_hash.len().min(12)];
        PathBuf::from(user_id.to_string())
            .join(provider.as_str())
            .join(format!("{stamp}-{short_hash}.png"))
    }

    /// Decode and persist a base64 screenshot payload using an atomic
    /// temp-file rename. Returns the storage path recorded on the job.
    pub async fn store_screenshot(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        captured_at: DateTime<Utc>,
        base64_payload: &str,
    ) -> anyhow::Result<StoredEvidence> {
        let bytes = BASE64
            .decode(base64_payload.trim())
            .context("decoding screenshot payload")?;

        let content_hash = Self::sha256_hex(&bytes);
        let relative_path =
            self.evidence_relative_path(user_id, provider, captured_at, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating evidence directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking evidence path {}", absolute_path.display()))?
        {
            return Ok(StoredEvidence {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
            });
        }

        let temp_name = format!(".{}.tmp", Uuid::new_v4());
        let temp_path = absolute_path
            .parent()
            .expect("evidence path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp evidence file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp evidence file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp evidence file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredEvidence {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredEvidence {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp evidence {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn captured_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn screenshot_lands_under_user_and_provider_path() {
        let dir = tempdir().expect("tempdir");
        let store = EvidenceStore::new(dir.path());
        let user = Uuid::new_v4();
        let payload = BASE64.encode(b"fake-png-bytes");

        let stored = store
            .store_screenshot(user, ProviderId::Deh, captured_at(), &payload)
            .await
            .expect("store screenshot");

        assert!(stored.absolute_path.exists());
        let rendered = stored.relative_path.display().to_string();
        assert!(rendered.starts_with(&user.to_string()));
        assert!(rendered.contains("DEH"));
        assert!(rendered.contains("20250320_120000"));
        assert_eq!(stored.byte_size, b"fake-png-bytes".len());
    }

    #[tokio::test]
    async fn identical_payloads_deduplicate_to_one_file() {
        let dir = tempdir().expect("tempdir");
        let store = EvidenceStore::new(dir.path());
        let user = Uuid::new_v4();
        let payload = BASE64.encode(b"same-bytes");

        let first = store
            .store_screenshot(user, ProviderId::Eydap, captured_at(), &payload)
            .await
            .expect("first store");
        let second = store
            .store_screenshot(user, ProviderId::Eydap, captured_at(), &payload)
            .await
            .expect("second store");

        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn invalid_base64_payload_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = EvidenceStore::new(dir.path());
        let result = store
            .store_screenshot(Uuid::new_v4(), ProviderId::Deh, captured_at(), "%%%not-b64%%%")
            .await;
        assert!(result.is_err());
    }
}
