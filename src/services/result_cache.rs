//! File-backed cache of serialized responses for closed periods.
//!
//! Entries are written once and never updated: a closed period's data can
//! no longer change. Open periods always bypass the cache.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::QueryError;
use crate::period::PeriodStatus;

/// Longest key kept verbatim in a filename.
const MAX_KEY_LEN: usize = 180;

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `{dir}/{category}___{key}.json`, the key being every parameter as
    /// `name_value` in name order, joined with `__`.
    pub fn entry_path(&self, category: &str, params: &BTreeMap<String, String>) -> PathBuf {
        self.dir
            .join(format!("{category}___{}.json", cache_key(params)))
    }

    /// Serves a stored payload for closed periods, otherwise computes it and,
    /// for closed periods, stores it. Stored bytes are returned as they are.
    pub async fn with_cache<F, Fut>(
        &self,
        category: &str,
        params: &BTreeMap<String, String>,
        status: PeriodStatus,
        compute: F,
    ) -> Result<Vec<u8>, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, QueryError>>,
    {
        if status.is_open() {
            return compute().await.map(String::into_bytes);
        }

        let path = self.entry_path(category, params);
        match tokio::fs::read(&path).await {
            Ok(payload) => {
                tracing::debug!(path = %path.display(), "cache hit");
                return Ok(payload);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "cache miss");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read cache entry");
            }
        }

        let payload = compute().await?.into_bytes();
        self.store(path, payload.clone()).await;
        Ok(payload)
    }

    async fn store(&self, path: PathBuf, payload: Vec<u8>) {
        let dir = self.dir.clone();
        let target = path.clone();
        let written =
            tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &payload))
                .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to write cache entry");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cache write task failed");
            }
        }
    }
}

fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| anyhow::anyhow!("failed to persist cache entry: {err}"))?;
    Ok(())
}

pub fn sanitize_for_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub fn cache_key(params: &BTreeMap<String, String>) -> String {
    let key = params
        .iter()
        .map(|(name, value)| {
            format!(
                "{}_{}",
                sanitize_for_filename(name),
                sanitize_for_filename(value)
            )
        })
        .collect::<Vec<_>>()
        .join("__");
    if key.len() > MAX_KEY_LEN {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn keys_are_sanitized_and_sorted() {
        let key = cache_key(&params(&[
            ("year", "2023"),
            ("field", "gas"),
            ("window", "1 hour"),
        ]));
        assert_eq!(key, "field_gas__window_1-hour__year_2023");
    }

    #[test]
    fn long_keys_are_hashed() {
        let long = "x".repeat(400);
        let key = cache_key(&params(&[("window", &long)]));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entry_path_uses_category_prefix() {
        let cache = ResultCache::new("/var/cache/usage");
        let path = cache.entry_path("period", &params(&[("field", "gas"), ("day", "15")]));
        assert_eq!(
            path,
            PathBuf::from("/var/cache/usage/period___day_15__field_gas.json")
        );
    }

    #[tokio::test]
    async fn closed_periods_compute_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        let calls = AtomicUsize::new(0);
        let request = params(&[("field", "gas"), ("year", "2022")]);

        let mut payloads = Vec::new();
        for _ in 0..2 {
            let payload = cache
                .with_cache("period", &request, PeriodStatus::Closed, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("[[\"2022-01-01T00:00:00+01:00\",1.5]]".to_string())
                })
                .await
                .expect("payload");
            payloads.push(payload);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(payloads[0], payloads[1]);
        assert!(cache.entry_path("period", &request).exists());
    }

    #[tokio::test]
    async fn open_periods_ignore_stale_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        let request = params(&[("field", "gas"), ("year", "2023")]);
        let path = cache.entry_path("period", &request);
        std::fs::write(&path, "stale").expect("seed");

        let payload = cache
            .with_cache("period", &request, PeriodStatus::Open, || async {
                Ok("fresh".to_string())
            })
            .await
            .expect("payload");

        assert_eq!(payload, b"fresh");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "stale");
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        let request = params(&[("field", "water")]);

        let err = cache
            .with_cache("period", &request, PeriodStatus::Closed, || async {
                Err(QueryError::BackendUnavailable("down".to_string()))
            })
            .await
            .expect_err("backend down");

        assert!(matches!(err, QueryError::BackendUnavailable(_)));
        assert!(!cache.entry_path("period", &request).exists());
    }

    #[tokio::test]
    async fn write_failures_do_not_fail_the_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path().join("missing"));

        let payload = cache
            .with_cache("period", &params(&[("field", "gas")]), PeriodStatus::Closed, || async {
                Ok("[]".to_string())
            })
            .await
            .expect("payload");
        assert_eq!(payload, b"[]");
    }

    #[tokio::test]
    async fn stored_bytes_are_served_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(dir.path());
        let request = params(&[("field", "gas"), ("year", "2021")]);
        let stored = vec![b'[', 0xff, 0xfe, b']'];
        std::fs::write(cache.entry_path("period", &request), &stored).expect("seed");

        let payload = cache
            .with_cache("period", &request, PeriodStatus::Closed, || async {
                Err(QueryError::BackendUnavailable("must not be called".to_string()))
            })
            .await
            .expect("payload");
        assert_eq!(payload, stored);
    }
}
