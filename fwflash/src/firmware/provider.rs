//! Content providers serving firmware resources by name.
//!
//! Resource names: `""` is the application image, `"bootloader"`,
//! `"partitions"` and `"boot_app0"` are the support segments, `"info"` is
//! the JSON metadata document.

use {
    crate::error::{Error, Result},
    log::trace,
    std::{fs, path::PathBuf},
};

/// Source of named firmware resources.
///
/// Providers are shared across the concurrent segment fetches.
pub trait ContentProvider: Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    /// Retrieve the full body of a resource.
    fn get(&self, name: &str) -> Result<Vec<u8>>;
}

/// HTTP provider: `GET <base>/<name>?t=<nonce>`.
#[cfg(feature = "http")]
pub struct HttpProvider {
    base: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpProvider {
    /// Request timeout for a single resource.
    pub const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

    /// Create a provider rooted at `base`.
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            base: base
                .into()
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    /// Absolute URL of a resource, without the cache-busting parameter.
    pub fn url_for(&self, name: &str) -> String {
        if name.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{name}", self.base)
        }
    }
}

#[cfg(feature = "http")]
impl ContentProvider for HttpProvider {
    fn describe(&self) -> String {
        self.base.clone()
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.url_for(name);
        let nonce = cache_nonce();
        trace!("GET {url}?t={nonce}");

        let response = self
            .client
            .get(&url)
            .query(&[("t", nonce.as_str())])
            .send()
            .map_err(|e| Error::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("HTTP {} for {url}", status.as_u16())));
        }

        let body = response
            .bytes()
            .map_err(|e| Error::Network(format!("{url}: {e}")))?;
        Ok(body.to_vec())
    }
}

/// Unique value for the cache-defeating query parameter.
pub fn cache_nonce() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis}-{seq}")
}

/// Local directory provider.
///
/// Maps `""` to `firmware.bin`, `"info"` to `info.json` and any other name
/// to `<name>.bin`.
#[derive(Debug, Clone)]
pub struct DirProvider {
    root: PathBuf,
}

impl DirProvider {
    /// Serve resources from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing a resource name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        match name {
            "" => self.root.join("firmware.bin"),
            "info" => self.root.join("info.json"),
            other => self.root.join(format!("{other}.bin")),
        }
    }
}

impl ContentProvider for DirProvider {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name);
        trace!("Reading {}", path.display());
        Ok(fs::read(&path)?)
    }
}
