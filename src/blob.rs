//! Blob collaborators used when a media asset has to be created.
//!
//! [`MediaFetcher`] reads the original bytes from the export's source URL and
//! [`BlobStore`] puts them somewhere the live store can link to. Both are
//! traits so tests and other deployments can swap the transport.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub id: String,
    pub url: String,
}

/// Bytes fetched from a source URL.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    /// Content type reported by the transport, if any.
    pub content_type: Option<String>,
}

/// Object storage "blob put".
pub trait BlobStore {
    /// Store `bytes` and return where they can be reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upload`] if the blob cannot be stored.
    fn upload(&mut self, bytes: &[u8], content_type: &str, suggested_name: &str)
    -> Result<UploadedBlob>;
}

/// Source of original media bytes.
pub trait MediaFetcher {
    /// Fetch the file at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] if the file cannot be read.
    fn fetch(&self, url: &str) -> Result<FetchedMedia>;
}

/// Writes blobs into a local directory.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    dir: PathBuf,
    base_url: String,
}

impl DirBlobStore {
    /// Create a store rooted at `dir`; returned URLs are `base_url/<name>`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Directory blobs are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pick a name that does not clash with an existing file.
    fn free_name(&self, suggested: &str) -> String {
        let cleaned = sanitize_name(suggested);
        if !self.dir.join(&cleaned).exists() {
            return cleaned;
        }
        let (stem, ext) = match cleaned.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (cleaned.clone(), String::new()),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{stem}-{n}{ext}");
            if !self.dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl BlobStore for DirBlobStore {
    fn upload(
        &mut self,
        bytes: &[u8],
        content_type: &str,
        suggested_name: &str,
    ) -> Result<UploadedBlob> {
        let upload_err = |e: std::io::Error| Error::Upload {
            name: suggested_name.to_string(),
            message: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(upload_err)?;
        let name = self.free_name(suggested_name);
        let path = self.dir.join(&name);

        let temp = self.dir.join(format!(".{name}.tmp"));
        fs::write(&temp, bytes).map_err(upload_err)?;
        fs::rename(&temp, &path).map_err(upload_err)?;

        tracing::debug!(name = %name, content_type, bytes = bytes.len(), "Blob stored");
        Ok(UploadedBlob {
            url: format!("{}/{name}", self.base_url),
            id: name,
        })
    }
}

/// Fetches over HTTP(S). Local paths and `file://` URLs are read only from
/// inside a configured root.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    local_root: Option<PathBuf>,
}

impl HttpFetcher {
    /// Build a fetcher with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("psync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            local_root: None,
        })
    }

    /// Allow reads of local files under `root`. `None` disables local reads.
    #[must_use]
    pub fn with_local_root(mut self, root: Option<PathBuf>) -> Self {
        self.local_root = root;
        self
    }

    fn fetch_http(&self, url: &str) -> Result<FetchedMedia> {
        let fetch_err = |message: String| Error::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().map_err(|e| fetch_err(e.to_string()))?;
        Ok(FetchedMedia {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    /// Resolve a local source against the root, refusing anything outside it.
    fn local_path(&self, url: &str) -> Result<PathBuf> {
        let root = self.local_root.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "local media source {url} refused: local_media_root is not configured"
            ))
        })?;
        let path = if url.starts_with("file://") {
            Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| Error::InvalidArgument(format!("invalid file URL: {url}")))?
        } else {
            root.join(url)
        };

        let io_err = |e: std::io::Error| Error::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };
        let root = root.canonicalize().map_err(io_err)?;
        let path = path.canonicalize().map_err(io_err)?;
        if !path.starts_with(&root) {
            return Err(Error::InvalidArgument(format!(
                "local media source {url} is outside {}",
                root.display()
            )));
        }
        Ok(path)
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url);
        }

        let path = self.local_path(url)?;
        let bytes = fs::read(&path).map_err(|e| Error::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(FetchedMedia {
            bytes,
            content_type: None,
        })
    }
}

/// MIME type guessed from a filename's extension.
#[must_use]
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '-' } else { c })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_blob_store_avoids_clobbering() {
        let temp = TempDir::new().unwrap();
        let mut store = DirBlobStore::new(temp.path().join("blobs"), "https://cdn.example/media/");

        let first = store.upload(b"one", "image/jpeg", "photo.jpg").unwrap();
        let second = store.upload(b"two", "image/jpeg", "photo.jpg").unwrap();

        assert_eq!(first.url, "https://cdn.example/media/photo.jpg");
        assert_eq!(second.id, "photo-2.jpg");
        assert_eq!(fs::read(store.dir().join("photo.jpg")).unwrap(), b"one");
        assert_eq!(fs::read(store.dir().join("photo-2.jpg")).unwrap(), b"two");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("../etc/passwd"), "-etc-passwd");
        assert_eq!(sanitize_name(""), "upload.bin");
        assert_eq!(sanitize_name("ok.png"), "ok.png");
    }

    #[test]
    fn test_fetch_local_file_under_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("uploads");
        fs::create_dir_all(&root).unwrap();
        let path = root.join("a.png");
        fs::write(&path, b"png").unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1))
            .unwrap()
            .with_local_root(Some(root.clone()));
        let url = Url::from_file_path(&path).unwrap().to_string();
        assert_eq!(fetcher.fetch(&url).unwrap().bytes, b"png");
        assert_eq!(fetcher.fetch("a.png").unwrap().bytes, b"png");

        let err = fetcher.fetch("missing.png").unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn test_local_reads_outside_root_are_refused() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("uploads");
        fs::create_dir_all(&root).unwrap();
        let secret = temp.path().join("secret.txt");
        fs::write(&secret, b"secret").unwrap();
        let secret_url = Url::from_file_path(&secret).unwrap().to_string();

        let closed = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        for source in [secret_url.as_str(), secret.to_str().unwrap()] {
            let err = closed.fetch(source).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{source}");
        }

        let rooted = closed.with_local_root(Some(root));
        for source in [secret_url.as_str(), secret.to_str().unwrap(), "../secret.txt"] {
            let err = rooted.fetch(source).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{source}");
        }
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.webp"), "image/webp");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
