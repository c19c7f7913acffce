//! In-memory collaborators for engine tests.

use std::cell::Cell;

use crate::blob::{BlobStore, FetchedMedia, MediaFetcher, UploadedBlob};
use crate::error::{Error, Result};
use crate::model::{Collection, LiveEntity};
use crate::reconcile::types::CancelFlag;
use crate::storage::{Filter, LiveStore, Patch, Payload, SqliteStore};

/// Serves a few fixed bytes for any URL not containing `missing`.
///
/// The first `fail_first` calls fail with a retryable fetch error.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    pub fail_first: Cell<u32>,
    pub calls: Cell<u32>,
}

impl MediaFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        self.calls.set(self.calls.get() + 1);
        if self.fail_first.get() > 0 {
            self.fail_first.set(self.fail_first.get() - 1);
            return Err(Error::Fetch {
                url: url.into(),
                message: "connection reset".into(),
            });
        }
        if url.contains("missing") {
            return Err(Error::Fetch {
                url: url.into(),
                message: "HTTP 404 Not Found".into(),
            });
        }
        Ok(FetchedMedia {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            content_type: None,
        })
    }
}

/// Keeps uploads in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    pub uploads: Vec<(String, String, usize)>,
}

impl BlobStore for MemoryBlobStore {
    fn upload(
        &mut self,
        bytes: &[u8],
        content_type: &str,
        suggested_name: &str,
    ) -> Result<UploadedBlob> {
        self.uploads
            .push((suggested_name.into(), content_type.into(), bytes.len()));
        Ok(UploadedBlob {
            id: format!("blob_{}", self.uploads.len()),
            url: format!("https://cdn.example/{suggested_name}"),
        })
    }
}

/// Wraps a store; the `fail_on`-th create (1-based) fails permanently and
/// the `cancel_after`-th create raises the cancel flag.
pub struct ScriptedStore {
    pub inner: SqliteStore,
    pub fail_on: Option<usize>,
    pub cancel_after: Option<(usize, CancelFlag)>,
    pub creates_attempted: usize,
}

impl ScriptedStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_on: None,
            cancel_after: None,
            creates_attempted: 0,
        }
    }
}

impl LiveStore for ScriptedStore {
    fn ping(&self) -> Result<()> {
        self.inner.ping()
    }

    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<LiveEntity>> {
        self.inner.find(collection, filter)
    }

    fn create(&mut self, payload: &Payload) -> Result<LiveEntity> {
        self.creates_attempted += 1;
        if let Some((n, flag)) = &self.cancel_after {
            if self.creates_attempted == *n {
                flag.cancel();
            }
        }
        if self.fail_on == Some(self.creates_attempted) {
            return Err(Error::Constraint("forced failure".into()));
        }
        self.inner.create(payload)
    }

    fn update(&mut self, collection: Collection, id: &str, patch: &Patch) -> Result<LiveEntity> {
        self.inner.update(collection, id, patch)
    }

    fn delete(&mut self, collection: Collection, id: &str) -> Result<()> {
        self.inner.delete(collection, id)
    }
}

/// Store that cannot be reached.
pub struct OfflineStore;

impl LiveStore for OfflineStore {
    fn ping(&self) -> Result<()> {
        Err(Error::Other("connection refused".into()))
    }

    fn find(&self, _: Collection, _: &Filter) -> Result<Vec<LiveEntity>> {
        Err(Error::Other("connection refused".into()))
    }

    fn create(&mut self, _: &Payload) -> Result<LiveEntity> {
        Err(Error::Other("connection refused".into()))
    }

    fn update(&mut self, _: Collection, _: &str, _: &Patch) -> Result<LiveEntity> {
        Err(Error::Other("connection refused".into()))
    }

    fn delete(&mut self, _: Collection, _: &str) -> Result<()> {
        Err(Error::Other("connection refused".into()))
    }
}
