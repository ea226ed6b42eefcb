//! Get-or-compute cache over [`CheckpointStorage`].

use crate::error::CheckpointError;
use crate::ports::checkpoint::CheckpointStorage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, warn};

/// How [`CheckpointStore::read`] treats an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Write the computed value back
    pub persist: bool,
    /// Ignore any existing entry
    pub force_recompute: bool,
}

impl ReadPolicy {
    pub const CACHED: Self = Self {
        persist: true,
        force_recompute: false,
    };

    /// Read without ever writing, e.g. to look at another stage's result.
    pub const PROBE: Self = Self {
        persist: false,
        force_recompute: false,
    };

    pub fn refresh(force_recompute: bool) -> Self {
        Self {
            persist: true,
            force_recompute,
        }
    }
}

pub struct CheckpointStore<S> {
    storage: S,
    output_data: bool,
}

impl<S: CheckpointStorage> CheckpointStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            output_data: true,
        }
    }

    /// With `false`, nothing is ever written; reads still hit existing entries.
    pub fn with_output_data(mut self, output_data: bool) -> Self {
        self.output_data = output_data;
        self
    }

    /// Return the entry under `key`, or compute (and persist) it.
    ///
    /// A corrupt or unreadable entry is a miss. Errors of `compute` are
    /// returned as is and leave the storage untouched.
    pub async fn read<T, E, F, Fut>(&self, key: &str, policy: ReadPolicy, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CheckpointError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !policy.force_recompute {
            if let Some(value) = self.load(key).await {
                debug!("checkpoint hit: {}", key);
                return Ok(value);
            }
        }

        let value = compute().await?;
        if policy.persist {
            self.write(key, &value).await?;
        }
        Ok(value)
    }

    /// The entry under `key`, if present and readable.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.storage.load(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!("unable to read checkpoint '{}': {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("ignoring corrupt checkpoint '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CheckpointError> {
        if !self.output_data {
            return Ok(());
        }
        let payload = serde_json::to_vec_pretty(value).map_err(|source| CheckpointError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.storage.save(key, &payload).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CheckpointError> {
        if !self.output_data {
            return Ok(());
        }
        self.storage.remove(key).await
    }
}
