//! JSON-typed values on top of the persistence engine.
//!
//! Structured values are stored as JSON text. Absence stays absence: writing
//! `None` removes the key rather than storing `"null"`, and reading an absent,
//! empty or `"null"` value yields the caller's default.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::cache::{PersistenceEngine, Subscription};
use crate::storage::{StorageError, StorageOp};

/// What to do when a stored value does not decode as the requested type.
///
/// The key is cleared in every case; the policy only decides how loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Log at error level and return the failure to the caller.
    Surface,
    /// Log at warn level and fall back to the default.
    Warn,
    /// Fall back to the default without logging.
    Silent,
}

impl Default for DecodeFailurePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Surface
        } else {
            Self::Silent
        }
    }
}

impl FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "warn" => Ok(Self::Warn),
            "silent" => Ok(Self::Silent),
            other => Err(format!(
                "unknown decode failure policy `{other}` (expected surface, warn or silent)"
            )),
        }
    }
}

impl fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Surface => "surface",
            Self::Warn => "warn",
            Self::Silent => "silent",
        })
    }
}

#[derive(Debug, Error)]
pub enum ObjectStateError {
    #[error("failed to decode stored value for `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Object-typed view of a [`PersistenceEngine`].
#[derive(Debug, Clone)]
pub struct ObjectState {
    engine: PersistenceEngine,
    policy: DecodeFailurePolicy,
}

impl ObjectState {
    pub fn new(engine: PersistenceEngine) -> Self {
        Self {
            engine,
            policy: DecodeFailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }

    pub fn policy(&self) -> DecodeFailurePolicy {
        self.policy
    }

    /// Read `key` as `T`, waiting out a pending load.
    ///
    /// A value that fails to decode is removed from the cache and the backend
    /// before the policy is applied.
    pub async fn read_object<T>(&self, key: &str, default: T) -> Result<T, ObjectStateError>
    where
        T: DeserializeOwned,
    {
        let raw = self.engine.get_raw(key).await?;
        let Some(text) = present(raw.as_deref()) else {
            return Ok(default);
        };

        match serde_json::from_str(text) {
            Ok(value) => Ok(value),
            Err(source) => {
                if let Err(error) = self.engine.write(key, None).await {
                    warn!(key, error = %error, "failed to clear undecodable value");
                }
                report_decode_failure(self.policy, key, &source);
                match self.policy {
                    DecodeFailurePolicy::Surface => Err(ObjectStateError::Decode {
                        key: key.to_string(),
                        source,
                    }),
                    DecodeFailurePolicy::Warn | DecodeFailurePolicy::Silent => Ok(default),
                }
            }
        }
    }

    /// Encode `value` as JSON and write it; `None` removes the key.
    pub fn write_object<T>(
        &self,
        key: &str,
        value: Option<&T>,
    ) -> Result<StorageOp<()>, ObjectStateError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = value
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| ObjectStateError::Encode {
                key: key.to_string(),
                source,
            })?;
        Ok(self.engine.write(key, encoded))
    }

    /// Observe `key` as `T`. Absence is delivered as `None`.
    ///
    /// A value that does not decode is reported per policy and the key is
    /// cleared, which reaches `callback` as `None`.
    pub fn subscribe_object<T, F>(&self, key: &str, callback: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        let policy = self.policy;
        let owned_key = key.to_string();
        let engine = self.engine.downgrade();
        self.engine.subscribe(key, move |raw| match present(raw) {
            None => callback(None),
            Some(text) => match serde_json::from_str(text) {
                Ok(value) => callback(Some(value)),
                Err(source) => {
                    report_decode_failure(policy, &owned_key, &source);
                    if let Some(engine) = engine.upgrade() {
                        let _ = engine.write(&owned_key, None);
                    }
                }
            },
        })
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.filter(|text| !text.is_empty() && *text != "null")
}

fn report_decode_failure(policy: DecodeFailurePolicy, key: &str, source: &serde_json::Error) {
    match policy {
        DecodeFailurePolicy::Surface => {
            error!(key, error = %source, "failed to deserialize stored value");
        }
        DecodeFailurePolicy::Warn => {
            warn!(key, error = %source, "discarding undecodable stored value");
        }
        DecodeFailurePolicy::Silent => {}
    }
}
