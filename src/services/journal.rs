use super::blob::BlobStore;
use crate::error::RegistryResult;
use log::{debug, warn};

enum Compensation {
    /// The key did not exist before; remove it.
    Remove { key: String },
    /// The key was overwritten; put the old bytes back.
    Restore { key: String, previous: Vec<u8> },
}

impl Compensation {
    fn key(&self) -> &str {
        match self {
            Compensation::Remove { key } | Compensation::Restore { key, .. } => key,
        }
    }
}

/// Records the blob writes of one multi-step operation so they can be
/// undone when a later step fails.
///
/// ```ignore
/// let mut journal = WriteJournal::new(blobs);
/// let result = async {
///     journal.upload(&key, bytes).await?;
///     store.transaction(|conn| ...)
/// }
/// .await;
/// journal.finish(result).await
/// ```
pub struct WriteJournal<'a> {
    blobs: &'a dyn BlobStore,
    compensations: Vec<Compensation>,
}

impl<'a> WriteJournal<'a> {
    pub fn new(blobs: &'a dyn BlobStore) -> Self {
        Self {
            blobs,
            compensations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Uploads `bytes` under `key`, remembering how to undo it.
    pub async fn upload(&mut self, key: &str, bytes: &[u8]) -> RegistryResult<()> {
        let compensation = if self.blobs.exists(key).await {
            match self.blobs.download(key).await {
                Ok(previous) => Some(Compensation::Restore {
                    key: key.to_string(),
                    previous,
                }),
                Err(e) => {
                    // Removing would lose the old bytes as well, so leave the key alone on rollback
                    warn!("Could not read existing blob {key} before overwrite: {e}");
                    None
                }
            }
        } else {
            Some(Compensation::Remove {
                key: key.to_string(),
            })
        };

        self.blobs.upload(key, bytes).await?;
        self.compensations.extend(compensation);
        Ok(())
    }

    /// Passes `result` through, undoing every recorded write first if it
    /// is an error. Compensation failures are logged, never returned.
    pub async fn finish<T>(self, result: RegistryResult<T>) -> RegistryResult<T> {
        if result.is_err() {
            self.rollback().await;
        }
        result
    }

    /// Undoes recorded writes, most recent first.
    pub async fn rollback(self) {
        for compensation in self.compensations.into_iter().rev() {
            let outcome = match &compensation {
                Compensation::Remove { key } => self.blobs.delete(key).await,
                Compensation::Restore { key, previous } => self.blobs.upload(key, previous).await,
            };

            match outcome {
                Ok(()) => debug!("Rolled back blob write for {}", compensation.key()),
                Err(e) => warn!(
                    "Failed to roll back blob write for {}: {e}",
                    compensation.key()
                ),
            }
        }
    }
}
