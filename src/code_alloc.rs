use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::{
    request_ctx::{Cancelled, RequestContext},
    short_code::{CodeGenerator, ShortCode},
    url_repo::UrlRepository,
};

/// Collisions tolerated before giving up on a single allocation.
///
/// Ten collisions in a row among 62^6 codes means the keyspace is close to
/// full or the random source is broken; revisit if the code length changes.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum AllocateError {
    #[error("could not find a free short code after {attempts} attempts")]
    ExhaustedRetries { attempts: usize },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

/// Finds short codes that are not in the store yet.
///
/// The existence check and the caller's later insert are not atomic; the
/// store's unique constraint settles any race in between.
pub struct CodeAllocator {
    generator: Arc<dyn CodeGenerator>,
    url_repo: Arc<dyn UrlRepository>,
    max_attempts: usize,
}

impl CodeAllocator {
    #[must_use]
    pub fn new(generator: Arc<dyn CodeGenerator>, url_repo: Arc<dyn UrlRepository>) -> Self {
        Self {
            generator,
            url_repo,
            max_attempts: MAX_ALLOCATION_ATTEMPTS,
        }
    }

    /// # Errors
    /// Will return [`Err`] when every attempt collided, the store failed, or
    /// `ctx` was cancelled.
    #[instrument(skip(self, ctx))]
    pub async fn allocate(&self, ctx: &RequestContext) -> Result<ShortCode, AllocateError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.generate();

            let taken = ctx
                .run(self.url_repo.exists(&candidate))
                .await?
                .map_err(|err| {
                    AllocateError::Internal(err.context("Failed to check short code availability"))
                })?;

            if !taken {
                debug!(%candidate, attempt, "Allocated short code");
                return Ok(candidate);
            }
            warn!(%candidate, attempt, "Generated short code that was already taken");
        }

        error!(
            attempts = self.max_attempts,
            "Exhausted short code allocation attempts; keyspace may be nearly full or the random source broken"
        );
        Err(AllocateError::ExhaustedRetries {
            attempts: self.max_attempts,
        })
    }
}
