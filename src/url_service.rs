use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    code_alloc::{AllocateError, CodeAllocator},
    request_ctx::{Cancelled, RequestContext},
    short_code::{CodeGenerator, RandomCodeGenerator, ShortCode},
    url_repo::{InsertUrlError, NewUrlMapping, UrlMapping, UrlRepository, url_repository_capsule},
};

/// Longest original URL that will be shortened, in characters.
pub const MAX_URL_LEN: usize = 2048;

/// How many times a whole shorten call is attempted when its insert loses a
/// race for the allocated code.
pub const SHORTEN_ATTEMPTS: usize = 2;

pub fn url_mapping_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlMappingService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    Arc::new(UrlMappingServiceImpl::new(
        url_repo,
        Arc::new(RandomCodeGenerator),
    ))
}

#[async_trait]
pub trait UrlMappingService: Send + Sync {
    async fn shorten(
        &self,
        ctx: &RequestContext,
        original_url: &str,
    ) -> Result<UrlMapping, ShortenError>;

    /// Looks up `code` without counting a hit.
    async fn get_info(&self, ctx: &RequestContext, code: &str) -> Result<UrlMapping, LookupError>;

    /// Looks up `code` and schedules a hit for it, returning the original URL
    /// without waiting for the hit to be stored.
    async fn resolve_and_record_hit(
        &self,
        ctx: &RequestContext,
        code: &str,
    ) -> Result<String, LookupError>;

    /// Waits for every hit scheduled so far to be stored (or to fail).
    async fn wait_for_pending_hits(&self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("URL cannot be empty")]
    Empty,
    #[error("URL must be at most {MAX_URL_LEN} characters, got {actual}")]
    TooLong { actual: usize },
    #[error("URL must start with http:// or https://")]
    UnsupportedScheme,
    #[error("URL must have a non-empty remainder after the scheme")]
    MissingRemainder,
    #[error("URL must not contain control characters")]
    ControlCharacter,
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("could not find a free short code after {attempts} attempts")]
    ExhaustedRetries { attempts: usize },
    #[error("lost the race for a short code {attempts} times in a row")]
    AllocationConflict { attempts: usize },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no URL found for short code {0}")]
    NotFound(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

impl From<AllocateError> for ShortenError {
    fn from(err: AllocateError) -> Self {
        match err {
            AllocateError::ExhaustedRetries { attempts } => Self::ExhaustedRetries { attempts },
            AllocateError::Cancelled(cancelled) => Self::Cancelled(cancelled),
            AllocateError::Internal(err) => Self::Internal(err),
        }
    }
}

/// Checks that `url` looks like `^(https?)://.+` and fits in [`MAX_URL_LEN`].
///
/// # Errors
/// Will return [`Err`] describing the first rule `url` breaks.
pub fn validate_url(url: &str) -> Result<(), UrlValidationError> {
    if url.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let len = url.chars().count();
    if len > MAX_URL_LEN {
        return Err(UrlValidationError::TooLong { actual: len });
    }

    let remainder = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or(UrlValidationError::UnsupportedScheme)?;

    if remainder.is_empty() {
        return Err(UrlValidationError::MissingRemainder);
    }
    // Stored URLs are echoed back in a Location header
    if remainder.chars().any(|c| c.is_ascii_control()) {
        return Err(UrlValidationError::ControlCharacter);
    }
    Ok(())
}

pub struct UrlMappingServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    allocator: CodeAllocator,
    pending_hits: TaskTracker,
}

impl UrlMappingServiceImpl {
    #[must_use]
    pub fn new(url_repo: Arc<dyn UrlRepository>, generator: Arc<dyn CodeGenerator>) -> Self {
        Self {
            allocator: CodeAllocator::new(generator, Arc::clone(&url_repo)),
            url_repo,
            pending_hits: TaskTracker::new(),
        }
    }

    async fn lookup(&self, ctx: &RequestContext, code: &str) -> Result<UrlMapping, LookupError> {
        // NOTE: anything that can't be a short code can't be stored either
        let Ok(short_code) = ShortCode::new(code.to_owned()) else {
            debug!(code, "Rejected malformed short code");
            return Err(LookupError::NotFound(code.to_owned()));
        };

        match ctx.run(self.url_repo.find_by_code(&short_code)).await? {
            Ok(Some(mapping)) => Ok(mapping),
            Ok(None) => Err(LookupError::NotFound(code.to_owned())),
            Err(err) => {
                error!(code, ?err, "Failed to look up short code");
                Err(LookupError::Internal(
                    err.context("Failed to look up short code"),
                ))
            }
        }
    }

    fn schedule_hit(&self, ctx: &RequestContext, code: ShortCode) {
        let url_repo = Arc::clone(&self.url_repo);
        let ctx = ctx.clone();
        self.pending_hits.spawn(async move {
            match ctx.run(url_repo.increment_hit_count(&code)).await {
                Ok(Ok(())) => debug!(%code, "Recorded hit"),
                Ok(Err(err)) => error!(%code, ?err, "Failed to record hit"),
                Err(cancelled) => warn!(%code, %cancelled, "Hit was not recorded"),
            }
        });
    }
}

#[async_trait]
impl UrlMappingService for UrlMappingServiceImpl {
    #[instrument(skip(self, ctx))]
    async fn shorten(
        &self,
        ctx: &RequestContext,
        original_url: &str,
    ) -> Result<UrlMapping, ShortenError> {
        validate_url(original_url)?;

        for attempt in 1..=SHORTEN_ATTEMPTS {
            let short_code = self.allocator.allocate(ctx).await.inspect_err(|err| {
                if let AllocateError::Internal(err) = err {
                    error!(?err, "Encountered internal error while allocating short code");
                }
            })?;

            let to_insert = NewUrlMapping {
                original_url: original_url.to_owned(),
                short_code,
                created_at: OffsetDateTime::now_utc(),
            };

            match ctx.run(self.url_repo.insert(to_insert)).await? {
                Ok(mapping) => {
                    info!(code = %mapping.short_code, "URL shortened");
                    return Ok(mapping);
                }
                Err(InsertUrlError::DuplicateCode(code)) => {
                    warn!(%code, attempt, "Lost the race for an allocated short code");
                }
                Err(InsertUrlError::Internal(err)) => {
                    error!(?err, "Encountered internal error while inserting URL mapping");
                    return Err(ShortenError::Internal(
                        err.context("Failed to insert URL mapping"),
                    ));
                }
            }
        }

        Err(ShortenError::AllocationConflict {
            attempts: SHORTEN_ATTEMPTS,
        })
    }

    #[instrument(skip(self, ctx))]
    async fn get_info(&self, ctx: &RequestContext, code: &str) -> Result<UrlMapping, LookupError> {
        self.lookup(ctx, code).await
    }

    #[instrument(skip(self, ctx))]
    async fn resolve_and_record_hit(
        &self,
        ctx: &RequestContext,
        code: &str,
    ) -> Result<String, LookupError> {
        let UrlMapping {
            original_url,
            short_code,
            ..
        } = self.lookup(ctx, code).await?;

        self.schedule_hit(ctx, short_code);
        Ok(original_url)
    }

    async fn wait_for_pending_hits(&self) {
        self.pending_hits.close();
        self.pending_hits.wait().await;
        self.pending_hits.reopen();
    }
}
