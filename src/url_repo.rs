use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, DbErr, EntityTrait, PaginatorTrait, QueryFilter, SqlErr,
    sea_query::{Expr, ExprTrait},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{config::db_conn_capsule, orm::short_url, short_code::ShortCode};

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

/// A persisted short code together with the URL it points to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMapping {
    /// Assigned by the store; not meant for clients.
    pub id: i64,
    pub original_url: String,
    pub short_code: ShortCode,
    pub created_at: OffsetDateTime,
    pub hit_count: u64,
}

/// A mapping that has not been stored yet; its hit count starts at 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUrlMapping {
    pub original_url: String,
    pub short_code: ShortCode,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum InsertUrlError {
    #[error("short code {0} is already taken")]
    DuplicateCode(ShortCode),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlMapping>>;

    async fn exists(&self, code: &ShortCode) -> anyhow::Result<bool>;

    /// Stores `mapping`, failing with [`InsertUrlError::DuplicateCode`] when its
    /// short code was taken in the meantime.
    async fn insert(&self, mapping: NewUrlMapping) -> Result<UrlMapping, InsertUrlError>;

    /// Adds one to the hit count of `code` as a single store-side update.
    async fn increment_hit_count(&self, code: &ShortCode) -> anyhow::Result<()>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlMapping>> {
        short_url::Entity::find()
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .one(&self.db)
            .await
            .context("Failed to look up short code")?
            .map(UrlMapping::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn exists(&self, code: &ShortCode) -> anyhow::Result<bool> {
        let count = short_url::Entity::find()
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .count(&self.db)
            .await
            .context("Failed to check short code existence")?;
        Ok(count > 0)
    }

    #[instrument(skip(self))]
    async fn insert(&self, mapping: NewUrlMapping) -> Result<UrlMapping, InsertUrlError> {
        let to_insert = short_url::ActiveModel {
            id: NotSet,
            original_url: Set(mapping.original_url),
            short_code: Set(mapping.short_code.as_str().to_owned()),
            created_at: Set(mapping.created_at),
            hit_count: Set(0),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => UrlMapping::try_from(model).map_err(InsertUrlError::Internal),
            Err(err) => Err(insert_error(err, mapping.short_code)),
        }
    }

    #[instrument(skip(self))]
    async fn increment_hit_count(&self, code: &ShortCode) -> anyhow::Result<()> {
        let result = short_url::Entity::update_many()
            .col_expr(
                short_url::Column::HitCount,
                Expr::col(short_url::Column::HitCount).add(1),
            )
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .exec(&self.db)
            .await
            .context("Failed to increment hit count")?;

        if result.rows_affected == 0 {
            return Err(anyhow!("No URL mapping found for short code {code}"));
        }
        Ok(())
    }
}

/// Only a driver error with SQLSTATE 23505 counts as a lost race for `code`.
///
/// sea-orm recognizes that by downcasting to sqlx's `PgDatabaseError`, which
/// can only come off a live Postgres connection, so `MockDatabase` can never
/// produce a duplicate; the in-memory repository covers that path instead.
fn insert_error(err: DbErr, code: ShortCode) -> InsertUrlError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => InsertUrlError::DuplicateCode(code),
        _ => InsertUrlError::Internal(
            anyhow::Error::new(err).context("Failed to insert URL mapping"),
        ),
    }
}

impl TryFrom<short_url::Model> for UrlMapping {
    type Error = anyhow::Error;

    fn try_from(
        short_url::Model {
            id,
            original_url,
            short_code,
            created_at,
            hit_count,
        }: short_url::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            id,
            original_url,
            short_code: ShortCode::new(short_code).context("Stored short code is invalid")?,
            created_at,
            hit_count: u64::try_from(hit_count).context("Stored hit count is negative")?,
        })
    }
}
