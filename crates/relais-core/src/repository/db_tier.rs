//! L3 base tier: prepared parameterized statements against PostgreSQL.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use relais_error::{DbError, Result};

use crate::db::{DbProvider, FieldUpdate};
use crate::entity::{EntityKey, EntityMapping};

use super::tier::Tier;

/// Terminal tier: issues the entity's generated SQL templates through the
/// database provider. No caching.
pub struct DbTier<E: EntityMapping> {
    db: Arc<dyn DbProvider>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: EntityMapping> DbTier<E> {
    pub fn new(db: Arc<dyn DbProvider>) -> Self {
        Self { db, _marker: PhantomData }
    }

    pub fn provider(&self) -> &Arc<dyn DbProvider> {
        &self.db
    }
}

#[async_trait]
impl<E: EntityMapping> Tier<E> for DbTier<E> {
    async fn find(&self, key: &E::Key) -> Result<Option<Arc<E>>> {
        let rows = self.db.query_params(E::SELECT_BY_PK, &key.to_params()).await?;
        match rows.first() {
            Some(row) => Ok(Some(Arc::new(E::from_row(row)?))),
            None => Ok(None),
        }
    }

    async fn insert(&self, entity: E) -> Result<Arc<E>> {
        let rows = self
            .db
            .query_params(E::INSERT_RETURNING, &entity.insert_params())
            .await?;
        let row = rows.first().ok_or(DbError::NoRows)?;
        Ok(Arc::new(E::from_row(row)?))
    }

    async fn update(&self, _key: &E::Key, entity: E) -> Result<bool> {
        let affected = self.db.execute(E::UPDATE_BY_PK, &entity.update_params()).await?;
        Ok(affected > 0)
    }

    async fn patch(&self, key: &E::Key, updates: &[FieldUpdate]) -> Result<Option<Arc<E>>> {
        if updates.is_empty() {
            return self.find(key).await;
        }
        let (mut sql, params) = E::build_patch_sql(key, updates);
        sql.push_str(" RETURNING *");
        let rows = self.db.query_dyn(&sql, &params).await?;
        match rows.first() {
            Some(row) => Ok(Some(Arc::new(E::from_row(row)?))),
            None => Ok(None),
        }
    }

    async fn erase_with_hint(&self, key: &E::Key, hint: Option<Arc<E>>) -> Result<u64> {
        if let (Some(sql), Some(entity)) = (E::DELETE_BY_PK_WITH_HINT, hint) {
            let mut params = key.to_params();
            params.extend(entity.partition_hint_params());
            return self.db.execute(sql, &params).await;
        }
        self.db.execute(E::DELETE_BY_PK, &key.to_params()).await
    }

    async fn invalidate(&self, _key: &E::Key) {}
}
