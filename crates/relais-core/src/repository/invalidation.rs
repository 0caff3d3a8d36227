//! Declarative cross-repository invalidation.
//!
//! A repository lists zero or more rules; each rule names a target and a
//! key extractor. Rules fire after the owning repository's write has
//! fully completed, and their failures are logged, never propagated. The
//! graph is evaluated once per write - targets of targets are not
//! recursively invalidated.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::entity::Entity;

/// A target reachable by key invalidation: drops the key from the
/// target's cache tiers without touching its own rules (no recursion).
#[async_trait]
pub trait KeyInvalidatable<K>: Send + Sync {
    async fn invalidate_key(&self, key: &K);
}

/// A list-enabled target over the same entity type: forwards the written
/// entity so the target applies its own sort-bounds-driven logic.
#[async_trait]
pub trait ListNotifiable<E>: Send + Sync {
    async fn notify_created(&self, entity: &E);
    async fn notify_updated(&self, old: &E, new: &E);
    async fn notify_deleted(&self, entity: &E);
}

/// A list-enabled target addressed by group key (entity types unrelated).
#[async_trait]
pub trait GroupInvalidatable: Send + Sync {
    /// Selectively invalidate one group using a sort value.
    async fn invalidate_group_for(&self, group_key: &str, sort_value: i64);
    /// Invalidate every cached list group.
    async fn invalidate_all_groups(&self);
}

/// One declared dependency edge, type-erased over the target.
#[async_trait]
pub trait InvalidationTarget<E: Entity>: Send + Sync {
    async fn on_created(&self, entity: &Arc<E>);
    async fn on_updated(&self, old: Option<&Arc<E>>, new: &Arc<E>);
    async fn on_deleted(&self, entity: &Arc<E>);
}

type SyncExtractor<E, K> = Box<dyn Fn(&E) -> Vec<K> + Send + Sync>;
type AsyncExtractor<E, K> = Box<dyn Fn(Arc<E>) -> BoxFuture<'static, Vec<K>> + Send + Sync>;

enum Extractor<E, K> {
    Sync(SyncExtractor<E, K>),
    Resolver(AsyncExtractor<E, K>),
}

impl<E: Entity, K> Extractor<E, K> {
    async fn keys(&self, entity: &Arc<E>) -> Vec<K> {
        match self {
            Self::Sync(f) => f(entity),
            Self::Resolver(f) => f(entity.clone()).await,
        }
    }
}

struct KeyRule<E: Entity, K> {
    target: Arc<dyn KeyInvalidatable<K>>,
    extract: Extractor<E, K>,
}

#[async_trait]
impl<E: Entity, K: Send + Sync + 'static> InvalidationTarget<E> for KeyRule<E, K> {
    async fn on_created(&self, entity: &Arc<E>) {
        for key in self.extract.keys(entity).await {
            self.target.invalidate_key(&key).await;
        }
    }

    async fn on_updated(&self, old: Option<&Arc<E>>, new: &Arc<E>) {
        if let Some(old) = old {
            for key in self.extract.keys(old).await {
                self.target.invalidate_key(&key).await;
            }
        }
        for key in self.extract.keys(new).await {
            self.target.invalidate_key(&key).await;
        }
    }

    async fn on_deleted(&self, entity: &Arc<E>) {
        for key in self.extract.keys(entity).await {
            self.target.invalidate_key(&key).await;
        }
    }
}

/// Direct rule: extract the target's key(s) from the written entity.
pub fn invalidate_key<E, K>(
    target: Arc<dyn KeyInvalidatable<K>>,
    extract: impl Fn(&E) -> Vec<K> + Send + Sync + 'static,
) -> Box<dyn InvalidationTarget<E>>
where
    E: Entity,
    K: Send + Sync + 'static,
{
    Box::new(KeyRule { target, extract: Extractor::Sync(Box::new(extract)) })
}

/// Resolver rule: the key is not present on the written entity and must
/// be looked up asynchronously (e.g. through a join).
pub fn invalidate_key_resolved<E, K>(
    target: Arc<dyn KeyInvalidatable<K>>,
    resolve: impl Fn(Arc<E>) -> BoxFuture<'static, Vec<K>> + Send + Sync + 'static,
) -> Box<dyn InvalidationTarget<E>>
where
    E: Entity,
    K: Send + Sync + 'static,
{
    Box::new(KeyRule { target, extract: Extractor::Resolver(Box::new(resolve)) })
}

struct ListRule<E: Entity> {
    target: Arc<dyn ListNotifiable<E>>,
}

#[async_trait]
impl<E: Entity> InvalidationTarget<E> for ListRule<E> {
    async fn on_created(&self, entity: &Arc<E>) {
        self.target.notify_created(entity).await;
    }

    async fn on_updated(&self, old: Option<&Arc<E>>, new: &Arc<E>) {
        match old {
            Some(old) => self.target.notify_updated(old, new).await,
            None => self.target.notify_created(new).await,
        }
    }

    async fn on_deleted(&self, entity: &Arc<E>) {
        self.target.notify_deleted(entity).await;
    }
}

/// List-target rule: forwards writes to the target's `notify_*` entry
/// points so its list cache applies selective invalidation.
pub fn invalidate_list<E: Entity>(
    target: Arc<dyn ListNotifiable<E>>,
) -> Box<dyn InvalidationTarget<E>> {
    Box::new(ListRule { target })
}

type GroupResolver<E> = Box<dyn Fn(Arc<E>) -> BoxFuture<'static, Option<String>> + Send + Sync>;
type SortValueFn<E> = Box<dyn Fn(&E) -> i64 + Send + Sync>;

struct ListGroupRule<E: Entity> {
    target: Arc<dyn GroupInvalidatable>,
    resolve: GroupResolver<E>,
    sort_value: SortValueFn<E>,
}

impl<E: Entity> ListGroupRule<E> {
    async fn fire(&self, entity: &Arc<E>) {
        match (self.resolve)(entity.clone()).await {
            Some(group_key) => {
                self.target
                    .invalidate_group_for(&group_key, (self.sort_value)(entity))
                    .await;
            }
            None => self.target.invalidate_all_groups().await,
        }
    }
}

#[async_trait]
impl<E: Entity> InvalidationTarget<E> for ListGroupRule<E> {
    async fn on_created(&self, entity: &Arc<E>) {
        self.fire(entity).await;
    }

    async fn on_updated(&self, old: Option<&Arc<E>>, new: &Arc<E>) {
        if let Some(old) = old {
            self.fire(old).await;
        }
        self.fire(new).await;
    }

    async fn on_deleted(&self, entity: &Arc<E>) {
        self.fire(entity).await;
    }
}

/// List-group rule: the resolver returns the target group key (`None`
/// meaning every group); the group is invalidated selectively using the
/// written entity's sort value.
pub fn invalidate_list_group<E: Entity>(
    target: Arc<dyn GroupInvalidatable>,
    resolve: impl Fn(Arc<E>) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    sort_value: impl Fn(&E) -> i64 + Send + Sync + 'static,
) -> Box<dyn InvalidationTarget<E>> {
    Box::new(ListGroupRule {
        target,
        resolve: Box::new(resolve),
        sort_value: Box::new(sort_value),
    })
}
