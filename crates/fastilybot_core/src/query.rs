use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cache::{Cache, CacheKey, get_or_fetch};
use crate::client::WikiReadApi;
use crate::resolve::ResolveError;
use crate::title::{Namespace, Title};

/// Category and transclusion lookups scoped through a short-lived cache.
#[derive(Clone)]
pub struct QueryCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn category_members<W>(
        &self,
        wiki: &mut W,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>>
    where
        W: WikiReadApi + ?Sized,
    {
        if !title.is_in(Namespace::Category) {
            return Err(ResolveError::NotACategory(title.to_string()).into());
        }
        let key = CacheKey::query(wiki.domain(), title, namespaces);
        get_or_fetch(self.cache.as_ref(), &key, self.ttl, || {
            wiki.category_members(title, namespaces)
        })
    }

    /// Pages embedding `title`. Template lookups must pass the `Template:`-prefixed title.
    pub fn what_transcludes_here<W>(
        &self,
        wiki: &mut W,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>>
    where
        W: WikiReadApi + ?Sized,
    {
        let key = CacheKey::query(wiki.domain(), title, namespaces);
        get_or_fetch(self.cache.as_ref(), &key, self.ttl, || {
            wiki.what_transcludes_here(title, namespaces)
        })
    }
}

/// The subset of `titles` whose existence equals `existent`, from one batched lookup.
pub fn exists_filter<W>(wiki: &mut W, titles: &[Title], existent: bool) -> Result<HashSet<Title>>
where
    W: WikiReadApi + ?Sized,
{
    if titles.is_empty() {
        return Ok(HashSet::new());
    }
    let status = wiki.exists(titles)?;
    Ok(titles
        .iter()
        .filter(|title| status.get(*title).copied().unwrap_or(false) == existent)
        .cloned()
        .collect())
}
