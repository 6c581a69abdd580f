// Cache-aware accessors: one entry point per entity type, each bound to a
// TTL and a tag set. The CMS is only contacted on a cache miss.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{build_key, CacheConfig, ContentCache};
use crate::client::{CmsClient, ContentSource, EnvCredentials};
use crate::config::{CmsSettings, TtlTable};
use crate::entity::{Entity, EntityKind};
use crate::error::{ContentError, ContentResult};
use crate::normalize::{normalize, normalize_list, AssetResolver};
use crate::query::QueryOptions;

#[derive(Debug, Clone, PartialEq)]
pub enum CachedContent {
    Item(Option<Entity>),
    List(Vec<Entity>),
}

impl CachedContent {
    fn into_list(self) -> Vec<Entity> {
        match self {
            CachedContent::List(items) => items,
            CachedContent::Item(item) => item.into_iter().collect(),
        }
    }

    fn into_item(self) -> Option<Entity> {
        match self {
            CachedContent::Item(item) => item,
            CachedContent::List(items) => items.into_iter().next(),
        }
    }
}

pub struct ContentService {
    source: Arc<dyn ContentSource>,
    cache: Arc<ContentCache<CachedContent>>,
    assets: AssetResolver,
    ttl: TtlTable,
}

impl ContentService {
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: Arc<ContentCache<CachedContent>>,
        assets: AssetResolver,
        ttl: TtlTable,
    ) -> Self {
        Self {
            source,
            cache,
            assets,
            ttl,
        }
    }

    // Wires the HTTP client, cache and asset resolver from settings
    pub fn from_settings(settings: &CmsSettings) -> ContentResult<Self> {
        settings.validate()?;
        let client = CmsClient::new(
            &settings.base_url,
            Duration::from_millis(settings.request_timeout_ms),
            Arc::new(EnvCredentials::new(&settings.token_env)),
        )?;
        let cache = ContentCache::new(CacheConfig {
            max_entries: settings.cache.max_entries,
        });
        let mut assets = AssetResolver::new(settings.asset_base());
        if let Some(transform) = &settings.image {
            assets = assets.with_transform(transform.clone());
        }
        info!(base_url = %settings.base_url, "content service configured");
        Ok(Self::new(
            Arc::new(client),
            Arc::new(cache),
            assets,
            settings.ttl.clone(),
        ))
    }

    pub fn cache(&self) -> &Arc<ContentCache<CachedContent>> {
        &self.cache
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    pub async fn fetch_hotels(
        &self,
        options: QueryOptions,
        locale: &str,
    ) -> ContentResult<Vec<Entity>> {
        self.fetch_list(EntityKind::Hotel, options, locale, None).await
    }

    pub async fn fetch_hotel_by_slug(&self, slug: &str, locale: &str) -> ContentResult<Option<Entity>> {
        self.fetch_by_slug(EntityKind::Hotel, slug, locale).await
    }

    pub async fn fetch_destinations(
        &self,
        options: QueryOptions,
        locale: &str,
    ) -> ContentResult<Vec<Entity>> {
        self.fetch_list(EntityKind::Destination, options, locale, None)
            .await
    }

    pub async fn fetch_destination_by_slug(
        &self,
        slug: &str,
        locale: &str,
    ) -> ContentResult<Option<Entity>> {
        self.fetch_by_slug(EntityKind::Destination, slug, locale).await
    }

    pub async fn fetch_categories(
        &self,
        options: QueryOptions,
        locale: &str,
    ) -> ContentResult<Vec<Entity>> {
        self.fetch_list(EntityKind::Category, options, locale, None).await
    }

    pub async fn fetch_category_by_slug(
        &self,
        slug: &str,
        locale: &str,
    ) -> ContentResult<Option<Entity>> {
        self.fetch_by_slug(EntityKind::Category, slug, locale).await
    }

    pub async fn fetch_pages(&self, options: QueryOptions, locale: &str) -> ContentResult<Vec<Entity>> {
        self.fetch_list(EntityKind::Page, options, locale, None).await
    }

    pub async fn fetch_page_by_slug(&self, slug: &str, locale: &str) -> ContentResult<Option<Entity>> {
        self.fetch_by_slug(EntityKind::Page, slug, locale).await
    }

    pub async fn fetch_navigation(&self, locale: &str) -> ContentResult<Vec<Entity>> {
        let options = QueryOptions::new().sort(["sort"]);
        self.fetch_list(EntityKind::Navigation, options, locale, None)
            .await
    }

    // UI string records for one locale
    pub async fn fetch_translations(&self, locale: &str) -> ContentResult<Vec<Entity>> {
        let options = QueryOptions::new()
            .filter_eq("languages_code", locale)
            .limit(-1);
        self.fetch_list(EntityKind::Translation, options, locale, Some(locale))
            .await
    }

    pub async fn fetch_translation_strings(
        &self,
        locale: &str,
    ) -> ContentResult<BTreeMap<String, String>> {
        let records = self.fetch_translations(locale).await?;
        Ok(records
            .iter()
            .filter_map(|record| {
                let key = record.get("key")?.as_str()?;
                let value = match record.get("value")? {
                    Value::String(s) => s.clone(),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                Some((key.to_string(), value))
            })
            .collect())
    }

    /// Drops cached content for an entity type, or for one entity of it.
    ///
    /// Lists always carry the type tag, so a single-entity invalidation also
    /// clears the lists that might contain it. Returns the number of entries
    /// removed.
    pub fn invalidate_entity_cache(&self, kind: EntityKind, id: Option<&str>) -> usize {
        let tags = kind.tags_for(id);
        let removed = self.cache.invalidate(&tags);
        info!(entity = %kind, id, removed, "invalidated entity cache");
        removed
    }

    // Preloads the list views a page render needs for `locale`
    pub async fn warm(&self, locale: &str) -> ContentResult<()> {
        futures::try_join!(
            self.fetch_hotels(QueryOptions::new(), locale),
            self.fetch_destinations(QueryOptions::new(), locale),
            self.fetch_categories(QueryOptions::new(), locale),
            self.fetch_navigation(locale),
            self.fetch_translations(locale),
        )?;
        debug!(locale, "content cache warmed");
        Ok(())
    }

    async fn fetch_list(
        &self,
        kind: EntityKind,
        options: QueryOptions,
        locale: &str,
        scope: Option<&str>,
    ) -> ContentResult<Vec<Entity>> {
        let options = self.prepare(kind, options, locale)?;
        let key = build_key(kind.collection(), locale, &options);
        let tags = kind.tags_for(scope);

        let content = self
            .cache
            .get_or_compute(&key, self.ttl.list(kind), &tags, || async {
                let params = options.to_params()?;
                let payload = self.source.fetch(&kind.endpoint(), &params).await?;
                let items = normalize_list(
                    &payload.into_list(),
                    locale,
                    kind.image_fields(),
                    &self.assets,
                );
                Ok::<_, ContentError>(CachedContent::List(items))
            })
            .await?;
        Ok(content.into_list())
    }

    async fn fetch_by_slug(
        &self,
        kind: EntityKind,
        slug: &str,
        locale: &str,
    ) -> ContentResult<Option<Entity>> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Ok(None);
        }

        let options = QueryOptions::new().filter_eq("slug", slug).limit(1);
        let options = self.prepare(kind, options, locale)?;
        let key = build_key(&kind.to_string(), locale, &options);
        let tags = kind.tags_for(Some(slug));

        let content = self
            .cache
            .get_or_compute(&key, self.ttl.item(kind), &tags, || async {
                let params = options.to_params()?;
                let payload = self.source.fetch(&kind.endpoint(), &params).await?;
                let raw = payload.into_first();
                if raw.is_none() {
                    debug!(entity = %kind, slug, "no record for slug");
                }
                Ok::<_, ContentError>(CachedContent::Item(normalize(
                    raw.as_ref(),
                    locale,
                    kind.image_fields(),
                    &self.assets,
                )))
            })
            .await?;
        Ok(content.into_item())
    }

    // Default field selection and locale-scoped translations
    fn prepare(
        &self,
        kind: EntityKind,
        mut options: QueryOptions,
        locale: &str,
    ) -> ContentResult<QueryOptions> {
        kind.check_fields(&options.fields)?;
        if options.fields.is_empty() {
            options.fields = kind.default_fields();
        }
        if kind.has_translations() && !options.deep.contains_key("translations") {
            options = options.translations_for(locale);
        }
        Ok(options)
    }
}
