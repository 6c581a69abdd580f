// Entity vocabulary: CMS collections, their known fields, image fields,
// cache tags and TTL bindings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ContentError;

// Normalized and raw records share the same dynamic shape
pub type Entity = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Hotel,
    Destination,
    Category,
    Page,
    Navigation,
    Translation,
}

impl EntityKind {
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Hotel => "hotels",
            EntityKind::Destination => "destinations",
            EntityKind::Category => "categories",
            EntityKind::Page => "pages",
            EntityKind::Navigation => "navigation",
            EntityKind::Translation => "translations",
        }
    }

    pub fn endpoint(&self) -> String {
        format!("items/{}", self.collection())
    }

    pub fn image_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Hotel => &["featured_image", "logo", "gallery"],
            EntityKind::Destination => &["featured_image", "hero_image", "gallery"],
            EntityKind::Category => &["icon", "image"],
            EntityKind::Page => &["featured_image", "og_image"],
            EntityKind::Navigation | EntityKind::Translation => &[],
        }
    }

    // Top-level fields a caller may select for this collection
    pub fn known_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Hotel => &[
                "id",
                "status",
                "sort",
                "name",
                "title",
                "slug",
                "description",
                "short_description",
                "address",
                "city",
                "country",
                "latitude",
                "longitude",
                "stars",
                "price_from",
                "currency",
                "amenities",
                "featured_image",
                "logo",
                "gallery",
                "destination",
                "categories",
                "translations",
                "date_created",
                "date_updated",
            ],
            EntityKind::Destination => &[
                "id",
                "status",
                "sort",
                "name",
                "title",
                "slug",
                "description",
                "country",
                "region",
                "featured_image",
                "hero_image",
                "gallery",
                "hotels",
                "translations",
                "date_created",
                "date_updated",
            ],
            EntityKind::Category => &[
                "id",
                "status",
                "sort",
                "name",
                "title",
                "slug",
                "description",
                "icon",
                "image",
                "parent",
                "hotels",
                "translations",
            ],
            EntityKind::Page => &[
                "id",
                "status",
                "name",
                "title",
                "slug",
                "content",
                "seo_title",
                "seo_description",
                "featured_image",
                "og_image",
                "translations",
                "date_created",
                "date_updated",
            ],
            EntityKind::Navigation => &[
                "id",
                "status",
                "sort",
                "name",
                "title",
                "slug",
                "url",
                "parent",
                "children",
                "translations",
            ],
            EntityKind::Translation => &["id", "key", "value", "languages_code", "namespace"],
        }
    }

    pub fn default_fields(&self) -> Vec<String> {
        match self {
            EntityKind::Translation => vec!["key".to_string(), "value".to_string()],
            _ => vec!["*".to_string(), "translations.*".to_string()],
        }
    }

    pub fn has_translations(&self) -> bool {
        !matches!(self, EntityKind::Translation)
    }

    // Tag every cached value of this kind carries
    pub fn list_tag(&self) -> &'static str {
        self.collection()
    }

    pub fn item_tag(&self, id: &str) -> String {
        format!("{self}:{id}")
    }

    pub fn tags_for(&self, id: Option<&str>) -> Vec<String> {
        let mut tags = vec![self.list_tag().to_string()];
        if let Some(id) = id {
            tags.push(self.item_tag(id));
        }
        tags
    }

    /// Checks requested fields against the allow-list.
    ///
    /// Only the root segment of a dotted path is checked, so
    /// `translations.*` or `destination.name` pass when the relation is known.
    pub fn check_fields(&self, fields: &[String]) -> Result<(), ContentError> {
        let known = self.known_fields();
        for field in fields {
            let root = field.split('.').next().unwrap_or_default();
            if root != "*" && !known.contains(&root) {
                return Err(ContentError::InvalidQuery(format!(
                    "field `{field}` is not selectable on {}",
                    self.collection()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Hotel => "hotel",
            EntityKind::Destination => "destination",
            EntityKind::Category => "category",
            EntityKind::Page => "page",
            EntityKind::Navigation => "navigation",
            EntityKind::Translation => "translation",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hotel" | "hotels" => Ok(EntityKind::Hotel),
            "destination" | "destinations" => Ok(EntityKind::Destination),
            "category" | "categories" => Ok(EntityKind::Category),
            "page" | "pages" => Ok(EntityKind::Page),
            "navigation" => Ok(EntityKind::Navigation),
            "translation" | "translations" => Ok(EntityKind::Translation),
            other => Err(ContentError::InvalidQuery(format!(
                "unknown entity type `{other}`"
            ))),
        }
    }
}
