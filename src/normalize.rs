// Entity normalizer: applies locale translations, default fields and asset
// URL resolution to raw CMS records. Never mutates the input record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::entity::Entity;

// Fields on a translation record that must never be copied onto the entity
const TRANSLATION_META_FIELDS: [&str; 8] = [
    "id",
    "languages_code",
    "languages_id",
    "date_created",
    "date_updated",
    "user_created",
    "user_updated",
    "sort",
];

// Output formats the asset endpoint can transcode to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Auto,
    Jpg,
    Png,
    Webp,
    Tiff,
    Avif,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Auto => "auto",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Avif => "avif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFit {
    Cover,
    Contain,
    Inside,
    Outside,
}

impl ImageFit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFit::Cover => "cover",
            ImageFit::Contain => "contain",
            ImageFit::Inside => "inside",
            ImageFit::Outside => "outside",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTransform {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub format: Option<ImageFormat>,
    pub fit: Option<ImageFit>,
}

impl ImageTransform {
    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Default::default()
        }
    }

    fn query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(w) = self.width {
            parts.push(format!("width={w}"));
        }
        if let Some(h) = self.height {
            parts.push(format!("height={h}"));
        }
        if let Some(q) = self.quality {
            parts.push(format!("quality={q}"));
        }
        if let Some(f) = self.format {
            parts.push(format!("format={}", f.as_str()));
        }
        if let Some(fit) = self.fit {
            parts.push(format!("fit={}", fit.as_str()));
        }
        parts.join("&")
    }
}

// Builds `<base>/assets/<id>` URLs for CMS file identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResolver {
    base_url: String,
    transform: Option<ImageTransform>,
}

impl AssetResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transform: None,
        }
    }

    // Transform applied to every URL produced during normalization
    pub fn with_transform(mut self, transform: ImageTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn asset_url(&self, reference: &str, transform: Option<&ImageTransform>) -> String {
        if is_absolute(reference) {
            return reference.to_string();
        }
        let mut url = format!("{}/assets/{}", self.base_url, reference);
        if let Some(transform) = transform {
            let query = transform.query_string();
            if !query.is_empty() {
                url.push('?');
                url.push_str(&query);
            }
        }
        url
    }

    fn resolve(&self, reference: &str) -> String {
        self.asset_url(reference, self.transform.as_ref())
    }
}

fn is_absolute(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("//")
        || reference.starts_with('/')
}

/// Normalizes one raw record for `locale`.
///
/// Returns a fresh map: defaults for `name`/`slug`/`status`, translation
/// overrides for the locale (non-null values only), and resolved URLs for
/// each field in `image_fields`. A missing translation is not an error; the
/// raw values stay in place.
pub fn normalize(
    raw: Option<&Entity>,
    locale: &str,
    image_fields: &[&str],
    assets: &AssetResolver,
) -> Option<Entity> {
    let raw = raw?;
    let mut entity = raw.clone();

    apply_defaults(&mut entity);
    apply_translation(&mut entity, locale);
    for field in image_fields {
        resolve_image_field(&mut entity, field, assets);
    }

    Some(entity)
}

pub fn normalize_list(
    raws: &[Value],
    locale: &str,
    image_fields: &[&str],
    assets: &AssetResolver,
) -> Vec<Entity> {
    raws.iter()
        .filter_map(|raw| match raw {
            Value::Object(map) => normalize(Some(map), locale, image_fields, assets),
            Value::Null => None,
            other => {
                warn!(kind = value_kind(other), "dropping non-object record from list");
                None
            }
        })
        .collect()
}

fn apply_defaults(entity: &mut Entity) {
    if is_missing(entity.get("name")) {
        if let Some(title) = entity.get("title").filter(|v| !v.is_null()).cloned() {
            entity.insert("name".to_string(), title);
        }
    }
    if is_missing(entity.get("slug")) {
        let id = entity
            .get("id")
            .and_then(id_text)
            .unwrap_or_else(|| "unknown".to_string());
        entity.insert("slug".to_string(), Value::String(format!("item-{id}")));
    }
    if is_missing(entity.get("status")) {
        entity.insert("status".to_string(), Value::String("published".to_string()));
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn apply_translation(entity: &mut Entity, locale: &str) {
    let record = match entity.get("translations") {
        None | Some(Value::Null) => return,
        Some(Value::Array(records)) => records
            .iter()
            .filter_map(Value::as_object)
            .find(|record| translation_locale(record) == Some(locale))
            .cloned(),
        Some(Value::Object(record)) => Some(record.clone()),
        Some(other) => {
            warn!(
                kind = value_kind(other),
                "ignoring translations field with unexpected shape"
            );
            return;
        }
    };

    let Some(record) = record else {
        return;
    };

    let parent_id = entity.get("id").and_then(id_text);
    for (key, value) in record {
        if value.is_null() || TRANSLATION_META_FIELDS.contains(&key.as_str()) {
            continue;
        }
        // back-reference to the parent record, e.g. `hotels_id: 1` on hotel 1
        if key.ends_with("_id") && parent_id.is_some() && id_text(&value) == parent_id {
            continue;
        }
        entity.insert(key, value);
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// `languages_code` may arrive as a plain code or as an expanded relation
fn translation_locale(record: &Map<String, Value>) -> Option<&str> {
    ["languages_code", "languages_id"]
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(|value| match value {
            Value::String(code) => Some(code.as_str()),
            Value::Object(language) => language.get("code").and_then(Value::as_str),
            _ => None,
        })
}

fn resolve_image_field(entity: &mut Entity, field: &str, assets: &AssetResolver) {
    let Some(value) = entity.get(field) else {
        return;
    };

    match value {
        Value::Null => {}
        Value::Array(items) => {
            let resolved: Vec<Value> = items
                .iter()
                .map(|item| resolve_gallery_item(item, field, assets))
                .collect();
            entity.insert(field.to_string(), Value::Array(resolved));
        }
        single => match reference_of(single) {
            Some(reference) => {
                let url = assets.resolve(&reference);
                entity.insert(format!("{field}_url"), Value::String(url));
            }
            None => warn!(field, "image field has no resolvable file reference"),
        },
    }
}

fn resolve_gallery_item(item: &Value, field: &str, assets: &AssetResolver) -> Value {
    match item {
        Value::String(id) => {
            let mut wrapped = Map::new();
            wrapped.insert("id".to_string(), Value::String(id.clone()));
            wrapped.insert("url".to_string(), Value::String(assets.resolve(id)));
            Value::Object(wrapped)
        }
        Value::Object(obj) => {
            let reference = obj
                .get("image")
                .or_else(|| obj.get("directus_files_id"))
                .and_then(reference_of);
            match reference {
                Some(reference) => {
                    let mut resolved = obj.clone();
                    resolved.insert("url".to_string(), Value::String(assets.resolve(&reference)));
                    Value::Object(resolved)
                }
                None => item.clone(),
            }
        }
        other => {
            warn!(field, kind = value_kind(other), "gallery item left unresolved");
            other.clone()
        }
    }
}

// A file reference is either a bare id/URL or an object carrying an `id`
fn reference_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj.get("id").and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
