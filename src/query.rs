// Query serializer: turns typed query options into the CMS wire parameters
// (`filter[field][_op]=value`, `fields=a,b`, `deep[rel][field]=value`, ...)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::error::{ContentError, ContentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Null,
    NotNull,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Between,
    NotBetween,
    Empty,
    NotEmpty,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 20] = [
        FilterOperator::Eq,
        FilterOperator::Neq,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::In,
        FilterOperator::NotIn,
        FilterOperator::Null,
        FilterOperator::NotNull,
        FilterOperator::Contains,
        FilterOperator::NotContains,
        FilterOperator::StartsWith,
        FilterOperator::NotStartsWith,
        FilterOperator::EndsWith,
        FilterOperator::NotEndsWith,
        FilterOperator::Between,
        FilterOperator::NotBetween,
        FilterOperator::Empty,
        FilterOperator::NotEmpty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "_eq",
            FilterOperator::Neq => "_neq",
            FilterOperator::Lt => "_lt",
            FilterOperator::Lte => "_lte",
            FilterOperator::Gt => "_gt",
            FilterOperator::Gte => "_gte",
            FilterOperator::In => "_in",
            FilterOperator::NotIn => "_nin",
            FilterOperator::Null => "_null",
            FilterOperator::NotNull => "_nnull",
            FilterOperator::Contains => "_contains",
            FilterOperator::NotContains => "_ncontains",
            FilterOperator::StartsWith => "_starts_with",
            FilterOperator::NotStartsWith => "_nstarts_with",
            FilterOperator::EndsWith => "_ends_with",
            FilterOperator::NotEndsWith => "_nends_with",
            FilterOperator::Between => "_between",
            FilterOperator::NotBetween => "_nbetween",
            FilterOperator::Empty => "_empty",
            FilterOperator::NotEmpty => "_nempty",
        }
    }

    // Operators whose value is a flag rather than an operand
    fn is_unary(&self) -> bool {
        matches!(
            self,
            FilterOperator::Null
                | FilterOperator::NotNull
                | FilterOperator::Empty
                | FilterOperator::NotEmpty
        )
    }

    fn is_range(&self) -> bool {
        matches!(self, FilterOperator::Between | FilterOperator::NotBetween)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = if s.starts_with('_') {
            s.to_string()
        } else {
            format!("_{s}")
        };
        FilterOperator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| ContentError::InvalidQuery(format!("unknown filter operator `{s}`")))
    }
}

pub type Condition = BTreeMap<FilterOperator, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub limit: Option<i64>,
    pub offset: Option<u64>,
    pub sort: Vec<String>,
    pub filter: BTreeMap<String, Condition>,
    pub advanced_filter: BTreeMap<String, Condition>,
    pub fields: Vec<String>,
    pub deep: BTreeMap<String, BTreeMap<String, Value>>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    // Shorthand: a plain value means "equals"
    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOperator::Eq, value)
    }

    pub fn filter(
        mut self,
        field: impl Into<String>,
        op: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filter
            .entry(field.into())
            .or_default()
            .insert(op, value.into());
        self
    }

    pub fn advanced(
        mut self,
        field: impl Into<String>,
        op: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.advanced_filter
            .entry(field.into())
            .or_default()
            .insert(op, value.into());
        self
    }

    pub fn deep(
        mut self,
        relation: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.deep
            .entry(relation.into())
            .or_default()
            .insert(field.into(), value.into());
        self
    }

    // Restrict the `translations` sub-records to one locale
    pub fn translations_for(self, locale: &str) -> Self {
        self.deep(
            "translations",
            "_filter",
            json!({ "languages_code": { "_eq": locale } }),
        )
    }

    /// Parses the dynamic JSON form of query options.
    ///
    /// Accepts `limit`, `offset`, `sort`, `fields`, `filter`,
    /// `advancedFilter` and `deep`. Filter values that are operator maps are
    /// parsed strictly; anything else is an equality shorthand. Nested
    /// relation filters (`{"translations": {"languages_code": {"_eq": ..}}}`)
    /// are flattened to dotted field paths.
    pub fn from_json(value: &Value) -> ContentResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("query options must be an object"))?;

        let mut options = QueryOptions::default();
        for (key, value) in obj {
            match key.as_str() {
                "limit" => {
                    options.limit = Some(
                        value
                            .as_i64()
                            .ok_or_else(|| invalid("`limit` must be an integer"))?,
                    )
                }
                "offset" => {
                    options.offset = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| invalid("`offset` must be a non-negative integer"))?,
                    )
                }
                "sort" => options.sort = string_list(key, value)?,
                "fields" => options.fields = string_list(key, value)?,
                "filter" => {
                    let filter = value
                        .as_object()
                        .ok_or_else(|| invalid("`filter` must be an object"))?;
                    for (field, cond) in filter {
                        flatten_filter(field, cond, &mut options.filter)?;
                    }
                }
                "advancedFilter" | "advanced_filter" => {
                    let filter = value
                        .as_object()
                        .ok_or_else(|| invalid("`advancedFilter` must be an object"))?;
                    for (field, cond) in filter {
                        let ops = cond.as_object().ok_or_else(|| {
                            invalid(&format!("advanced filter on `{field}` must be an operator map"))
                        })?;
                        options
                            .advanced_filter
                            .insert(field.clone(), parse_condition(field, ops)?);
                    }
                }
                "deep" => {
                    let deep = value
                        .as_object()
                        .ok_or_else(|| invalid("`deep` must be an object"))?;
                    for (relation, sub) in deep {
                        let sub = sub.as_object().ok_or_else(|| {
                            invalid(&format!("deep entry `{relation}` must be an object"))
                        })?;
                        let scoped = options.deep.entry(relation.clone()).or_default();
                        for (field, v) in sub {
                            scoped.insert(field.clone(), v.clone());
                        }
                    }
                }
                other => return Err(invalid(&format!("unknown query option `{other}`"))),
            }
        }
        Ok(options)
    }

    /// Serializes the options into ordered query-string pairs.
    pub fn to_params(&self) -> ContentResult<Vec<(String, String)>> {
        let mut params = Vec::new();

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".to_string(), self.sort.join(",")));
        }
        if !self.fields.is_empty() {
            params.push(("fields".to_string(), self.fields.join(",")));
        }

        for (field, condition) in self.filter.iter().chain(self.advanced_filter.iter()) {
            let path = field_path(field)?;
            for (op, value) in condition {
                params.push((
                    format!("filter{path}[{}]", op.as_str()),
                    operand(*op, field, value)?,
                ));
            }
        }

        for (relation, sub) in &self.deep {
            for (field, value) in sub {
                push_deep(format!("deep[{relation}][{field}]"), value, &mut params);
            }
        }

        Ok(params)
    }

    /// Canonical JSON form used for cache keys.
    ///
    /// Object keys come out sorted (every map here is ordered) and
    /// set-like array operands are sorted, so semantically identical options
    /// produce identical output. `sort` and range operands keep their order.
    pub fn canonical(&self) -> Value {
        let mut out = Map::new();
        if let Some(limit) = self.limit {
            out.insert("limit".into(), limit.into());
        }
        if let Some(offset) = self.offset {
            out.insert("offset".into(), offset.into());
        }
        if !self.sort.is_empty() {
            out.insert("sort".into(), self.sort.clone().into());
        }
        if !self.fields.is_empty() {
            let mut fields = self.fields.clone();
            fields.sort();
            fields.dedup();
            out.insert("fields".into(), fields.into());
        }
        if !self.filter.is_empty() {
            out.insert("filter".into(), canonical_conditions(&self.filter));
        }
        if !self.advanced_filter.is_empty() {
            out.insert(
                "advancedFilter".into(),
                canonical_conditions(&self.advanced_filter),
            );
        }
        if !self.deep.is_empty() {
            let deep: Map<String, Value> = self
                .deep
                .iter()
                .map(|(rel, sub)| {
                    let sub: Map<String, Value> = sub
                        .iter()
                        .map(|(k, v)| (k.clone(), canonical_json(v)))
                        .collect();
                    (rel.clone(), Value::Object(sub))
                })
                .collect();
            out.insert("deep".into(), Value::Object(deep));
        }
        Value::Object(out)
    }
}

fn invalid(msg: &str) -> ContentError {
    ContentError::InvalidQuery(msg.to_string())
}

fn string_list(key: &str, value: &Value) -> ContentResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| invalid(&format!("`{key}` entries must be strings")))
            })
            .collect(),
        _ => Err(invalid(&format!("`{key}` must be a string or a list of strings"))),
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('_'))
}

fn parse_condition(field: &str, ops: &Map<String, Value>) -> ContentResult<Condition> {
    if ops.is_empty() {
        return Err(invalid(&format!("empty condition on `{field}`")));
    }
    ops.iter()
        .map(|(op, v)| Ok::<_, ContentError>((op.parse::<FilterOperator>()?, v.clone())))
        .collect()
}

fn flatten_filter(
    path: &str,
    cond: &Value,
    out: &mut BTreeMap<String, Condition>,
) -> ContentResult<()> {
    match cond {
        Value::Object(map) if is_operator_map(map) => {
            out.insert(path.to_string(), parse_condition(path, map)?);
        }
        Value::Object(map) => {
            if map.is_empty() || map.keys().any(|k| k.starts_with('_')) {
                return Err(invalid(&format!(
                    "filter on `{path}` mixes operators and nested fields"
                )));
            }
            for (child, sub) in map {
                flatten_filter(&format!("{path}.{child}"), sub, out)?;
            }
        }
        scalar => {
            out.entry(path.to_string())
                .or_default()
                .insert(FilterOperator::Eq, scalar.clone());
        }
    }
    Ok(())
}

// `translations.languages_code` -> `[translations][languages_code]`
fn field_path(field: &str) -> ContentResult<String> {
    let mut path = String::new();
    for segment in field.split('.') {
        if segment.is_empty() {
            return Err(invalid(&format!("malformed field path `{field}`")));
        }
        path.push('[');
        path.push_str(segment);
        path.push(']');
    }
    Ok(path)
}

fn operand(op: FilterOperator, field: &str, value: &Value) -> ContentResult<String> {
    if op.is_unary() {
        return match value {
            Value::Null => Ok("true".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(invalid(&format!(
                "`{op}` on `{field}` takes a boolean flag"
            ))),
        };
    }
    if op.is_range() {
        match value.as_array() {
            Some(bounds) if bounds.len() == 2 => {}
            _ => {
                return Err(invalid(&format!(
                    "`{op}` on `{field}` needs exactly two bounds"
                )))
            }
        }
    }
    if matches!(value, Value::Object(_)) {
        return Err(invalid(&format!(
            "operand of `{op}` on `{field}` cannot be an object"
        )));
    }
    Ok(wire_value(value))
}

// Nested deep objects become further bracket segments:
// `{"_filter": {"languages_code": {"_eq": "de-DE"}}}` ->
// `deep[translations][_filter][languages_code][_eq]=de-DE`
fn push_deep(key: String, value: &Value, params: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (segment, inner) in map {
                push_deep(format!("{key}[{segment}]"), inner, params);
            }
        }
        other => params.push((key, wire_value(other))),
    }
}

fn wire_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items.iter().map(wire_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn canonical_conditions(conditions: &BTreeMap<String, Condition>) -> Value {
    let map: Map<String, Value> = conditions
        .iter()
        .map(|(field, cond)| {
            let ops: Map<String, Value> = cond
                .iter()
                .map(|(op, v)| {
                    let v = match v {
                        Value::Array(items) if !op.is_range() => {
                            let mut items: Vec<Value> = items.iter().map(canonical_json).collect();
                            items.sort_by_key(|item| item.to_string());
                            Value::Array(items)
                        }
                        other => canonical_json(other),
                    };
                    (op.as_str().to_string(), v)
                })
                .collect();
            (field.clone(), Value::Object(ops))
        })
        .collect();
    Value::Object(map)
}

// Rebuilds objects so keys are ordered regardless of how the map was built
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            Value::Object(
                ordered
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}
