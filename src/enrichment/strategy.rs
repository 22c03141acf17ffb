//! Field-level reconciliation of source and provider records.
//!
//! Records are handled through their field map (`serde_json::Map`), so any
//! `Serialize + DeserializeOwned` type can take part in a merge by shared
//! field name.

use crate::enrichment::models::EnrichmentStrategy;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Coarse JSON kind of a field, used for type-mismatch detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Accepts any value (declared optional / unknown)
    Any,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl FieldKind {
    /// Kind of a concrete value, `None` for null
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(FieldKind::Bool),
            Value::Number(_) => Some(FieldKind::Number),
            Value::String(_) => Some(FieldKind::String),
            Value::Array(_) => Some(FieldKind::Array),
            Value::Object(_) => Some(FieldKind::Object),
        }
    }

    /// Whether a value may be stored in a field of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, FieldKind::of(value)) {
            (FieldKind::Any, _) | (_, None) => true,
            (kind, Some(actual)) => *kind == actual,
        }
    }
}

/// Declared fields of a target record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetShape {
    /// `None` means dynamic: every field is accepted as-is
    fields: Option<BTreeMap<String, FieldKind>>,
}

impl TargetShape {
    /// Shape that accepts every field
    pub fn dynamic() -> Self {
        Self { fields: None }
    }

    /// Shape from explicit field declarations
    pub fn declared<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(|(n, k)| (n.into(), k)).collect()),
        }
    }

    /// Derive the shape of `T` from its `Default` prototype.
    ///
    /// Fields that serialize as null in the prototype (usually `Option`s)
    /// are declared as [`FieldKind::Any`].
    pub fn of<T: Default + Serialize>() -> Result<Self> {
        match serde_json::to_value(T::default())? {
            Value::Object(map) => Ok(Self::declared(
                map.iter()
                    .map(|(name, value)| {
                        (name.clone(), FieldKind::of(value).unwrap_or(FieldKind::Any))
                    }),
            )),
            other => Err(AppError::Mapping(format!(
                "target prototype is not a record: {}",
                other
            ))),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.fields.is_none()
    }

    /// Declared kind of a field, `Any` for dynamic shapes
    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        match &self.fields {
            None => Some(FieldKind::Any),
            Some(fields) => fields.get(name).copied(),
        }
    }

    /// Declared field names (empty for dynamic shapes)
    pub fn field_names(&self) -> Vec<&str> {
        self.fields
            .as_ref()
            .map(|f| f.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Keep only the declared fields of a source record.
    ///
    /// Unlike [`TargetShape::project`], values are kept whatever their kind;
    /// a conflicting provider value is skipped during the merge instead.
    pub fn restrict(&self, record: Map<String, Value>) -> Map<String, Value> {
        match &self.fields {
            None => record,
            Some(fields) => record
                .into_iter()
                .filter(|(name, _)| fields.contains_key(name))
                .collect(),
        }
    }

    /// Restrict a provider record to the declared fields.
    ///
    /// Values whose kind conflicts with the declaration are dropped. A
    /// non-record input degrades to an empty record.
    pub fn project(&self, record: &Value) -> Map<String, Value> {
        let Value::Object(map) = record else {
            if !record.is_null() {
                warn!("Provider record is not an object, treating it as empty");
            }
            return Map::new();
        };

        map.iter()
            .filter(|(name, value)| match self.kind(name) {
                Some(kind) if kind.accepts(value) => true,
                Some(kind) => {
                    debug!(
                        field = %name,
                        expected = ?kind,
                        "Dropping provider field with mismatched type"
                    );
                    false
                }
                None => false,
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Merge result
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: Value,

    /// Number of fields the provider contributed
    pub fields_enriched: usize,
}

/// Applies an [`EnrichmentStrategy`] to a source and a provider record
pub struct StrategyMerger;

impl StrategyMerger {
    /// Merge `provider` into `source` according to `strategy`.
    ///
    /// For `RAW`, `provider` is the unmapped payload and is returned as-is;
    /// for every other strategy it is the mapped record.
    pub fn merge(
        strategy: EnrichmentStrategy,
        source: Option<&Value>,
        provider: &Value,
        shape: &TargetShape,
    ) -> MergeOutcome {
        match strategy {
            EnrichmentStrategy::Raw => MergeOutcome {
                fields_enriched: count_present(provider),
                record: provider.clone(),
            },
            EnrichmentStrategy::Replace => Self::replace(provider, shape),
            EnrichmentStrategy::Enhance | EnrichmentStrategy::Merge => match source {
                None | Some(Value::Null) => Self::replace(provider, shape),
                Some(Value::Object(base)) => Self::overlay(
                    strategy,
                    shape.restrict(base.clone()),
                    shape.project(provider),
                ),
                Some(other) => {
                    warn!(
                        strategy = %strategy,
                        "Source record is not an object ({}), using provider record",
                        kind_label(other)
                    );
                    Self::replace(provider, shape)
                }
            },
        }
    }

    fn replace(provider: &Value, shape: &TargetShape) -> MergeOutcome {
        let record = shape.project(provider);
        MergeOutcome {
            fields_enriched: record.values().filter(|v| !v.is_null()).count(),
            record: Value::Object(record),
        }
    }

    fn overlay(
        strategy: EnrichmentStrategy,
        mut base: Map<String, Value>,
        provider: Map<String, Value>,
    ) -> MergeOutcome {
        let mut fields_enriched = 0;

        for (name, incoming) in provider {
            if incoming.is_null() {
                continue;
            }

            let current = base.get(&name).filter(|v| !v.is_null());
            match current {
                None => {
                    base.insert(name, incoming);
                    fields_enriched += 1;
                }
                Some(_) if strategy == EnrichmentStrategy::Enhance => {}
                Some(existing) if FieldKind::of(existing) != FieldKind::of(&incoming) => {
                    debug!(field = %name, "Skipping field with mismatched type");
                }
                Some(existing) if *existing == incoming => {}
                Some(_) => {
                    base.insert(name, incoming);
                    fields_enriched += 1;
                }
            }
        }

        MergeOutcome {
            record: Value::Object(base),
            fields_enriched,
        }
    }

    /// Typed merge over [`FieldRecord`]s, target shape derived from `T`
    pub fn merge_typed<S, P, T>(
        strategy: EnrichmentStrategy,
        source: Option<&S>,
        provider: &P,
    ) -> Result<T>
    where
        S: FieldRecord,
        P: FieldRecord,
        T: FieldRecord + Default,
    {
        let shape = TargetShape::of::<T>()?;
        let source = source.map(|s| s.fields().map(Value::Object)).transpose()?;
        let provider = Value::Object(provider.fields()?);

        let outcome = Self::merge(strategy, source.as_ref(), &provider, &shape);
        match outcome.record {
            Value::Object(fields) => T::from_fields(fields),
            other => Err(AppError::Mapping(format!(
                "merged record is not an object: {}",
                kind_label(&other)
            ))),
        }
    }
}

/// Field access for records taking part in a merge
pub trait FieldRecord: Serialize + DeserializeOwned {
    /// Field map of the record
    fn fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(AppError::Mapping(format!(
                "expected a record, got {}",
                kind_label(&other)
            ))),
        }
    }

    /// Rebuild the record from a field map
    fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| AppError::Mapping(e.to_string()))
    }
}

impl<T: Serialize + DeserializeOwned> FieldRecord for T {}

fn count_present(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Object(map) => map.values().filter(|v| !v.is_null()).count(),
        _ => 1,
    }
}

fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
