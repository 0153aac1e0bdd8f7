//! Per-key validation policy ("meta").
//!
//! A node's meta is a map from key to [`MetaRule`]. Two keys are special:
//!
//! - `*` is the fallback rule. It applies to keys without their own rule and is merged into
//!   every key-specific rule.
//! - `**` is the descendant rule. It does not apply to the node itself; it is handed to every
//!   child node (recursively) as both its fallback and its own descendant rule.
//!
//! A rule's `meta` field holds the rules for the child node created under that key.
//!
//! ```rust
//! use livenode::meta::{CompiledMeta, MetaRule, MetaSpec};
//! use livenode::{DataType, Segment};
//!
//! let mut spec = MetaSpec::new();
//! spec.insert("*".into(), MetaRule { nullable: true, ..Default::default() });
//! spec.insert("count".into(), MetaRule { data_type: Some(DataType::Number), ..Default::default() });
//!
//! let compiled = CompiledMeta::compile(Some(&spec))?;
//! let rule = compiled.rule(&Segment::from("count")).unwrap();
//! assert!(rule.nullable);
//! assert_eq!(rule.data_type, Some(DataType::Number));
//! # Ok::<(), livenode::Error>(())
//! ```

mod apply;

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use apply::{apply_transition, apply_value, coerce};

use crate::{
    BoxError, Result,
    node::NodeError,
    path::Segment,
    value::{DataType, Value},
};

/// Key of the fallback rule.
pub const FALLBACK_KEY: &str = "*";
/// Key of the rule handed down to all descendants.
pub const DESCENDANT_KEY: &str = "**";

/// Custom cleaning function. Receives the (already coerced) value and its key.
///
/// Returning `Ok(None)` is treated as a failure, as is returning an error.
pub type Cleaner = Arc<dyn Fn(Value, &Segment) -> std::result::Result<Option<Value>, BoxError> + Send + Sync>;

/// Raw meta as configured on a node.
pub type MetaSpec = IndexMap<String, MetaRule>;

/// Validation rule for one key.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetaRule {
    /// Only these values may be set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<Vec<Value>>,
    /// Values are coerced to this type
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    /// Once set, the value's category may not change
    pub constant_type: bool,
    /// Text values are prefixed with this string unless they already start with it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend: Option<String>,
    #[serde(skip)]
    pub clean: Option<Cleaner>,
    /// The key can only be deleted by resetting it to null or its default
    pub required: bool,
    /// Once changed away from its default the value is fixed
    pub constant: bool,
    /// Null is always accepted
    pub nullable: bool,
    /// The key may not be set at all
    pub block: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Rules for the child node created under this key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaSpec>,
}

impl MetaRule {
    /// A rule that only carries a default value.
    pub fn with_default(default: impl Into<Value>) -> Self {
        Self {
            default: Some(default.into()),
            ..Default::default()
        }
    }

    /// Sets the cleaner, builder style.
    pub fn cleaned_by<F>(mut self, clean: F) -> Self
    where
        F: Fn(Value, &Segment) -> std::result::Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        self.clean = Some(Arc::new(clean));
        self
    }

    /// Whether deleting the key must be turned into a reset.
    pub fn protects_delete(&self) -> bool {
        self.required || self.constant || self.constant_type
    }

    /// Key-specific rule layered over the fallback. Flags are additive.
    fn merged_over(&self, fallback: &MetaRule) -> MetaRule {
        let meta = match (&fallback.meta, &self.meta) {
            (None, None) => None,
            (a, b) => {
                let mut merged = a.clone().unwrap_or_default();
                if let Some(b) = b {
                    merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(merged)
            }
        };
        MetaRule {
            accepted: self.accepted.clone().or_else(|| fallback.accepted.clone()),
            data_type: self.data_type.or(fallback.data_type),
            constant_type: self.constant_type || fallback.constant_type,
            prepend: self.prepend.clone().or_else(|| fallback.prepend.clone()),
            clean: self.clean.clone().or_else(|| fallback.clean.clone()),
            required: self.required || fallback.required,
            constant: self.constant || fallback.constant,
            nullable: self.nullable || fallback.nullable,
            block: self.block || fallback.block,
            default: self.default.clone().or_else(|| fallback.default.clone()),
            meta,
        }
    }
}

impl fmt::Debug for MetaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRule")
            .field("accepted", &self.accepted)
            .field("type", &self.data_type)
            .field("constant_type", &self.constant_type)
            .field("prepend", &self.prepend)
            .field("clean", &self.clean.is_some())
            .field("required", &self.required)
            .field("constant", &self.constant)
            .field("nullable", &self.nullable)
            .field("block", &self.block)
            .field("default", &self.default)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Meta compiled for fast per-key lookup.
#[derive(Clone, Debug, Default)]
pub struct CompiledMeta {
    rules: IndexMap<String, MetaRule>,
    descendants: Option<MetaRule>,
}

impl CompiledMeta {
    /// Compiles raw meta, merging the fallback rule into every key.
    ///
    /// Fails with `EMISMATCH` if `prepend` is combined with a non-string type.
    pub fn compile(spec: Option<&MetaSpec>) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(Self::default());
        };
        let fallback = spec.get(FALLBACK_KEY).cloned().unwrap_or_default();
        let mut rules = IndexMap::with_capacity(spec.len());

        for (key, raw) in spec {
            if key == DESCENDANT_KEY {
                continue;
            }
            if raw.block && key != FALLBACK_KEY {
                rules.insert(
                    key.clone(),
                    MetaRule {
                        block: true,
                        ..Default::default()
                    },
                );
                continue;
            }
            let mut rule = if key == FALLBACK_KEY {
                raw.clone()
            } else {
                raw.merged_over(&fallback)
            };
            if rule.prepend.is_some() {
                match rule.data_type {
                    None | Some(DataType::String) => rule.data_type = Some(DataType::String),
                    Some(other) => {
                        return Err(NodeError::MetaConflict {
                            key: key.clone(),
                            reason: format!("prepend requires type string, not {other}"),
                        }
                        .into());
                    }
                }
            }
            rules.insert(key.clone(), rule);
        }

        Ok(Self {
            rules,
            descendants: spec.get(DESCENDANT_KEY).cloned(),
        })
    }

    /// True if no rule applies to this node.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule for a local key: its own rule, else the fallback.
    pub fn rule(&self, key: &Segment) -> Option<&MetaRule> {
        self.rules
            .get(&key.to_key())
            .or_else(|| self.rules.get(FALLBACK_KEY))
    }

    /// Raw meta for the child node created under `key`, with the descendant rule attached.
    pub fn child_spec(&self, key: &Segment) -> Option<MetaSpec> {
        let mut spec = self
            .rule(key)
            .and_then(|rule| rule.meta.clone())
            .unwrap_or_default();
        if let Some(all) = &self.descendants {
            spec.entry(FALLBACK_KEY.to_string())
                .or_insert_with(|| all.clone());
            spec.insert(DESCENDANT_KEY.to_string(), all.clone());
        }
        if spec.is_empty() { None } else { Some(spec) }
    }

    /// Default values of every explicitly named key.
    pub fn defaults(&self) -> IndexMap<String, Value> {
        self.rules
            .iter()
            .filter(|(key, _)| key.as_str() != FALLBACK_KEY)
            .filter_map(|(key, rule)| rule.default.clone().map(|d| (key.clone(), d)))
            .collect()
    }

    /// The fallback default, if any.
    pub fn fallback_default(&self) -> Option<&Value> {
        self.rules
            .get(FALLBACK_KEY)
            .and_then(|rule| rule.default.as_ref())
    }
}

/// Folds shorthand default values into a meta spec.
pub(crate) fn with_default_values(
    meta: Option<&MetaSpec>,
    defaults: Option<&IndexMap<String, Value>>,
) -> Option<MetaSpec> {
    let Some(defaults) = defaults.filter(|d| !d.is_empty()) else {
        return meta.cloned();
    };
    let mut spec = meta.cloned().unwrap_or_default();
    for (key, value) in defaults {
        let rule = spec.entry(key.clone()).or_default();
        if rule.default.is_none() {
            rule.default = Some(value.clone());
        }
    }
    Some(spec)
}
