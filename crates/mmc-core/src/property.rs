//! Device properties
//!
//! Every device exposes its settings as named string-valued properties. A
//! property is described by a [`PropertyDescriptor`] (type, read-only and
//! pre-init flags, allowed values, numeric limits) and stored together with
//! its current value in a [`PropertyMap`], which adapters embed in their
//! device structs.
//!
//! # Validation
//!
//! Validation always happens before a value is accepted:
//!
//! 1. Read-only properties reject writes (adapters use [`PropertyMap::update`]
//!    to change them internally).
//! 2. When allowed values are declared, the value must be one of them.
//! 3. Integer and float properties must parse, and must fall within limits
//!    when limits are declared.
//!
//! ```rust
//! use mmc_core::property::{PropertyDescriptor, PropertyMap};
//!
//! let props = PropertyMap::new();
//! props.define(
//!     PropertyDescriptor::integer("Binning").with_allowed_values(["1", "2", "4", "8"]),
//!     "1",
//! );
//! assert!(props.set("Binning", "3").is_err());
//! props.set("Binning", "2").unwrap();
//! assert_eq!(props.value("Binning").unwrap(), "2");
//! ```

use crate::error::CoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// Free-form text.
    String,
    /// Signed integer.
    Integer,
    /// Floating-point number.
    Float,
}

impl PropertyType {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            PropertyType::String => "String",
            PropertyType::Integer => "Integer",
            PropertyType::Float => "Float",
        }
    }
}

/// Static description of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name, unique within its device.
    pub name: String,
    /// Value type.
    pub kind: PropertyType,
    /// Writes from clients are rejected.
    pub read_only: bool,
    /// May (and usually must) be set before the device is initialized.
    pub pre_init: bool,
    /// Allowed values; empty means unrestricted.
    pub allowed_values: Vec<String>,
    /// Inclusive numeric limits.
    pub limits: Option<(f64, f64)>,
}

impl PropertyDescriptor {
    /// Creates a writable descriptor with no constraints.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            read_only: false,
            pre_init: false,
            allowed_values: Vec::new(),
            limits: None,
        }
    }

    /// String property.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    /// Integer property.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Integer)
    }

    /// Float property.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Float)
    }

    /// Marks the property read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks the property as a pre-initialization setting.
    pub fn pre_init(mut self) -> Self {
        self.pre_init = true;
        self
    }

    /// Restricts the property to the given values.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets inclusive numeric limits.
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.limits = Some((lower, upper));
        self
    }

    /// True when numeric limits are declared.
    pub fn has_limits(&self) -> bool {
        self.limits.is_some()
    }

    /// Checks `value` against type, allowed values and limits.
    ///
    /// The read-only flag is not checked here; see [`PropertyMap::set`].
    pub fn validate(&self, value: &str) -> Result<(), PropertyError> {
        let numeric = match self.kind {
            PropertyType::String => None,
            PropertyType::Integer => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .map(|v| v as f64)
                    .map_err(|_| PropertyError::NotANumber {
                        name: self.name.clone(),
                        value: value.to_string(),
                        kind: self.kind,
                    })?,
            ),
            PropertyType::Float => Some(value.trim().parse::<f64>().map_err(|_| {
                PropertyError::NotANumber {
                    name: self.name.clone(),
                    value: value.to_string(),
                    kind: self.kind,
                }
            })?),
        };

        if !self.allowed_values.is_empty() && !self.is_allowed(value, numeric) {
            return Err(PropertyError::NotAllowed {
                name: self.name.clone(),
                value: value.to_string(),
                allowed: self.allowed_values.clone(),
            });
        }

        if let (Some(v), Some((lower, upper))) = (numeric, self.limits) {
            if v < lower || v > upper {
                return Err(PropertyError::OutOfRange {
                    name: self.name.clone(),
                    value: value.to_string(),
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }

    fn is_allowed(&self, value: &str, numeric: Option<f64>) -> bool {
        self.allowed_values.iter().any(|allowed| {
            allowed == value
                || match (numeric, allowed.parse::<f64>()) {
                    (Some(v), Ok(a)) => v == a,
                    _ => false,
                }
        })
    }
}

/// Property-level validation failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// No property with this name.
    #[error("Property \"{0}\" is not defined")]
    Unknown(String),

    /// Property is read-only.
    #[error("Property \"{0}\" is read-only")]
    ReadOnly(String),

    /// Value is not one of the allowed values.
    #[error("\"{value}\" is not an allowed value for \"{name}\" (allowed: {allowed:?})")]
    NotAllowed {
        /// Property name.
        name: String,
        /// Rejected value.
        value: String,
        /// Declared allowed values.
        allowed: Vec<String>,
    },

    /// Value does not parse as the property type.
    #[error("\"{value}\" is not a valid {} for \"{name}\"", kind.label())]
    NotANumber {
        /// Property name.
        name: String,
        /// Rejected value.
        value: String,
        /// Declared type.
        kind: PropertyType,
    },

    /// Value lies outside the declared limits.
    #[error("{value} is outside the limits [{lower}, {upper}] of \"{name}\"")]
    OutOfRange {
        /// Property name.
        name: String,
        /// Rejected value.
        value: String,
        /// Lower limit.
        lower: f64,
        /// Upper limit.
        upper: f64,
    },
}

impl PropertyError {
    /// Converts into the core error for device `label`.
    pub fn into_core_error(self, label: &str, value: &str) -> CoreError {
        match self {
            PropertyError::Unknown(property) => CoreError::UnknownProperty {
                label: label.to_string(),
                property,
            },
            PropertyError::ReadOnly(property) => CoreError::PropertyReadOnly {
                label: label.to_string(),
                property,
            },
            other => {
                let property = match &other {
                    PropertyError::NotAllowed { name, .. }
                    | PropertyError::NotANumber { name, .. }
                    | PropertyError::OutOfRange { name, .. } => name.clone(),
                    PropertyError::Unknown(name) | PropertyError::ReadOnly(name) => name.clone(),
                };
                CoreError::PropertyValidation {
                    label: label.to_string(),
                    property,
                    value: value.to_string(),
                    reason: other.to_string(),
                }
            }
        }
    }
}

/// What a successful property write changed on the device.
///
/// Adapters report other properties whose values changed as a side effect
/// (e.g. a scan mode that alters the readout time). The core refreshes them
/// and notifies observers with a single `PropertiesChanged` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyOutcome {
    /// Names of other properties changed by the write.
    pub side_effects: Vec<String>,
}

impl PropertyOutcome {
    /// Only the written property changed.
    pub fn applied() -> Self {
        Self::default()
    }

    /// The write also changed `names`.
    pub fn with_side_effects<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            side_effects: names.into_iter().map(Into::into).collect(),
        }
    }

    /// True when other properties changed.
    pub fn has_side_effects(&self) -> bool {
        !self.side_effects.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PropertyEntry {
    descriptor: PropertyDescriptor,
    value: String,
}

/// Thread-safe table of a device's properties, ordered by name.
#[derive(Debug, Default)]
pub struct PropertyMap {
    entries: RwLock<BTreeMap<String, PropertyEntry>>,
}

impl PropertyMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) a property with its initial value.
    pub fn define(&self, descriptor: PropertyDescriptor, initial: impl Into<String>) {
        let name = descriptor.name.clone();
        self.entries.write().insert(
            name,
            PropertyEntry {
                descriptor,
                value: initial.into(),
            },
        );
    }

    /// Property names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// True if the property exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no property is defined.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Descriptor of `name`.
    pub fn descriptor(&self, name: &str) -> Result<PropertyDescriptor, PropertyError> {
        self.entries
            .read()
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))
    }

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Result<String, PropertyError> {
        self.entries
            .read()
            .get(name)
            .map(|e| e.value.clone())
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))
    }

    /// Current value parsed as `f64`.
    pub fn float(&self, name: &str) -> Result<f64, PropertyError> {
        let value = self.value(name)?;
        value.trim().parse().map_err(|_| PropertyError::NotANumber {
            name: name.to_string(),
            value,
            kind: PropertyType::Float,
        })
    }

    /// Current value parsed as `i64`.
    pub fn integer(&self, name: &str) -> Result<i64, PropertyError> {
        let value = self.value(name)?;
        value.trim().parse().map_err(|_| PropertyError::NotANumber {
            name: name.to_string(),
            value,
            kind: PropertyType::Integer,
        })
    }

    /// Client write: checks the read-only flag and validates the value.
    pub fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        if entry.descriptor.read_only {
            return Err(PropertyError::ReadOnly(name.to_string()));
        }
        entry.descriptor.validate(value)?;
        entry.value = value.to_string();
        Ok(())
    }

    /// Adapter-internal write: skips the read-only flag and validation.
    pub fn update(&self, name: &str, value: impl Into<String>) -> Result<(), PropertyError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        entry.value = value.into();
        Ok(())
    }

    /// Replaces the allowed values of `name`.
    pub fn set_allowed_values<I, S>(&self, name: &str, values: I) -> Result<(), PropertyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        entry.descriptor.allowed_values = values.into_iter().map(Into::into).collect();
        Ok(())
    }
}
