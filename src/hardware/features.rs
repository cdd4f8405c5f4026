//! Feature metadata reported by a device.
//!
//! A device describes its settings as a tree of [`FeatureDescriptor`]s, the
//! same shape as a GenICam node map: categories containing typed features.
//! Fields are optional because real devices omit them; the parameter tree
//! builder decides which omissions are fatal.

use crate::parameter::ParameterValue;

/// GenICam feature interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    /// Integer feature.
    Integer,
    /// Float feature.
    Float,
    /// Boolean feature.
    Boolean,
    /// Enumeration feature.
    Enumeration,
    /// String feature.
    String,
    /// Command feature.
    Command,
    /// Category of features.
    Category,
    /// Raw register block.
    Register,
}

/// Feature access as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureAccess {
    /// Read only.
    ReadOnly,
    /// Read and write.
    ReadWrite,
    /// Write only (typical for commands).
    WriteOnly,
    /// Currently not available.
    NotAvailable,
}

/// Metadata of one device feature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureDescriptor {
    /// Feature name.
    pub name: String,
    /// Display name; defaults to `name`.
    pub display_name: Option<String>,
    /// Tooltip.
    pub tooltip: Option<String>,
    /// Interface type.
    pub feature_type: Option<FeatureType>,
    /// Access.
    pub access: Option<FeatureAccess>,
    /// Current value.
    pub value: Option<ParameterValue>,
    /// Minimum.
    pub min: Option<ParameterValue>,
    /// Maximum.
    pub max: Option<ParameterValue>,
    /// Increment.
    pub increment: Option<ParameterValue>,
    /// Unit.
    pub unit: Option<String>,
    /// Enumeration entries.
    pub entries: Vec<String>,
    /// Child features (categories only).
    pub children: Vec<FeatureDescriptor>,
}

impl FeatureDescriptor {
    fn typed(name: &str, feature_type: FeatureType, value: Option<ParameterValue>) -> Self {
        Self {
            name: name.to_string(),
            feature_type: Some(feature_type),
            access: Some(FeatureAccess::ReadWrite),
            value,
            ..Self::default()
        }
    }

    /// A category holding `children`.
    pub fn category(name: &str, children: Vec<FeatureDescriptor>) -> Self {
        Self {
            access: Some(FeatureAccess::ReadOnly),
            children,
            ..Self::typed(name, FeatureType::Category, None)
        }
    }

    /// An integer feature with inclusive limits.
    pub fn integer(name: &str, value: i64, min: i64, max: i64) -> Self {
        Self {
            min: Some(ParameterValue::Int(min)),
            max: Some(ParameterValue::Int(max)),
            ..Self::typed(name, FeatureType::Integer, Some(ParameterValue::Int(value)))
        }
    }

    /// A float feature with inclusive limits.
    pub fn float(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            min: Some(ParameterValue::Float(min)),
            max: Some(ParameterValue::Float(max)),
            ..Self::typed(name, FeatureType::Float, Some(ParameterValue::Float(value)))
        }
    }

    /// A boolean feature.
    pub fn boolean(name: &str, value: bool) -> Self {
        Self::typed(name, FeatureType::Boolean, Some(ParameterValue::Bool(value)))
    }

    /// An enumeration feature; `value` should be one of `entries`.
    pub fn enumeration(name: &str, value: &str, entries: &[&str]) -> Self {
        Self {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            ..Self::typed(
                name,
                FeatureType::Enumeration,
                Some(ParameterValue::Enum(value.to_string())),
            )
        }
    }

    /// A string feature.
    pub fn string(name: &str, value: &str) -> Self {
        Self::typed(
            name,
            FeatureType::String,
            Some(ParameterValue::String(value.to_string())),
        )
    }

    /// A command feature.
    pub fn command(name: &str) -> Self {
        Self {
            access: Some(FeatureAccess::WriteOnly),
            ..Self::typed(name, FeatureType::Command, None)
        }
    }

    /// A raw register block.
    pub fn register(name: &str) -> Self {
        Self::typed(name, FeatureType::Register, None)
    }

    /// Mark the feature read-only.
    pub fn read_only(mut self) -> Self {
        self.access = Some(FeatureAccess::ReadOnly);
        self
    }

    /// Set the increment.
    pub fn with_increment(mut self, increment: ParameterValue) -> Self {
        self.increment = Some(increment);
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Set the tooltip.
    pub fn with_tooltip(mut self, tooltip: &str) -> Self {
        self.tooltip = Some(tooltip.to_string());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    /// Depth-first search for a feature by name.
    pub fn find(&self, name: &str) -> Option<&FeatureDescriptor> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Mutable depth-first search for a feature by name.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut FeatureDescriptor> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }
}
