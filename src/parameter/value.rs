//! Typed parameter values, node kinds and access modes.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

// =============================================================================
// Kind
// =============================================================================

/// The type of a parameter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// On/off flag.
    Bool,
    /// One of a fixed set of symbolic entries.
    Enum,
    /// Free text.
    String,
    /// Command without a value; invoking it triggers a device side effect.
    Action,
    /// Container of child nodes.
    Group,
}

impl ParameterKind {
    /// Whether nodes of this kind carry a value.
    pub fn has_value(self) -> bool {
        !matches!(self, ParameterKind::Action | ParameterKind::Group)
    }

    /// Whether limits and steps apply to this kind.
    pub fn is_numeric(self) -> bool {
        matches!(self, ParameterKind::Int | ParameterKind::Float)
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParameterKind::Int => "int",
            ParameterKind::Float => "float",
            ParameterKind::Bool => "bool",
            ParameterKind::Enum => "list",
            ParameterKind::String => "str",
            ParameterKind::Action => "action",
            ParameterKind::Group => "group",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Access
// =============================================================================

/// Whether a node accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Value can be read but never written.
    ReadOnly,
    /// Value can be read and written.
    ReadWrite,
}

impl AccessMode {
    /// True for [`AccessMode::ReadOnly`].
    pub fn is_read_only(self) -> bool {
        self == AccessMode::ReadOnly
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => f.write_str("RO"),
            AccessMode::ReadWrite => f.write_str("RW"),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A typed parameter value.
///
/// Each variant corresponds to one value-bearing [`ParameterKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Enumeration entry.
    Enum(String),
    /// Text value.
    String(String),
}

impl ParameterValue {
    /// Kind of node this value belongs to.
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::Int(_) => ParameterKind::Int,
            ParameterValue::Float(_) => ParameterKind::Float,
            ParameterValue::Bool(_) => ParameterKind::Bool,
            ParameterValue::Enum(_) => ParameterKind::Enum,
            ParameterValue::String(_) => ParameterKind::String,
        }
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Int(v) => Some(*v as f64),
            ParameterValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload of enum and string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Enum(s) | ParameterValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse operator input into a value of the given kind.
    ///
    /// Integers accept decimal and `0x` hexadecimal notation. Booleans accept
    /// `true/false`, `on/off`, `yes/no` and `1/0` in any case.
    pub fn parse(kind: ParameterKind, text: &str) -> Result<Self, String> {
        let text = text.trim();
        match kind {
            ParameterKind::Int => parse_int(text)
                .map(ParameterValue::Int)
                .ok_or_else(|| format!("'{}' is not an integer", text)),
            ParameterKind::Float => f64::from_str(text)
                .map(ParameterValue::Float)
                .map_err(|_| format!("'{}' is not a number", text)),
            ParameterKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(ParameterValue::Bool(true)),
                "false" | "off" | "no" | "0" => Ok(ParameterValue::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", text)),
            },
            ParameterKind::Enum => Ok(ParameterValue::Enum(text.to_string())),
            ParameterKind::String => Ok(ParameterValue::String(text.to_string())),
            ParameterKind::Action | ParameterKind::Group => {
                Err(format!("{} nodes do not hold values", kind))
            }
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Enum(s) | ParameterValue::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_match_rendering() {
        assert_eq!(ParameterKind::Enum.to_string(), "list");
        assert_eq!(ParameterKind::String.to_string(), "str");
        assert!(ParameterKind::Float.is_numeric());
        assert!(!ParameterKind::Action.has_value());
    }

    #[test]
    fn parse_operator_input() {
        assert_eq!(
            ParameterValue::parse(ParameterKind::Int, "0x10"),
            Ok(ParameterValue::Int(16))
        );
        assert_eq!(
            ParameterValue::parse(ParameterKind::Int, "-12"),
            Ok(ParameterValue::Int(-12))
        );
        assert_eq!(
            ParameterValue::parse(ParameterKind::Bool, "Off"),
            Ok(ParameterValue::Bool(false))
        );
        assert_eq!(
            ParameterValue::parse(ParameterKind::Float, "2.5e3"),
            Ok(ParameterValue::Float(2500.0))
        );
        assert!(ParameterValue::parse(ParameterKind::Int, "1.5").is_err());
        assert!(ParameterValue::parse(ParameterKind::Group, "x").is_err());
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(ParameterValue::Int(4096).to_string(), "4096");
        assert_eq!(ParameterValue::Float(0.5).to_string(), "0.5");
        assert_eq!(ParameterValue::Enum("Mono8".into()).to_string(), "Mono8");
    }
}
