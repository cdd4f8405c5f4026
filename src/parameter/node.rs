//! Parameter nodes and depth-first traversal.

use serde::Serialize;

use super::value::{AccessMode, ParameterKind, ParameterValue};
use crate::error::Constraint;

/// Name of the group at the top of every parameter tree.
pub const ROOT_NAME: &str = "Root";

/// Relative tolerance used when checking float values against a step.
const FLOAT_STEP_TOLERANCE: f64 = 1e-9;

/// One named setting (or group of settings) of a device.
///
/// Leaves never have children and groups never have a value. Nodes are
/// normally produced by [`super::ParameterTree::build`] from the device's
/// feature enumeration; the builder methods exist for tests and tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterNode {
    name: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tip: Option<String>,
    kind: ParameterKind,
    access: AccessMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<(ParameterValue, ParameterValue)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suffix: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    choices: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<ParameterNode>,
}

impl ParameterNode {
    /// Create a group with the given children.
    pub fn group(name: impl Into<String>, children: Vec<ParameterNode>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            tip: None,
            kind: ParameterKind::Group,
            access: AccessMode::ReadOnly,
            value: None,
            limits: None,
            step: None,
            suffix: None,
            choices: Vec::new(),
            children,
        }
    }

    /// Create a read-write leaf holding `value`.
    pub fn leaf(name: impl Into<String>, value: ParameterValue) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            tip: None,
            kind: value.kind(),
            access: AccessMode::ReadWrite,
            value: Some(value),
            limits: None,
            step: None,
            suffix: None,
            choices: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create a read-write action.
    pub fn action(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            tip: None,
            kind: ParameterKind::Action,
            access: AccessMode::ReadWrite,
            value: None,
            limits: None,
            step: None,
            suffix: None,
            choices: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the tooltip.
    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    /// Set the access mode.
    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Set inclusive limits.
    pub fn with_limits(mut self, min: ParameterValue, max: ParameterValue) -> Self {
        self.limits = Some((min, max));
        self
    }

    /// Set the increment.
    pub fn with_step(mut self, step: ParameterValue) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the unit suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Set the enumeration entries.
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Optional tooltip.
    pub fn tip(&self) -> Option<&str> {
        self.tip.as_deref()
    }

    /// Node kind.
    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    /// Access mode.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Cached value (`None` for groups and actions).
    pub fn value(&self) -> Option<&ParameterValue> {
        self.value.as_ref()
    }

    /// Inclusive `(min, max)` limits.
    pub fn limits(&self) -> Option<(&ParameterValue, &ParameterValue)> {
        self.limits.as_ref().map(|(min, max)| (min, max))
    }

    /// Increment between valid values.
    pub fn step(&self) -> Option<&ParameterValue> {
        self.step.as_ref()
    }

    /// Unit suffix.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Enumeration entries.
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    /// Ordered children (empty for leaves).
    pub fn children(&self) -> &[ParameterNode] {
        &self.children
    }

    /// True for groups.
    pub fn is_group(&self) -> bool {
        self.kind == ParameterKind::Group
    }

    pub(crate) fn replace_value(&mut self, value: ParameterValue) -> Option<ParameterValue> {
        self.value.replace(value)
    }

    /// Copy of this node without its children.
    pub(crate) fn detached(&self) -> ParameterNode {
        ParameterNode {
            children: Vec::new(),
            ..self.clone()
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check `value` against this node's type, limits, step and choices.
    ///
    /// Access is not checked here; callers decide whether the node may be
    /// written at all.
    pub fn validate(&self, value: &ParameterValue) -> Result<(), Constraint> {
        if value.kind() != self.kind {
            return Err(Constraint::Type {
                expected: self.kind,
                found: value.kind(),
            });
        }

        match value {
            ParameterValue::Int(v) => self.validate_int(*v),
            ParameterValue::Float(v) => self.validate_float(*v),
            ParameterValue::Enum(entry) => {
                if self.choices.iter().any(|c| c == entry) {
                    Ok(())
                } else {
                    Err(Constraint::Choices(self.choices.clone()))
                }
            }
            ParameterValue::Bool(_) | ParameterValue::String(_) => Ok(()),
        }
    }

    fn validate_int(&self, v: i64) -> Result<(), Constraint> {
        if let Some((min, max)) = &self.limits {
            let lo = min.as_int().unwrap_or(i64::MIN);
            let hi = max.as_int().unwrap_or(i64::MAX);
            if v < lo || v > hi {
                return Err(self.limits_violation());
            }
        }
        if let Some(step) = self.step.as_ref().and_then(ParameterValue::as_int) {
            let origin = self
                .limits
                .as_ref()
                .and_then(|(min, _)| min.as_int())
                .unwrap_or(0);
            if step > 0 && (i128::from(v) - i128::from(origin)) % i128::from(step) != 0 {
                return Err(self.step_violation(ParameterValue::Int(origin)));
            }
        }
        Ok(())
    }

    fn validate_float(&self, v: f64) -> Result<(), Constraint> {
        if !v.is_finite() {
            return Err(self.limits_violation());
        }
        if let Some((min, max)) = &self.limits {
            let lo = min.as_float().unwrap_or(f64::NEG_INFINITY);
            let hi = max.as_float().unwrap_or(f64::INFINITY);
            if v < lo || v > hi {
                return Err(self.limits_violation());
            }
        }
        if let Some(step) = self.step.as_ref().and_then(ParameterValue::as_float) {
            let origin = self
                .limits
                .as_ref()
                .and_then(|(min, _)| min.as_float())
                .unwrap_or(0.0);
            if step > 0.0 {
                let k = (v - origin) / step;
                if (k - k.round()).abs() > FLOAT_STEP_TOLERANCE * k.abs().max(1.0) {
                    return Err(self.step_violation(ParameterValue::Float(origin)));
                }
            }
        }
        Ok(())
    }

    fn limits_violation(&self) -> Constraint {
        let (min, max) = self.limits.clone().unwrap_or_else(|| match self.kind {
            ParameterKind::Int => (ParameterValue::Int(i64::MIN), ParameterValue::Int(i64::MAX)),
            _ => (
                ParameterValue::Float(f64::MIN),
                ParameterValue::Float(f64::MAX),
            ),
        });
        Constraint::Limits { min, max }
    }

    fn step_violation(&self, origin: ParameterValue) -> Constraint {
        Constraint::Step {
            min: origin,
            step: self.step.clone().unwrap_or(ParameterValue::Int(1)),
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Depth-first pre-order walk over every node below this one.
    ///
    /// Paths are slash separated and relative to `self`. Siblings are visited
    /// in enumeration order. The walk is lazy; call again for a new pass.
    pub fn walk(&self) -> Walk<'_> {
        let stack = self
            .children
            .iter()
            .rev()
            .map(|child| (String::new(), child))
            .collect();
        Walk { stack }
    }

    /// Resolve `path` below this node, returning the canonical path.
    ///
    /// Accepts `A/B/C`, an optional leading `Root/` or `/`, and bare names
    /// (first depth-first match). `""` and `"Root"` resolve to `self`.
    pub fn find(&self, path: &str) -> Option<(String, &ParameterNode)> {
        let trimmed = normalize(path);
        if trimmed.is_empty() {
            return Some((String::new(), self));
        }
        if trimmed.contains('/') {
            let mut node = self;
            let mut segments = Vec::new();
            for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
                node = node.children.iter().find(|c| c.name == segment)?;
                segments.push(segment);
            }
            Some((segments.join("/"), node))
        } else {
            self.walk().find(|(_, node)| node.name == trimmed)
        }
    }

    /// Mutable lookup by canonical path (as returned from [`ParameterNode::find`]).
    pub(crate) fn find_mut(&mut self, canonical: &str) -> Option<&mut ParameterNode> {
        let mut node = self;
        for segment in canonical.split('/').filter(|s| !s.is_empty()) {
            node = node.children.iter_mut().find(|c| c.name == segment)?;
        }
        Some(node)
    }
}

fn normalize(path: &str) -> &str {
    let path = path.trim().trim_matches('/');
    if path == ROOT_NAME {
        return "";
    }
    path.strip_prefix("Root/").unwrap_or(path)
}

/// Lazy depth-first iterator returned by [`ParameterNode::walk`].
pub struct Walk<'a> {
    stack: Vec<(String, &'a ParameterNode)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (String, &'a ParameterNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (parent, node) = self.stack.pop()?;
        let path = if parent.is_empty() {
            node.name.clone()
        } else {
            format!("{}/{}", parent, node.name)
        };
        for child in node.children.iter().rev() {
            self.stack.push((path.clone(), child));
        }
        Some((path, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterNode {
        ParameterNode::group(
            ROOT_NAME,
            vec![
                ParameterNode::group(
                    "AOI",
                    vec![
                        ParameterNode::leaf("Width", ParameterValue::Int(1024))
                            .with_limits(ParameterValue::Int(16), ParameterValue::Int(4096))
                            .with_step(ParameterValue::Int(4)),
                        ParameterNode::leaf("Height", ParameterValue::Int(1040))
                            .with_limits(ParameterValue::Int(1), ParameterValue::Int(4096)),
                    ],
                ),
                ParameterNode::group(
                    "AcquisitionControl",
                    vec![
                        ParameterNode::leaf("ExposureTime", ParameterValue::Float(1000.0))
                            .with_limits(ParameterValue::Float(10.0), ParameterValue::Float(1e7))
                            .with_suffix("us"),
                        ParameterNode::leaf("TriggerMode", ParameterValue::Enum("Off".into()))
                            .with_choices(vec!["Off".into(), "On".into()]),
                        ParameterNode::action("TriggerSoftware"),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn walk_is_preorder_in_enumeration_order() {
        let root = sample();
        let paths: Vec<String> = root.walk().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "AOI",
                "AOI/Width",
                "AOI/Height",
                "AcquisitionControl",
                "AcquisitionControl/ExposureTime",
                "AcquisitionControl/TriggerMode",
                "AcquisitionControl/TriggerSoftware",
            ]
        );
        // A second walk starts over.
        assert_eq!(root.walk().count(), paths.len());
    }

    #[test]
    fn find_accepts_root_prefix_and_bare_names() {
        let root = sample();
        let (path, node) = root.find("Root/AOI/Height").unwrap();
        assert_eq!(path, "AOI/Height");
        assert_eq!(node.value(), Some(&ParameterValue::Int(1040)));

        let (path, _) = root.find("ExposureTime").unwrap();
        assert_eq!(path, "AcquisitionControl/ExposureTime");

        assert!(root.find("AOI/Depth").is_none());
        assert!(root.find("Root").unwrap().1.is_group());
    }

    #[test]
    fn find_reports_canonical_path_for_doubled_separators() {
        let root = sample();
        let (path, node) = root.find("AOI//Height").unwrap();
        assert_eq!(path, "AOI/Height");
        assert_eq!(node.name(), "Height");

        let (path, _) = root.find("/Root/AcquisitionControl///TriggerMode/").unwrap();
        assert_eq!(path, "AcquisitionControl/TriggerMode");
    }

    #[test]
    fn validate_limits_step_and_choices() {
        let root = sample();
        let (_, height) = root.find("Height").unwrap();
        assert!(height.validate(&ParameterValue::Int(1040)).is_ok());
        assert!(matches!(
            height.validate(&ParameterValue::Int(5000)),
            Err(Constraint::Limits { .. })
        ));

        let (_, width) = root.find("Width").unwrap();
        assert!(width.validate(&ParameterValue::Int(1020)).is_ok());
        assert!(matches!(
            width.validate(&ParameterValue::Int(1022)),
            Err(Constraint::Step { .. })
        ));

        let (_, mode) = root.find("TriggerMode").unwrap();
        assert!(mode.validate(&ParameterValue::Enum("On".into())).is_ok());
        assert!(matches!(
            mode.validate(&ParameterValue::Enum("Sometimes".into())),
            Err(Constraint::Choices(_))
        ));
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let root = sample();
        let (_, exposure) = root.find("ExposureTime").unwrap();
        assert_eq!(
            exposure.validate(&ParameterValue::Int(100)),
            Err(Constraint::Type {
                expected: ParameterKind::Float,
                found: ParameterKind::Int,
            })
        );
    }

    #[test]
    fn float_step_uses_relative_tolerance() {
        let node = ParameterNode::leaf("Gain", ParameterValue::Float(0.0))
            .with_limits(ParameterValue::Float(0.0), ParameterValue::Float(48.0))
            .with_step(ParameterValue::Float(0.1));
        assert!(node.validate(&ParameterValue::Float(0.3)).is_ok());
        assert!(node.validate(&ParameterValue::Float(0.35)).is_err());
        assert!(node.validate(&ParameterValue::Float(f64::NAN)).is_err());
    }
}
