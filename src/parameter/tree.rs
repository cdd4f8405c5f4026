//! The device parameter tree.
//!
//! A [`ParameterTree`] is built once per open device from its feature
//! enumeration and caches every value. Reads come from the cache; writes are
//! validated locally, then sent to the device under a single-writer lock and
//! committed to the cache only after the device accepted them.
//!
//! # Example
//!
//! ```rust,ignore
//! let tree = ParameterTree::build(Arc::new(handle)).await?;
//!
//! let height = tree.get("AOI/Height")?;
//! tree.set("Height", ParameterValue::Int(1000)).await?;
//!
//! let mut changes = tree.subscribe();
//! while let Ok(change) = changes.recv().await {
//!     println!("{}: {} -> {}", change.path, change.old, change.new);
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use super::node::{ParameterNode, ROOT_NAME};
use super::value::{AccessMode, ParameterKind, ParameterValue};
use crate::error::{CamError, CamResult};
use crate::hardware::capabilities::WriteAck;
use crate::hardware::features::{FeatureAccess, FeatureDescriptor, FeatureType};
use crate::hardware::handle::DeviceHandle;

/// Settings that cannot change while the device is streaming.
pub const STREAMING_CRITICAL: &[&str] = &[
    "TriggerSelector",
    "TriggerMode",
    "TriggerSource",
    "TriggerActivation",
    "ExposureTime",
    "AcquisitionMode",
    "AcquisitionFrameRateEnable",
    "AcquisitionFrameRate",
    "PixelFormat",
];

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A committed change of a cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    /// Canonical path of the node.
    pub path: String,
    /// Value before the change.
    pub old: ParameterValue,
    /// Value after the change.
    pub new: ParameterValue,
}

/// Typed, validated view of a device's settings.
pub struct ParameterTree {
    device: Arc<DeviceHandle>,
    root: RwLock<ParameterNode>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ParameterChange>,
}

impl std::fmt::Debug for ParameterTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterTree")
            .field("device", &self.device)
            .field("nodes", &self.root.read().walk().count())
            .finish()
    }
}

impl ParameterTree {
    /// Query the device's features and build the tree.
    #[instrument(skip(device), fields(device = %device.name()), err)]
    pub async fn build(device: Arc<DeviceHandle>) -> CamResult<Self> {
        let features = device
            .device()
            .query_features()
            .await
            .map_err(|e| CamError::DeviceQuery(format!("feature enumeration failed: {}", e)))?;

        let children = convert_children(&features, ROOT_NAME)?;
        let root = ParameterNode::group(ROOT_NAME, children);
        let count = root.walk().count();
        info!(device = %device.name(), nodes = count, "parameter tree built");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            device,
            root: RwLock::new(root),
            write_lock: Mutex::new(()),
            changes,
        })
    }

    /// The device this tree belongs to.
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Shared handle to the device.
    pub fn device_handle(&self) -> Arc<DeviceHandle> {
        Arc::clone(&self.device)
    }

    /// Receive every committed value change.
    pub fn subscribe(&self) -> broadcast::Receiver<ParameterChange> {
        self.changes.subscribe()
    }

    /// Copy of the whole tree, for walking and rendering.
    pub fn snapshot(&self) -> ParameterNode {
        self.root.read().clone()
    }

    /// Resolve a path to its canonical form and a childless copy of the node.
    pub fn resolve(&self, path: &str) -> CamResult<(String, ParameterNode)> {
        let root = self.root.read();
        root.find(path)
            .map(|(canonical, node)| (canonical, node.detached()))
            .ok_or_else(|| CamError::NotFound(format!("no parameter '{}'", path)))
    }

    /// Cached value of a leaf.
    pub fn get(&self, path: &str) -> CamResult<ParameterValue> {
        let (canonical, node) = self.resolve(path)?;
        match node.kind() {
            ParameterKind::Group => Err(CamError::NotFound(format!(
                "'{}' is a group, not a parameter",
                canonical
            ))),
            ParameterKind::Action => Err(CamError::Access {
                path: canonical,
                reason: "actions hold no value".into(),
            }),
            _ => node
                .value()
                .cloned()
                .ok_or_else(|| CamError::NotFound(format!("'{}' has no value", canonical))),
        }
    }

    /// Re-read a leaf from the device and update the cache.
    pub async fn read_through(&self, path: &str) -> CamResult<ParameterValue> {
        let (canonical, node) = self.resolve(path)?;
        if !node.kind().has_value() {
            return self.get(&canonical);
        }
        let _guard = self.write_lock.lock().await;
        let value = self
            .device
            .device()
            .read_feature(&canonical)
            .await
            .map_err(|e| CamError::device_io(format!("read {}", canonical), e))?;
        if value.kind() != node.kind() {
            return Err(CamError::DeviceQuery(format!(
                "device returned {} value for {} parameter '{}'",
                value.kind(),
                node.kind(),
                canonical
            )));
        }
        self.commit(&canonical, value.clone());
        Ok(value)
    }

    /// Re-read every value-bearing leaf. Returns how many values changed.
    pub async fn refresh(&self) -> CamResult<usize> {
        let paths: Vec<String> = self
            .root
            .read()
            .walk()
            .filter(|(_, node)| node.kind().has_value())
            .map(|(path, _)| path)
            .collect();

        let mut changed = 0;
        for path in &paths {
            let before = self.get(path)?;
            if self.read_through(path).await? != before {
                changed += 1;
            }
        }
        debug!(device = %self.device.name(), leaves = paths.len(), changed, "parameter tree refreshed");
        Ok(changed)
    }

    /// Validate and write a value.
    ///
    /// Nothing is sent to the device unless the value passes every local
    /// check. The cache changes only when the device accepted the write.
    #[instrument(skip(self, value), fields(device = %self.device.name(), value = %value))]
    pub async fn set(&self, path: &str, value: ParameterValue) -> CamResult<()> {
        let (canonical, node) = self.resolve(path)?;

        match node.kind() {
            ParameterKind::Group | ParameterKind::Action => {
                return Err(CamError::Access {
                    path: canonical,
                    reason: format!("{} nodes cannot be written", node.kind()),
                })
            }
            _ => {}
        }
        if node.access().is_read_only() {
            return Err(CamError::Access {
                path: canonical,
                reason: "parameter is read-only".into(),
            });
        }
        node.validate(&value).map_err(|constraint| CamError::Validation {
            path: canonical.clone(),
            constraint,
        })?;

        let _guard = self.write_lock.lock().await;
        // The phase cannot move to Streaming while a critical write is in flight.
        let _phase = if STREAMING_CRITICAL.contains(&node.name()) {
            let held = self.device.hold_phase().await;
            self.check_streaming_lock(&canonical)?;
            Some(held)
        } else {
            None
        };

        let ack = self
            .device
            .device()
            .write_feature(&canonical, &value)
            .await
            .map_err(|e| {
                warn!(path = %canonical, error = %e, "device rejected write");
                CamError::device_io(format!("write {}", canonical), e)
            })?;
        if ack == WriteAck::Sent {
            debug!(path = %canonical, "write not confirmed by device, caching optimistically");
        }
        self.commit(&canonical, value);
        Ok(())
    }

    /// Execute an action.
    #[instrument(skip(self), fields(device = %self.device.name()))]
    pub async fn invoke(&self, path: &str) -> CamResult<()> {
        let (canonical, node) = self.resolve(path)?;
        if node.kind() != ParameterKind::Action {
            return Err(CamError::TypeMismatch {
                path: canonical,
                expected: ParameterKind::Action,
                found: node.kind(),
            });
        }
        if node.access().is_read_only() {
            return Err(CamError::Access {
                path: canonical,
                reason: "action is read-only".into(),
            });
        }
        self.device
            .device()
            .invoke_feature(&canonical)
            .await
            .map_err(|e| CamError::device_io(format!("invoke {}", canonical), e))
    }

    fn check_streaming_lock(&self, canonical: &str) -> CamResult<()> {
        let phase = self.device.stream_phase();
        if phase.locks_settings() {
            return Err(CamError::DeviceBusy(format!(
                "'{}' cannot change while the device is {}",
                canonical, phase
            )));
        }
        Ok(())
    }

    fn commit(&self, canonical: &str, value: ParameterValue) {
        let old = {
            let mut root = self.root.write();
            match root.find_mut(canonical) {
                Some(node) => node.replace_value(value.clone()),
                None => return,
            }
        };
        if let Some(old) = old {
            if old != value {
                // No receivers is fine.
                let _ = self.changes.send(ParameterChange {
                    path: canonical.to_string(),
                    old,
                    new: value,
                });
            }
        }
    }
}

// =============================================================================
// Feature conversion
// =============================================================================

fn convert_children(feature: &FeatureDescriptor, path: &str) -> CamResult<Vec<ParameterNode>> {
    let mut seen = HashSet::new();
    let mut children = Vec::with_capacity(feature.children.len());
    for child in &feature.children {
        if !seen.insert(child.name.as_str()) {
            return Err(malformed(path, &child.name, "duplicate name"));
        }
        if let Some(node) = convert(child, path)? {
            children.push(node);
        }
    }
    Ok(children)
}

fn malformed(parent: &str, name: &str, reason: &str) -> CamError {
    CamError::DeviceQuery(format!("feature '{}/{}': {}", parent, name, reason))
}

/// Convert one feature; `None` for features that are not settings.
fn convert(feature: &FeatureDescriptor, parent: &str) -> CamResult<Option<ParameterNode>> {
    let name = feature.name.as_str();
    if name.is_empty() || name.contains('/') {
        return Err(malformed(parent, name, "invalid name"));
    }
    let feature_type = feature
        .feature_type
        .ok_or_else(|| malformed(parent, name, "missing type"))?;

    let kind = match feature_type {
        FeatureType::Register => {
            debug!(feature = name, "skipping register feature");
            return Ok(None);
        }
        FeatureType::Integer => ParameterKind::Int,
        FeatureType::Float => ParameterKind::Float,
        FeatureType::Boolean => ParameterKind::Bool,
        FeatureType::Enumeration => ParameterKind::Enum,
        FeatureType::String => ParameterKind::String,
        FeatureType::Command => ParameterKind::Action,
        FeatureType::Category => ParameterKind::Group,
    };

    let access = match feature.access {
        Some(FeatureAccess::ReadOnly) => AccessMode::ReadOnly,
        Some(FeatureAccess::ReadWrite) | Some(FeatureAccess::WriteOnly) => AccessMode::ReadWrite,
        Some(FeatureAccess::NotAvailable) => {
            debug!(feature = name, "skipping unavailable feature");
            return Ok(None);
        }
        None if kind == ParameterKind::Group => AccessMode::ReadOnly,
        None => return Err(malformed(parent, name, "missing access mode")),
    };

    let path = if parent == ROOT_NAME {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    };

    let mut node = if kind == ParameterKind::Group {
        ParameterNode::group(name, convert_children(feature, &path)?)
    } else {
        if !feature.children.is_empty() {
            return Err(malformed(parent, name, "leaf feature has children"));
        }
        if kind == ParameterKind::Action {
            ParameterNode::action(name)
        } else {
            let value = feature
                .value
                .clone()
                .ok_or_else(|| malformed(parent, name, "missing value"))?;
            if value.kind() != kind {
                return Err(malformed(
                    parent,
                    name,
                    &format!("{} value for {} feature", value.kind(), kind),
                ));
            }
            ParameterNode::leaf(name, value)
        }
    };

    if kind.is_numeric() {
        let (min, max) = match (&feature.min, &feature.max) {
            (Some(min), Some(max)) if min.kind() == kind && max.kind() == kind => {
                (min.clone(), max.clone())
            }
            (Some(_), Some(_)) => return Err(malformed(parent, name, "limits of the wrong type")),
            _ => return Err(malformed(parent, name, "missing limits")),
        };
        node = node.with_limits(min, max);
        if let Some(step) = &feature.increment {
            if step.kind() != kind {
                return Err(malformed(parent, name, "increment of the wrong type"));
            }
            node = node.with_step(step.clone());
        }
    }

    if kind == ParameterKind::Enum {
        if feature.entries.is_empty() {
            return Err(malformed(parent, name, "enumeration without entries"));
        }
        node = node.with_choices(feature.entries.clone());
    }

    node = node.with_access(access);
    if let Some(title) = &feature.display_name {
        node = node.with_title(title.clone());
    }
    if let Some(tip) = &feature.tooltip {
        node = node.with_tip(tip.clone());
    }
    if let Some(unit) = &feature.unit {
        node = node.with_suffix(unit.clone());
    }
    Ok(Some(node))
}
