//! Feature map of the emulated camera.
//!
//! Holds the feature tree the device reports and applies the device-side
//! rules a real camera enforces on writes: access, range, increment, entries,
//! the sensor geometry and per-selector trigger settings.

use std::collections::HashMap;
use std::time::Duration;

use super::faults::DRIVER_TYPE;
use super::MockCameraConfig;
use crate::error::{DriverError, DriverErrorKind, DriverResult};
use crate::hardware::features::{FeatureAccess, FeatureDescriptor, FeatureType};
use crate::hardware::frame::PixelType;
use crate::parameter::ParameterValue;

const TRIGGER_SELECTORS: &[&str] = &["AcquisitionStart", "FrameStart"];

/// Features that cannot change while the stream is running.
const STREAM_LOCKED: &[&str] = &[
    "Width",
    "Height",
    "PixelFormat",
    "BinningHorizontal",
    "BinningVertical",
];

#[derive(Debug, Clone, PartialEq)]
struct TriggerSetting {
    mode: String,
    source: String,
    activation: String,
}

impl Default for TriggerSetting {
    fn default() -> Self {
        Self {
            mode: "Off".into(),
            source: "Line1".into(),
            activation: "RisingEdge".into(),
        }
    }
}

/// How frames are started while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerKind {
    /// Free run: one frame per period.
    FreeRun,
    /// One frame per `TriggerSoftware`.
    Software,
    /// Hardware line; never fires in emulation.
    Line,
}

/// Snapshot of the settings a stream runs with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub trigger: TriggerKind,
    pub exposure: Duration,
    pub period: Duration,
    pub test_image: String,
}

fn rejected(message: impl Into<String>) -> DriverError {
    DriverError::new(DRIVER_TYPE, DriverErrorKind::Rejected, message)
}

fn not_found(name: &str) -> DriverError {
    DriverError::new(
        DRIVER_TYPE,
        DriverErrorKind::NotFound,
        format!("no feature named '{}'", name),
    )
}

/// Last segment of a feature path.
pub(crate) fn feature_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub(crate) struct NodeMap {
    root: FeatureDescriptor,
    sensor_width: i64,
    sensor_height: i64,
    triggers: HashMap<String, TriggerSetting>,
    locked: bool,
}

impl NodeMap {
    pub(crate) fn new(index: usize, config: &MockCameraConfig) -> Self {
        let sensor_width = i64::from(config.width);
        let sensor_height = i64::from(config.height);
        let root = build_features(index, sensor_width, sensor_height);
        let triggers = TRIGGER_SELECTORS
            .iter()
            .map(|s| (s.to_string(), TriggerSetting::default()))
            .collect();
        let mut map = Self {
            root,
            sensor_width,
            sensor_height,
            triggers,
            locked: false,
        };
        map.sync_derived();
        map
    }

    pub(crate) fn snapshot(&self) -> FeatureDescriptor {
        self.root.clone()
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    fn feature(&self, name: &str) -> DriverResult<&FeatureDescriptor> {
        self.root.find(name).ok_or_else(|| not_found(name))
    }

    pub(crate) fn read(&self, path: &str) -> DriverResult<ParameterValue> {
        let name = feature_name(path);
        let feature = self.feature(name)?;
        feature
            .value
            .clone()
            .ok_or_else(|| rejected(format!("'{}' has no readable value", name)))
    }

    pub(crate) fn feature_type(&self, path: &str) -> DriverResult<FeatureType> {
        let name = feature_name(path);
        self.feature(name)?
            .feature_type
            .ok_or_else(|| rejected(format!("'{}' has no type", name)))
    }

    fn int(&self, name: &str) -> i64 {
        self.read(name).ok().and_then(|v| v.as_int()).unwrap_or(0)
    }

    fn float(&self, name: &str) -> f64 {
        self.read(name).ok().and_then(|v| v.as_float()).unwrap_or(0.0)
    }

    fn text(&self, name: &str) -> String {
        self.read(name)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Apply a write with the checks the device itself performs.
    pub(crate) fn write(&mut self, path: &str, value: &ParameterValue) -> DriverResult<()> {
        let name = feature_name(path).to_string();
        let feature = self.feature(&name)?;

        match feature.access {
            Some(FeatureAccess::ReadWrite) | Some(FeatureAccess::WriteOnly) => {}
            _ => return Err(rejected(format!("'{}' is not writable", name))),
        }
        if self.locked && STREAM_LOCKED.contains(&name.as_str()) {
            return Err(rejected(format!("'{}' is locked while streaming", name)));
        }
        check_value(feature, value)?;
        self.check_geometry(&name, value)?;

        self.store(&name, value.clone());
        self.apply_side_effects(&name);
        self.sync_derived();
        Ok(())
    }

    /// Set a value bypassing every rule (out-of-band device change).
    pub(crate) fn poke(&mut self, name: &str, value: ParameterValue) -> DriverResult<()> {
        let feature = self.root.find_mut(name).ok_or_else(|| not_found(name))?;
        feature.value = Some(value);
        Ok(())
    }

    fn store(&mut self, name: &str, value: ParameterValue) {
        if let Some(feature) = self.root.find_mut(name) {
            feature.value = Some(value);
        }
    }

    fn check_geometry(&self, name: &str, value: &ParameterValue) -> DriverResult<()> {
        let v = value.as_int().unwrap_or(0);
        let (size_ok, what) = match name {
            "Width" => (v + self.int("OffsetX") <= self.int("WidthMax"), "Width + OffsetX"),
            "OffsetX" => (v + self.int("Width") <= self.int("WidthMax"), "Width + OffsetX"),
            "Height" => (v + self.int("OffsetY") <= self.int("HeightMax"), "Height + OffsetY"),
            "OffsetY" => (v + self.int("Height") <= self.int("HeightMax"), "Height + OffsetY"),
            _ => return Ok(()),
        };
        if size_ok {
            Ok(())
        } else {
            Err(rejected(format!("{} exceeds the sensor", what)))
        }
    }

    fn apply_side_effects(&mut self, name: &str) {
        match name {
            "BinningHorizontal" | "BinningVertical" => {
                let bh = self.int("BinningHorizontal").max(1);
                let bv = self.int("BinningVertical").max(1);
                let width_max = (self.sensor_width / bh) / 4 * 4;
                let height_max = self.sensor_height / bv;
                self.store("WidthMax", ParameterValue::Int(width_max));
                self.store("HeightMax", ParameterValue::Int(height_max));
                let width = self.int("Width").min(width_max - self.int("OffsetX")).max(16);
                let height = self.int("Height").min(height_max - self.int("OffsetY")).max(1);
                self.store("Width", ParameterValue::Int(width));
                self.store("Height", ParameterValue::Int(height));
            }
            "TriggerSelector" => {
                let setting = self
                    .triggers
                    .get(&self.text("TriggerSelector"))
                    .cloned()
                    .unwrap_or_default();
                self.store("TriggerMode", ParameterValue::Enum(setting.mode));
                self.store("TriggerSource", ParameterValue::Enum(setting.source));
                self.store("TriggerActivation", ParameterValue::Enum(setting.activation));
            }
            "TriggerMode" | "TriggerSource" | "TriggerActivation" => {
                let selector = self.text("TriggerSelector");
                let setting = TriggerSetting {
                    mode: self.text("TriggerMode"),
                    source: self.text("TriggerSource"),
                    activation: self.text("TriggerActivation"),
                };
                self.triggers.insert(selector, setting);
            }
            _ => {}
        }
    }

    fn sync_derived(&mut self) {
        let period = self.frame_period();
        let rate = if period.is_zero() {
            0.0
        } else {
            1.0 / period.as_secs_f64()
        };
        self.store("ResultingFrameRate", ParameterValue::Float(rate));
    }

    fn frame_period(&self) -> Duration {
        let exposure = self.float("ExposureTime").max(0.0) * 1e-6;
        let mut period = exposure;
        if self.read("AcquisitionFrameRateEnable").ok().and_then(|v| v.as_bool()) == Some(true) {
            let rate = self.float("AcquisitionFrameRate");
            if rate > 0.0 {
                period = period.max(1.0 / rate);
            }
        }
        Duration::from_secs_f64(period)
    }

    pub(crate) fn stream_settings(&self) -> StreamSettings {
        let frame_start = self.triggers.get("FrameStart").cloned().unwrap_or_default();
        let trigger = match (frame_start.mode.as_str(), frame_start.source.as_str()) {
            ("On", "Software") => TriggerKind::Software,
            ("On", _) => TriggerKind::Line,
            _ => TriggerKind::FreeRun,
        };
        StreamSettings {
            width: u32::try_from(self.int("Width")).unwrap_or(0),
            height: u32::try_from(self.int("Height")).unwrap_or(0),
            pixel_type: PixelType::from_pixel_format(&self.text("PixelFormat"))
                .unwrap_or(PixelType::U8),
            trigger,
            exposure: Duration::from_secs_f64(self.float("ExposureTime").max(0.0) * 1e-6),
            period: self.frame_period(),
            test_image: self.text("TestImageSelector"),
        }
    }

    pub(crate) fn failed_buffer_count(&self) -> u32 {
        u32::try_from(self.int("ForceFailedBufferCount")).unwrap_or(1)
    }
}

fn check_value(feature: &FeatureDescriptor, value: &ParameterValue) -> DriverResult<()> {
    let name = &feature.name;
    let matches_type = matches!(
        (feature.feature_type, value),
        (Some(FeatureType::Integer), ParameterValue::Int(_))
            | (Some(FeatureType::Float), ParameterValue::Float(_))
            | (Some(FeatureType::Float), ParameterValue::Int(_))
            | (Some(FeatureType::Boolean), ParameterValue::Bool(_))
            | (Some(FeatureType::Enumeration), ParameterValue::Enum(_))
            | (Some(FeatureType::Enumeration), ParameterValue::String(_))
            | (Some(FeatureType::String), ParameterValue::String(_))
    );
    if !matches_type {
        return Err(rejected(format!("'{}' cannot hold {:?}", name, value)));
    }

    if let (Some(v), Some(min), Some(max)) = (
        value.as_float(),
        feature.min.as_ref().and_then(ParameterValue::as_float),
        feature.max.as_ref().and_then(ParameterValue::as_float),
    ) {
        if v < min || v > max {
            return Err(rejected(format!(
                "'{}' value {} out of range [{}, {}]",
                name, value, min, max
            )));
        }
    }

    if let (Some(v), Some(inc)) = (
        value.as_int(),
        feature.increment.as_ref().and_then(ParameterValue::as_int),
    ) {
        let origin = feature.min.as_ref().and_then(ParameterValue::as_int).unwrap_or(0);
        if inc > 0 && (v - origin) % inc != 0 {
            return Err(rejected(format!("'{}' value {} violates increment {}", name, v, inc)));
        }
    }

    if let Some(entry) = value.as_str() {
        if feature.feature_type == Some(FeatureType::Enumeration)
            && !feature.entries.iter().any(|e| e == entry)
        {
            return Err(rejected(format!("'{}' has no entry '{}'", name, entry)));
        }
    }
    Ok(())
}

fn build_features(index: usize, sensor_width: i64, sensor_height: i64) -> FeatureDescriptor {
    let serial = format!("{:08}", 21_000_000 + index);
    FeatureDescriptor::category(
        "Root",
        vec![
            FeatureDescriptor::category(
                "DeviceControl",
                vec![
                    FeatureDescriptor::string("DeviceVendorName", "camctl").read_only(),
                    FeatureDescriptor::string("DeviceModelName", "Emulated Camera").read_only(),
                    FeatureDescriptor::string("DeviceVersion", "1.0").read_only(),
                    FeatureDescriptor::string("DeviceFirmwareVersion", "1.0.0").read_only(),
                    FeatureDescriptor::string("DeviceSerialNumber", &serial).read_only(),
                    FeatureDescriptor::string("DeviceUserID", "")
                        .with_tooltip("User-defined name of the device"),
                    FeatureDescriptor::float("DeviceTemperature", 38.5, -40.0, 150.0)
                        .read_only()
                        .with_unit("C"),
                    FeatureDescriptor::register("DeviceRegisters"),
                ],
            )
            .with_display_name("Device Control"),
            FeatureDescriptor::category(
                "AOI",
                vec![
                    FeatureDescriptor::integer("Width", sensor_width, 16, 4096)
                        .with_increment(ParameterValue::Int(4))
                        .with_unit("px"),
                    FeatureDescriptor::integer("Height", sensor_height, 1, 4096).with_unit("px"),
                    FeatureDescriptor::integer("OffsetX", 0, 0, 4080)
                        .with_increment(ParameterValue::Int(4)),
                    FeatureDescriptor::integer("OffsetY", 0, 0, 4095),
                    FeatureDescriptor::integer("WidthMax", sensor_width, 16, 4096).read_only(),
                    FeatureDescriptor::integer("HeightMax", sensor_height, 1, 4096).read_only(),
                    FeatureDescriptor::integer("SensorWidth", sensor_width, 16, 4096).read_only(),
                    FeatureDescriptor::integer("SensorHeight", sensor_height, 1, 4096).read_only(),
                    FeatureDescriptor::integer("BinningHorizontal", 1, 1, 4),
                    FeatureDescriptor::integer("BinningVertical", 1, 1, 4),
                    FeatureDescriptor::enumeration("PixelFormat", "Mono8", &["Mono8", "Mono12", "Mono16"]),
                    FeatureDescriptor::boolean("ReverseX", false),
                ],
            )
            .with_display_name("Image Format Control"),
            FeatureDescriptor::category(
                "AcquisitionControl",
                vec![
                    FeatureDescriptor::enumeration(
                        "AcquisitionMode",
                        "Continuous",
                        &["SingleFrame", "MultiFrame", "Continuous"],
                    ),
                    FeatureDescriptor::command("AcquisitionStart"),
                    FeatureDescriptor::command("AcquisitionStop"),
                    FeatureDescriptor::enumeration("TriggerSelector", "FrameStart", TRIGGER_SELECTORS),
                    FeatureDescriptor::enumeration("TriggerMode", "Off", &["Off", "On"]),
                    FeatureDescriptor::enumeration("TriggerSource", "Line1", &["Software", "Line1", "Line2"]),
                    FeatureDescriptor::enumeration(
                        "TriggerActivation",
                        "RisingEdge",
                        &["RisingEdge", "FallingEdge"],
                    ),
                    FeatureDescriptor::command("TriggerSoftware")
                        .with_tooltip("Generate a software trigger"),
                    FeatureDescriptor::float("ExposureTime", 10_000.0, 10.0, 10_000_000.0).with_unit("us"),
                    FeatureDescriptor::boolean("AcquisitionFrameRateEnable", false),
                    FeatureDescriptor::float("AcquisitionFrameRate", 100.0, 0.1, 1000.0).with_unit("Hz"),
                    FeatureDescriptor::float("ResultingFrameRate", 100.0, 0.0, 100_000.0)
                        .read_only()
                        .with_unit("Hz"),
                ],
            )
            .with_display_name("Acquisition Control"),
            FeatureDescriptor::category(
                "TransportLayer",
                vec![
                    FeatureDescriptor::integer("GevSCPSPacketSize", 1500, 220, 16404)
                        .with_increment(ParameterValue::Int(4))
                        .with_unit("B"),
                    FeatureDescriptor::integer("GevSCPD", 0, 0, 65535)
                        .with_tooltip("Inter-packet delay in ticks"),
                    FeatureDescriptor::integer("GevSCFTD", 0, 0, 65535)
                        .with_tooltip("Frame transmission delay in ticks"),
                ],
            )
            .with_display_name("Transport Layer"),
            FeatureDescriptor::category(
                "TestControl",
                vec![
                    FeatureDescriptor::enumeration(
                        "TestImageSelector",
                        "Testimage1",
                        &["Off", "Testimage1", "Testimage2"],
                    ),
                    FeatureDescriptor::integer("ForceFailedBufferCount", 1, 1, 1024),
                    FeatureDescriptor::command("ForceFailedBuffer")
                        .with_tooltip("Mark the next buffers as failed"),
                ],
            )
            .with_display_name("Test Control"),
        ],
    )
}
