//! Text renderings of descriptors, parameter snapshots and acquisitions.
//!
//! Everything here is pure: functions take snapshots and return strings or
//! [`Table`]s, the binary decides where they go.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;

use crate::acquisition::{AcquisitionReport, FrameRecord};
use crate::error::{CamError, CamResult};
use crate::hardware::{DeviceDescriptor, InfoValue, TransportDescriptor};
use crate::parameter::ParameterNode;

/// Attribute lines in a parameter tree are cut beyond this many characters.
pub const TREE_LINE_WIDTH: usize = 80;
const TREE_LINE_KEEP: usize = 75;
const ELLIPSIS: &str = "[...]";

/// Device properties that are noise in the device list.
const CAMERA_TABLE_HIDDEN: &[&str] = &[
    "DeviceFactory",
    "SubnetAddress",
    "IpConfigOptions",
    "IpConfigCurrent",
    "IpAddress",
    "PortNr",
    "DefaultGateway",
    "SubnetMask",
    "InterfaceID",
    "VendorName",
];

const CAMERA_TABLE_HEADERS: &[(&str, &str)] = &[
    ("DeviceClass", "Class"),
    ("ModelName", "Name"),
    ("UserDefinedName", "User name"),
    ("FriendlyName", "Friendly name"),
    ("FullName", "Full name"),
    ("SerialNumber", "Serial Nb."),
];

// =============================================================================
// Name filter
// =============================================================================

/// Shell-style name pattern (`*`, `?`, `[abc]`, `[!abc]`), matched against
/// the whole name, case sensitive.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: String,
    regex: Option<Regex>,
}

impl NameFilter {
    /// Compile a shell-style pattern (`*`, `?`, `[abc]`, `[!abc]`).
    pub fn new(pattern: &str) -> CamResult<Self> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
            CamError::Configuration(format!("invalid filter '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Some(regex),
        })
    }

    /// Filter matching every name.
    pub fn any() -> Self {
        Self {
            pattern: "*".to_string(),
            regex: None,
        }
    }

    /// The pattern as given.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `name` matches the whole pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().map_or(true, |r| r.is_match(name))
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::any()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // unterminated or empty class: literal text
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(class.trim_start_matches('^')));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

// =============================================================================
// Table
// =============================================================================

/// Plain text table with a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Empty table with the given headers.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; short rows are padded with empty cells.
    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = cells.into_iter().map(Into::into).collect();
        row.resize(self.headers.len().max(row.len()), String::new());
        self.rows.push(row);
    }

    /// Header row.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column of `header`, if present.
    pub fn column(&self, header: &str) -> Option<Vec<&str>> {
        let index = self.headers.iter().position(|h| h == header)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }

    fn widths(&self) -> Vec<usize> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        (0..columns)
            .map(|i| {
                std::iter::once(&self.headers)
                    .chain(self.rows.iter())
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();
        let rule: String = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let rule = format!("+{}+", rule);

        let line = |f: &mut fmt::Formatter<'_>, cells: &[String]| -> fmt::Result {
            f.write_str("|")?;
            for (i, width) in widths.iter().enumerate() {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                let pad = width - cell.chars().count();
                write!(f, " {}{} |", cell, " ".repeat(pad))?;
            }
            writeln!(f)
        };

        writeln!(f, "{}", rule)?;
        line(f, &self.headers)?;
        writeln!(f, "{}", rule)?;
        for row in &self.rows {
            line(f, row)?;
        }
        write!(f, "{}", rule)
    }
}

// =============================================================================
// Descriptor tables
// =============================================================================

/// One column per property name (sorted union over all objects), one row
/// per object. Missing properties render empty.
pub fn info_table<'a, I>(objects: I, filter: &NameFilter) -> Table
where
    I: IntoIterator<Item = Vec<(&'a str, String)>>,
{
    let objects: Vec<BTreeMap<&str, String>> = objects
        .into_iter()
        .map(|props| props.into_iter().filter(|(name, _)| filter.matches(name)).collect())
        .collect();
    let names: BTreeSet<&str> = objects.iter().flat_map(|o| o.keys().copied()).collect();

    let mut table = Table::new(names.iter().copied());
    for object in &objects {
        table.push_row(names.iter().map(|name| object.get(name).cloned().unwrap_or_default()));
    }
    table
}

/// Table of transports.
pub fn transport_table(transports: &[TransportDescriptor]) -> Table {
    info_table(transports.iter().map(TransportDescriptor::properties), &NameFilter::any())
}

/// Device list with network plumbing columns hidden and friendlier headers.
pub fn camera_table(devices: &[DeviceDescriptor], filter: &NameFilter) -> Table {
    let objects = devices.iter().map(|d| {
        d.properties()
            .into_iter()
            .filter(|(name, _)| !CAMERA_TABLE_HIDDEN.contains(name))
            .collect::<Vec<_>>()
    });
    let mut table = info_table(objects, filter);
    for header in &mut table.headers {
        if let Some((_, renamed)) = CAMERA_TABLE_HEADERS.iter().find(|(from, _)| *from == header.as_str()) {
            *header = (*renamed).to_string();
        }
    }
    table
}

/// `Name: value` lines for a device: descriptor properties, then device info.
pub fn device_info(descriptor: &DeviceDescriptor, info: &BTreeMap<String, InfoValue>) -> String {
    descriptor
        .properties()
        .into_iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .chain(info.iter().map(|(name, value)| format!("{}: {}", name, value)))
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Parameters
// =============================================================================

/// One-line summary: `Title: value unit (RW) (i) [min:max:step]`.
pub fn parameter_display(node: &ParameterNode) -> String {
    let value = node
        .value()
        .map(ToString::to_string)
        .unwrap_or_else(|| "---".to_string());
    let unit = node.suffix().map(|s| format!(" {}", s)).unwrap_or_default();
    let kind = node.kind().to_string();
    let kind_initial = kind.chars().next().unwrap_or('?');

    let mut line = format!(
        "{}: {}{} ({}) ({})",
        node.title(),
        value,
        unit,
        node.access(),
        kind_initial
    );
    if let Some((min, max)) = node.limits() {
        match node.step() {
            Some(step) => line.push_str(&format!(" [{}:{}:{}]", min, max, step)),
            None => line.push_str(&format!(" [{}:{}]", min, max)),
        }
    }
    line
}

/// Display lines for every value-bearing node whose name matches.
pub fn parameter_lines(root: &ParameterNode, filter: &NameFilter) -> Vec<String> {
    root.walk()
        .filter(|(_, node)| node.kind().has_value() && filter.matches(node.name()))
        .map(|(_, node)| parameter_display(node))
        .collect()
}

/// Flat table of every non-group node whose name matches.
pub fn parameter_table(root: &ParameterNode, filter: &NameFilter) -> Table {
    let mut table = Table::new(["Name", "Value", "Type", "Access"]);
    for (_, node) in root.walk() {
        if node.is_group() || !filter.matches(node.name()) {
            continue;
        }
        table.push_row([
            node.name().to_string(),
            node.value().map(ToString::to_string).unwrap_or_default(),
            node.kind().to_string(),
            node.access().to_string(),
        ]);
    }
    table
}

struct TreeItem {
    label: String,
    attributes: Vec<String>,
    children: Vec<TreeItem>,
}

fn attribute(key: &str, value: impl fmt::Display) -> String {
    let text = format!("{}: {}", key, value);
    if text.chars().count() > TREE_LINE_WIDTH {
        let kept: String = text.chars().take(TREE_LINE_KEEP).collect();
        format!("{}{}", kept, ELLIPSIS)
    } else {
        text
    }
}

fn attributes(node: &ParameterNode) -> Vec<String> {
    let mut lines = vec![
        attribute("title", node.title()),
        attribute("type", node.kind()),
        attribute("readonly", node.access().is_read_only()),
    ];
    if let Some(tip) = node.tip() {
        lines.push(attribute("tip", tip));
    }
    if let Some(value) = node.value() {
        lines.push(attribute("value", value));
    }
    if let Some(suffix) = node.suffix() {
        lines.push(attribute("suffix", suffix));
    }
    if let Some((min, max)) = node.limits() {
        lines.push(attribute("limits", format!("({}, {})", min, max)));
    }
    if let Some(step) = node.step() {
        lines.push(attribute("step", step));
    }
    if !node.choices().is_empty() {
        lines.push(attribute("values", format!("[{}]", node.choices().join(", "))));
    }
    lines
}

/// Keep matching leaves; drop groups left without children.
fn prune(node: &ParameterNode, filter: &NameFilter) -> Option<TreeItem> {
    let children = if node.is_group() {
        let children: Vec<TreeItem> = node
            .children()
            .iter()
            .filter_map(|child| prune(child, filter))
            .collect();
        if children.is_empty() {
            return None;
        }
        children
    } else {
        if !filter.matches(node.name()) {
            return None;
        }
        Vec::new()
    };
    Some(TreeItem {
        label: node.name().to_string(),
        attributes: attributes(node),
        children,
    })
}

fn draw(item: &TreeItem, prefix: &str, out: &mut Vec<String>) {
    let entries: Vec<(&str, Option<&TreeItem>)> = item
        .attributes
        .iter()
        .map(|a| (a.as_str(), None))
        .chain(item.children.iter().map(|c| (c.label.as_str(), Some(c))))
        .collect();
    let count = entries.len();
    for (i, (label, child)) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        out.push(format!("{}{}{}", prefix, branch, label));
        if let Some(child) = child {
            draw(child, &format!("{}{}", prefix, indent), out);
        }
    }
}

/// Tree of the nodes under `root`, each with its attributes.
///
/// Leaves are kept when their name matches `filter`; groups are kept when
/// something below them survives. Returns an empty string when nothing does.
pub fn parameter_tree(root: &ParameterNode, filter: &NameFilter) -> String {
    let Some(item) = prune(root, filter) else {
        return String::new();
    };
    let mut lines = vec![item.label.clone()];
    draw(&item, "", &mut lines);
    lines.join("\n")
}

// =============================================================================
// Acquisition
// =============================================================================

/// One line per grabbed frame.
pub fn frame_line(record: &FrameRecord) -> String {
    let (height, width) = record.shape();
    format!(
        "frame {:>4}  #{:<6} shape=({}, {}) dtype={}  t={:.3}s  {}",
        record.slot,
        record.frame_number,
        height,
        width,
        record.pixel_type,
        record.since_start.as_secs_f64(),
        record.timestamp.format("%H:%M:%S%.3f"),
    )
}

/// Closing summary of an acquisition.
pub fn acquisition_summary(report: &AcquisitionReport) -> String {
    let mut line = format!(
        "Acquired {} frames ({} failed) on {} in {:.3}s [{}]",
        report.frames_grabbed,
        report.failed_frames,
        report.device,
        report.elapsed.as_secs_f64(),
        report.final_state,
    );
    if report.cancelled {
        line.push_str(" (cancelled)");
    }
    line
}
