//! Device parameter tree.
//!
//! Every setting of an open device is a [`ParameterNode`] in a tree rooted at
//! a group named `Root`. Leaves are typed ([`ParameterKind`]), carry
//! constraints (limits, step, choices) and an access mode; groups only hold
//! children. [`ParameterTree`] owns the cached tree for one device and is
//! the only way to change a setting:
//!
//! - `get` reads the cache, `read_through` and `refresh` re-read the device
//! - `set` validates type, limits, step and choices before the device is
//!   contacted, and refuses streaming-critical changes while streaming
//! - `invoke` executes actions
//! - `subscribe` delivers every committed change
//!
//! Nodes are addressed by slash-separated paths relative to the root
//! (`AOI/Height`); a leading `Root/` is ignored and a bare feature name
//! resolves to its first depth-first match.

mod node;
mod tree;
mod value;

pub use node::{ParameterNode, Walk, ROOT_NAME};
pub use tree::{ParameterChange, ParameterTree, STREAMING_CRITICAL};
pub use value::{AccessMode, ParameterKind, ParameterValue};
