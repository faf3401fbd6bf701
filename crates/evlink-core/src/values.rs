//! Decoded metric values

use std::collections::BTreeMap;

/// Decoded metric fields for one command, keyed by field name
///
/// A `BTreeMap` keeps iteration (and therefore logging) order stable.
/// Values are plain `f64` after the per-metric scale/offset is applied;
/// consumers that need integers truncate on their side.
pub type ValueMap = BTreeMap<String, f64>;
