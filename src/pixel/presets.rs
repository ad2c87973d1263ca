//! Named clinical window/level presets.
//!
//! The table is a process-wide constant. Names are matched exactly and
//! case-insensitively.

use serde::Serialize;

/// A named (width, center) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Preset {
    /// Preset name as exposed through the API
    #[serde(skip)]
    pub name: &'static str,

    /// Window width
    #[serde(rename = "window")]
    pub width: f64,

    /// Window center
    #[serde(rename = "level")]
    pub center: f64,
}

const fn preset(name: &'static str, width: f64, center: f64) -> Preset {
    Preset {
        name,
        width,
        center,
    }
}

/// The preset table, CT presets first, then radiography.
pub const PRESETS: &[Preset] = &[
    preset("lung", 1500.0, -600.0),
    preset("bone", 2000.0, 300.0),
    preset("soft_tissue", 400.0, 40.0),
    preset("brain", 80.0, 40.0),
    preset("liver", 150.0, 30.0),
    preset("mediastinum", 350.0, 50.0),
    preset("chest_xray", 2500.0, 500.0),
    preset("bone_xray", 4000.0, 2000.0),
    preset("extremity", 3500.0, 1500.0),
    preset("spine", 3000.0, 1000.0),
    preset("soft_xray", 600.0, 100.0),
];

/// Look up a preset by name.
pub fn lookup(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Iterate over all presets in table order.
pub fn all() -> impl Iterator<Item = &'static Preset> {
    PRESETS.iter()
}

// =============================================================================
// Tests
// =============================================================================
