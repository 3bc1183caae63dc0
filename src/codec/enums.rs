// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stable integer mapping for Zigbee2MQTT enum values.
//!
//! Z2M reports enum values as free-form strings whose set may grow with
//! firmware updates. The host needs stable integers, so known enum families
//! use fixed tables and everything else gets a deterministic assignment:
//! existing mappings are preserved, new keys are sorted case-insensitively
//! and appended after the current maximum. The resulting map is written to
//! the channel's `meta.enumMap`, which is the persistence surface across
//! restarts.

use std::collections::BTreeMap;

/// Name of the rocker/push-button mode enum family.
pub const ROCKER_MODE: &str = "RockerMode";

/// Name of the sensor sensitivity enum family.
pub const SENSITIVITY_LEVEL: &str = "SensitivityLevel";

/// Returns the known enum family for a property name, if any.
#[must_use]
pub fn known_enum_name(property: &str) -> Option<&'static str> {
    match property {
        "device_mode" => Some(ROCKER_MODE),
        "motion_sensitivity" | "sensitivity" => Some(SENSITIVITY_LEVEL),
        _ => None,
    }
}

/// Maps a raw rocker-mode string to its fixed code.
#[must_use]
pub fn map_rocker_mode(raw: &str) -> Option<i64> {
    match raw.trim().to_lowercase().as_str() {
        "single_rocker" | "singlerocker" => Some(1),
        "dual_rocker" | "dualrocker" => Some(2),
        "single_push_button" | "singlepushbutton" => Some(3),
        "dual_push_button" | "dualpushbutton" => Some(4),
        _ => None,
    }
}

/// Maps a raw sensitivity string to its fixed code.
#[must_use]
pub fn map_sensitivity_level(raw: &str) -> Option<i64> {
    match raw.trim().to_lowercase().as_str() {
        "low" => Some(1),
        "medium" => Some(2),
        "high" => Some(3),
        "very_high" | "veryhigh" => Some(4),
        "max" => Some(5),
        _ => None,
    }
}

/// Maps a raw value through the fixed table of a known enum family.
#[must_use]
pub fn map_known(enum_name: &str, raw: &str) -> Option<i64> {
    if enum_name.eq_ignore_ascii_case(ROCKER_MODE) {
        map_rocker_mode(raw)
    } else if enum_name.eq_ignore_ascii_case(SENSITIVITY_LEVEL) {
        map_sensitivity_level(raw)
    } else {
        None
    }
}

/// Returns the canonical label for a value of a known enum family.
#[must_use]
pub fn enum_label(enum_name: &str, value: i64) -> Option<&'static str> {
    if enum_name.eq_ignore_ascii_case(ROCKER_MODE) {
        match value {
            1 => Some("SingleRocker"),
            2 => Some("DualRocker"),
            3 => Some("SinglePush"),
            4 => Some("DualPush"),
            _ => None,
        }
    } else if enum_name.eq_ignore_ascii_case(SENSITIVITY_LEVEL) {
        match value {
            1 => Some("Low"),
            2 => Some("Medium"),
            3 => Some("High"),
            4 => Some("VeryHigh"),
            5 => Some("Max"),
            _ => None,
        }
    } else {
        None
    }
}

/// Builds a stable raw-string to integer map.
///
/// Mappings already present in `existing` (with positive values) are kept
/// verbatim. Remaining keys are sorted case-insensitively and assigned the
/// next integer after the current maximum, so re-running the builder over a
/// grown key set never reshuffles earlier assignments.
#[must_use]
pub fn build_stable_map(
    raw_keys: &[String],
    existing: &BTreeMap<String, i64>,
) -> BTreeMap<String, i64> {
    let mut map = BTreeMap::new();
    let mut max_value = 0;
    for (key, value) in existing {
        if *value <= 0 {
            continue;
        }
        map.insert(key.clone(), *value);
        max_value = max_value.max(*value);
    }

    let mut sorted: Vec<&String> = raw_keys.iter().collect();
    sorted.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
    for key in sorted {
        if key.is_empty() || map.contains_key(key.as_str()) {
            continue;
        }
        max_value += 1;
        map.insert(key.clone(), max_value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn rocker_mode_table() {
        assert_eq!(map_rocker_mode("single_rocker"), Some(1));
        assert_eq!(map_rocker_mode("DUAL_ROCKER"), Some(2));
        assert_eq!(map_rocker_mode("single_push_button"), Some(3));
        assert_eq!(map_rocker_mode("dualpushbutton"), Some(4));
        assert_eq!(map_rocker_mode("other"), None);
    }

    #[test]
    fn sensitivity_table() {
        assert_eq!(map_sensitivity_level("low"), Some(1));
        assert_eq!(map_sensitivity_level("Very_High"), Some(4));
        assert_eq!(map_sensitivity_level("max"), Some(5));
        assert_eq!(map_sensitivity_level(""), None);
    }

    #[test]
    fn known_names_for_properties() {
        assert_eq!(known_enum_name("device_mode"), Some(ROCKER_MODE));
        assert_eq!(known_enum_name("motion_sensitivity"), Some(SENSITIVITY_LEVEL));
        assert_eq!(known_enum_name("sensitivity"), Some(SENSITIVITY_LEVEL));
        assert_eq!(known_enum_name("color_mode"), None);
    }

    #[test]
    fn labels_for_known_values() {
        assert_eq!(enum_label(ROCKER_MODE, 1), Some("SingleRocker"));
        assert_eq!(enum_label(SENSITIVITY_LEVEL, 5), Some("Max"));
        assert_eq!(enum_label(ROCKER_MODE, 9), None);
        assert_eq!(enum_label("Other", 1), None);
    }

    #[test]
    fn stable_map_sorts_case_insensitively() {
        let map = build_stable_map(&keys(&["Beta", "alpha", "Gamma"]), &BTreeMap::new());
        assert_eq!(map.get("alpha"), Some(&1));
        assert_eq!(map.get("Beta"), Some(&2));
        assert_eq!(map.get("Gamma"), Some(&3));
    }

    #[test]
    fn stable_map_preserves_existing() {
        let mut existing = BTreeMap::new();
        existing.insert("old".to_string(), 7);
        let map = build_stable_map(&keys(&["new", "old"]), &existing);
        assert_eq!(map.get("old"), Some(&7));
        assert_eq!(map.get("new"), Some(&8));
    }

    #[test]
    fn stable_map_is_idempotent() {
        let raw = keys(&["single_rocker", "dual_rocker"]);
        let first = build_stable_map(&raw, &BTreeMap::new());
        let second = build_stable_map(&raw, &first);
        assert_eq!(first, second);
    }

    #[test]
    fn stable_map_appends_after_max() {
        let first = build_stable_map(&keys(&["a", "b"]), &BTreeMap::new());
        let grown = build_stable_map(&keys(&["a", "b", "c"]), &first);
        assert_eq!(grown.get("a"), first.get("a"));
        assert_eq!(grown.get("b"), first.get("b"));
        assert_eq!(grown.get("c"), Some(&3));
    }

    #[test]
    fn stable_map_skips_non_positive_existing() {
        let mut existing = BTreeMap::new();
        existing.insert("bad".to_string(), 0);
        let map = build_stable_map(&keys(&["bad"]), &existing);
        assert_eq!(map.get("bad"), Some(&1));
    }
}
