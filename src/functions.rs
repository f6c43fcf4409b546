//! USB function set algebra
//!
//! A function set is an ordered, duplicate-free list of gadget function
//! names rendered as comma-joined text. The empty set is rendered as the
//! sentinel `"none"`, which never appears alongside other tokens.

use serde::{Deserialize, Serialize};

/// Sentinel for the empty function set
pub const FUNCTIONS_NONE: &str = "none";

/// Debug bridge (ADB) gadget function
pub const FUNCTION_ADB: &str = "adb";
/// Media transfer (MTP) gadget function
pub const FUNCTION_MTP: &str = "mtp";
/// Picture transfer (PTP) gadget function
pub const FUNCTION_PTP: &str = "ptp";
/// USB tethering gadget function
pub const FUNCTION_RNDIS: &str = "rndis";
/// Mass storage gadget function
pub const FUNCTION_MASS_STORAGE: &str = "mass_storage";
/// Accessory-mode gadget function
pub const FUNCTION_ACCESSORY: &str = "accessory";

/// Append `function` to a comma-joined set, preserving existing order.
///
/// Adding to `"none"` yields just `function`; adding an already present
/// token is a no-op.
pub fn add_function(functions: &str, function: &str) -> String {
    if functions == FUNCTIONS_NONE {
        return function.to_string();
    }
    if contains_function(functions, function) {
        return functions.to_string();
    }
    if functions.is_empty() {
        function.to_string()
    } else {
        format!("{},{}", functions, function)
    }
}

/// Remove every occurrence of `function` from a comma-joined set.
///
/// Returns `"none"` rather than an empty string when nothing remains.
pub fn remove_function(functions: &str, function: &str) -> String {
    let remaining: Vec<&str> = functions
        .split(',')
        .filter(|token| !token.is_empty() && *token != function)
        .collect();

    if remaining.is_empty() {
        FUNCTIONS_NONE.to_string()
    } else {
        remaining.join(",")
    }
}

/// Whole-token membership test.
///
/// A candidate only matches a complete comma-delimited token, never a
/// substring of a longer function name.
pub fn contains_function(functions: &str, function: &str) -> bool {
    functions.split(',').any(|token| token == function)
}

/// Parsed function set value
///
/// Holds the ordered token list behind the comma-joined wire form. The
/// `"none"` sentinel parses to the empty set. Parsing is best-effort:
/// stray separators produce empty tokens which are dropped, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionSet(Vec<String>);

impl FunctionSet {
    /// Parse a comma-joined set, dropping empty tokens and the sentinel
    pub fn parse(s: &str) -> Self {
        let tokens = s
            .split(',')
            .filter(|t| !t.is_empty() && *t != FUNCTIONS_NONE)
            .map(str::to_string)
            .collect();
        Self(tokens)
    }

    /// Render back to the comma-joined wire form, `"none"` when empty
    pub fn render(&self) -> String {
        if self.0.is_empty() {
            FUNCTIONS_NONE.to_string()
        } else {
            self.0.join(",")
        }
    }

    pub fn contains(&self, function: &str) -> bool {
        self.0.iter().any(|t| t == function)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ordered token list of the active functions
    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for FunctionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
