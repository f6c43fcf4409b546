//! OEM boot-mode override table
//!
//! Some devices must advertise a different function set when booted into an
//! OEM-specific mode (factory, recovery, carrier test). The override table
//! maps a boot mode to ordered `(from, to)` substitution pairs over whole
//! function-set strings. It is built once at startup and read-only after.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;

/// Boot-mode-keyed function set substitutions
#[derive(Debug, Clone, Default)]
pub struct OemOverrideTable {
    modes: HashMap<String, Vec<(String, String)>>,
}

impl OemOverrideTable {
    /// Build a table from `bootMode:fromSet:toSet` lines.
    ///
    /// Lines that do not split into exactly three fields are skipped.
    /// Blank lines and `#` comments are ignored.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut modes: HashMap<String, Vec<(String, String)>> = HashMap::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 3 {
                warn!("Skipping malformed OEM override line: {:?}", line);
                continue;
            }
            modes
                .entry(fields[0].to_string())
                .or_default()
                .push((fields[1].to_string(), fields[2].to_string()));
        }

        Self { modes }
    }

    /// Load override lines from a plain-text config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_lines(contents.lines()))
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Whether any override entry exists for the given boot mode
    pub fn needs_override(&self, boot_mode: &str) -> bool {
        self.modes.contains_key(boot_mode)
    }

    /// Substitute `requested` for the current boot mode.
    ///
    /// Returns the first matching replacement, or `requested` unchanged when
    /// no pair matches.
    pub fn resolve(&self, boot_mode: &str, requested: &str) -> String {
        if let Some(overrides) = self.modes.get(boot_mode) {
            for (from, to) in overrides {
                if from == requested {
                    debug!("OEM USB override: {} ==> {}", from, to);
                    return to.clone();
                }
            }
        }
        requested.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_matching_entry() {
        let table = OemOverrideTable::from_lines(["normal:mtp,adb:mtp,adb,rndis"]);
        assert!(table.needs_override("normal"));
        assert_eq!(table.resolve("normal", "mtp,adb"), "mtp,adb,rndis");
    }

    #[test]
    fn test_resolve_passthrough() {
        let table = OemOverrideTable::from_lines(["normal:mtp,adb:mtp,adb,rndis"]);
        // no entry for this boot mode
        assert!(!table.needs_override("factory"));
        assert_eq!(table.resolve("factory", "mtp,adb"), "mtp,adb");
        // entry exists but the requested set does not match
        assert_eq!(table.resolve("normal", "ptp"), "ptp");
    }

    #[test]
    fn test_first_match_wins() {
        let table = OemOverrideTable::from_lines([
            "normal:mtp:rndis",
            "normal:mtp:mass_storage",
        ]);
        assert_eq!(table.resolve("normal", "mtp"), "rndis");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let table = OemOverrideTable::from_lines([
            "not-enough-fields",
            "way:too:many:fields",
            "",
            "# comment",
            "factory:mtp:mass_storage",
        ]);
        assert!(table.needs_override("factory"));
        assert!(!table.needs_override("way"));
        assert_eq!(table.resolve("factory", "mtp"), "mass_storage");
    }

    #[test]
    fn test_empty_table() {
        let table = OemOverrideTable::from_lines(Vec::<&str>::new());
        assert!(table.is_empty());
        assert!(!table.needs_override("normal"));
        assert_eq!(table.resolve("normal", "mtp"), "mtp");
    }
}
