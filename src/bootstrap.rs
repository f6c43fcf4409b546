//! One-time session bootstrap
//!
//! Runs once before the coordinator starts: reconciles persisted vs active
//! configuration after a possibly unclean shutdown, probes which hardware
//! wiring exists, seeds the ADB flag from the resolved default set, and
//! surfaces the legacy ADB flag migration for the coordinator to apply.

use tracing::{info, warn};

use crate::coordinator::CoordinatorState;
use crate::functions::{contains_function, FUNCTIONS_NONE, FUNCTION_ADB};
use crate::link::{probe_switches, LinkState, SwitchPaths, SwitchProbe, WiringMode};
use crate::oem::OemOverrideTable;
use crate::properties::{
    PropertyStore, KEY_BOOT_MODE, KEY_LEGACY_ADB_ENABLE, KEY_PERSIST_USB_CONFIG, KEY_USB_CONFIG,
};

/// Everything the daemon needs to start the coordinator
#[derive(Debug)]
pub struct BootstrapOutcome {
    pub state: CoordinatorState,
    pub wiring: WiringMode,
    /// Legacy ADB flag found during migration, to be applied as an explicit
    /// enable/disable once the coordinator is running
    pub adb_migration: Option<bool>,
}

/// Read initial state and reconcile the property store
pub fn bootstrap(
    store: &dyn PropertyStore,
    oem: &OemOverrideTable,
    paths: &SwitchPaths,
) -> BootstrapOutcome {
    // the persisted default should never be unset; fall back to the debug
    // bridge so a misconfigured device stays reachable
    let persisted = store.get(KEY_PERSIST_USB_CONFIG, FUNCTION_ADB);
    let boot_mode = store.get(KEY_BOOT_MODE, "unknown");
    let default_functions = oem.resolve(&boot_mode, &persisted);

    // self-heal after a crash mid-switch
    let active = store.get(KEY_USB_CONFIG, FUNCTIONS_NONE);
    if active != default_functions {
        warn!(
            "resetting config to persistent default: {} (was {})",
            default_functions, active
        );
        if let Err(e) = store.set(KEY_USB_CONFIG, &default_functions) {
            warn!("failed to reset active config: {}", e);
        }
    }

    let (wiring, connected, configured, legacy_wiring) = match probe_switches(paths) {
        SwitchProbe::Modern {
            connected,
            configured,
        } => (WiringMode::Modern, connected, configured, false),
        SwitchProbe::Legacy { connected } => (WiringMode::Legacy, connected, false, true),
        SwitchProbe::Absent => {
            info!("No USB switch wiring found; assuming disconnected");
            (WiringMode::Modern, false, false, false)
        }
    };

    let link = match LinkState::from_flags(connected, configured) {
        LinkState::Unknown => {
            warn!("probed configured-but-not-connected state; treating as disconnected");
            LinkState::Disconnected
        }
        state => state,
    };

    let adb_enabled = contains_function(&default_functions, FUNCTION_ADB);

    // migrate the legacy enable flag into an explicit request, then clear it
    let adb_migration = match store.get(KEY_LEGACY_ADB_ENABLE, "").chars().next() {
        Some('1') => Some(true),
        Some('0') => Some(false),
        _ => None,
    };
    if adb_migration.is_some() {
        info!("migrating legacy ADB enable flag");
        if let Err(e) = store.set(KEY_LEGACY_ADB_ENABLE, "") {
            warn!("failed to clear legacy ADB flag: {}", e);
        }
    }

    BootstrapOutcome {
        state: CoordinatorState {
            link,
            current_functions: default_functions.clone(),
            default_functions,
            adb_enabled,
            current_user: None,
            legacy_wiring,
            boot_completed: false,
        },
        wiring,
        adb_migration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::MemoryPropertyStore;

    fn empty_paths() -> (tempfile::TempDir, SwitchPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SwitchPaths {
            connected_state: dir.path().join("usb_connected"),
            configuration_state: dir.path().join("usb_configuration"),
            legacy_state: dir.path().join("usb_mass_storage"),
        };
        (dir, paths)
    }

    #[test]
    fn test_default_falls_back_to_adb() {
        let (_dir, paths) = empty_paths();
        let store = MemoryPropertyStore::new();
        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);

        assert_eq!(outcome.state.default_functions, "adb");
        assert_eq!(outcome.state.current_functions, "adb");
        assert!(outcome.state.adb_enabled);
        assert_eq!(outcome.state.link, LinkState::Disconnected);
        assert_eq!(outcome.wiring, WiringMode::Modern);
    }

    #[test]
    fn test_self_heal_active_config() {
        let (_dir, paths) = empty_paths();
        let store = MemoryPropertyStore::new();
        store.set(KEY_PERSIST_USB_CONFIG, "mtp").unwrap();
        store.set(KEY_USB_CONFIG, "rndis").unwrap();

        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);

        assert_eq!(outcome.state.default_functions, "mtp");
        assert_eq!(store.get(KEY_USB_CONFIG, ""), "mtp");
        assert!(!outcome.state.adb_enabled);
    }

    #[test]
    fn test_oem_resolution_applies_at_startup() {
        let (_dir, paths) = empty_paths();
        let store = MemoryPropertyStore::new();
        store.set(KEY_PERSIST_USB_CONFIG, "mtp").unwrap();
        store.set(KEY_BOOT_MODE, "factory").unwrap();
        let oem = OemOverrideTable::from_lines(["factory:mtp:mass_storage"]);

        let outcome = bootstrap(&store, &oem, &paths);

        assert_eq!(outcome.state.default_functions, "mass_storage");
        assert_eq!(store.get(KEY_USB_CONFIG, ""), "mass_storage");
    }

    #[test]
    fn test_modern_probe_sets_initial_link_state() {
        let (_dir, paths) = empty_paths();
        std::fs::write(&paths.connected_state, "1\n").unwrap();
        std::fs::write(&paths.configuration_state, "1\n").unwrap();
        let store = MemoryPropertyStore::new();

        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);

        assert_eq!(outcome.wiring, WiringMode::Modern);
        assert!(!outcome.state.legacy_wiring);
        assert_eq!(outcome.state.link, LinkState::Configured);
    }

    #[test]
    fn test_legacy_probe_sets_legacy_mode() {
        let (_dir, paths) = empty_paths();
        std::fs::write(&paths.legacy_state, "online\n").unwrap();
        let store = MemoryPropertyStore::new();

        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);

        assert_eq!(outcome.wiring, WiringMode::Legacy);
        assert!(outcome.state.legacy_wiring);
        // the single legacy switch cannot report configuration
        assert_eq!(outcome.state.link, LinkState::Connected);
    }

    #[test]
    fn test_legacy_adb_flag_migration() {
        let (_dir, paths) = empty_paths();
        let store = MemoryPropertyStore::new();
        store.set(KEY_PERSIST_USB_CONFIG, "mtp").unwrap();
        store.set(KEY_LEGACY_ADB_ENABLE, "1").unwrap();

        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);

        assert_eq!(outcome.adb_migration, Some(true));
        assert_eq!(store.get(KEY_LEGACY_ADB_ENABLE, ""), "");

        store.set(KEY_LEGACY_ADB_ENABLE, "0").unwrap();
        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);
        assert_eq!(outcome.adb_migration, Some(false));
    }

    #[test]
    fn test_no_migration_when_flag_unset() {
        let (_dir, paths) = empty_paths();
        let store = MemoryPropertyStore::new();
        let outcome = bootstrap(&store, &OemOverrideTable::default(), &paths);
        assert_eq!(outcome.adb_migration, None);
    }
}
