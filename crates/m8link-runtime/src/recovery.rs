//! Host-side USB recovery ladder.
//!
//! When the device disappears and rescanning does not bring it back, the
//! host's USB stack is usually the part that wedged, not the device. The
//! ladder walks six increasingly invasive reset procedures against the
//! platform's sysfs surface, from re-authorizing the device node up to
//! power-cycling the host controller's PCI slot.
//!
//! The ladder is data: [`RecoveryProcedure::LADDER`] orders the procedures,
//! and the auto escalator simply walks the table until one reports the
//! device back. Procedures are identified by name. Every procedure tolerates
//! missing pseudo-files (unsupported platforms, containers) and reports
//! failure instead of panicking.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::serial::M8_VENDOR_ID;

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryProcedure {
    /// Toggle the device's `authorized` pseudo-file.
    AuthorizeToggle,
    /// Remove the device node, then re-enumerate every host bus.
    RemoveRescan,
    /// Unbind and rebind the xHCI host controller driver.
    HostUnbind,
    /// Remove the host controller PCI device and rescan the bus.
    PciPowerCycle,
    /// Repeated PCI/host cycles with growing delays.
    MultiCycle,
    /// Force runtime power management through an autosuspend cycle.
    RuntimePm,
}

impl RecoveryProcedure {
    /// All procedures, least to most invasive.
    pub const LADDER: [RecoveryProcedure; 6] = [
        RecoveryProcedure::AuthorizeToggle,
        RecoveryProcedure::RemoveRescan,
        RecoveryProcedure::HostUnbind,
        RecoveryProcedure::PciPowerCycle,
        RecoveryProcedure::MultiCycle,
        RecoveryProcedure::RuntimePm,
    ];

    /// Stable external identifier.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RecoveryProcedure::AuthorizeToggle => "authorize-toggle",
            RecoveryProcedure::RemoveRescan => "remove-rescan",
            RecoveryProcedure::HostUnbind => "host-unbind",
            RecoveryProcedure::PciPowerCycle => "pci-power-cycle",
            RecoveryProcedure::MultiCycle => "multi-cycle",
            RecoveryProcedure::RuntimePm => "runtime-pm",
        }
    }
}

/// Result of running one procedure (or the escalator).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    /// The procedure's own steps all applied.
    pub success: bool,
    /// Name of the procedure that produced this outcome.
    pub procedure: &'static str,
    /// Human-readable detail.
    pub message: String,
    /// The device re-enumerated afterwards.
    pub device_found: bool,
}

/// The ladder runner, bound to a sysfs root.
///
/// Production uses `/sys`; tests point it at a fabricated tree.
#[derive(Debug, Clone)]
pub struct UsbRecovery {
    root: PathBuf,
    /// Base unit for all intra-procedure delays; shrunk in tests.
    delay_unit: Duration,
}

impl Default for UsbRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbRecovery {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/sys"),
            delay_unit: Duration::from_secs(1),
        }
    }

    /// Use an alternate sysfs root and delay unit (tests).
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>, delay_unit: Duration) -> Self {
        Self {
            root: root.into(),
            delay_unit,
        }
    }

    /// Sysfs directory of the first device node carrying the M8 vendor id.
    fn find_device(&self) -> Option<PathBuf> {
        let devices = self.root.join("bus/usb/devices");
        let entries = std::fs::read_dir(&devices).ok()?;
        for entry in entries.flatten() {
            let vendor = entry.path().join("idVendor");
            if let Ok(id) = std::fs::read_to_string(&vendor) {
                if u16::from_str_radix(id.trim(), 16) == Ok(M8_VENDOR_ID) {
                    return Some(entry.path());
                }
            }
        }
        None
    }

    /// Host bus roots (`usb1`, `usb2`, …).
    fn host_buses(&self) -> Vec<PathBuf> {
        let devices = self.root.join("bus/usb/devices");
        let Ok(entries) = std::fs::read_dir(&devices) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("usb"))
            })
            .collect()
    }

    /// PCI addresses currently bound to the xHCI driver.
    fn xhci_addresses(&self) -> Vec<String> {
        let driver = self.root.join("bus/pci/drivers/xhci_hcd");
        let Ok(entries) = std::fs::read_dir(&driver) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.contains(':') && name.contains('.'))
            .collect()
    }

    async fn pause(&self, units: u32) {
        tokio::time::sleep(self.delay_unit * units).await;
    }

    /// Run one procedure.
    pub async fn run(&self, procedure: RecoveryProcedure) -> RecoveryOutcome {
        info!(procedure = procedure.name(), "running USB recovery procedure");
        let mut outcome = match procedure {
            RecoveryProcedure::AuthorizeToggle => self.authorize_toggle().await,
            RecoveryProcedure::RemoveRescan => self.remove_rescan().await,
            RecoveryProcedure::HostUnbind => self.host_unbind().await,
            RecoveryProcedure::PciPowerCycle => self.pci_power_cycle().await,
            RecoveryProcedure::MultiCycle => self.multi_cycle().await,
            RecoveryProcedure::RuntimePm => self.runtime_pm().await,
        };
        outcome.device_found = self.find_device().is_some();
        outcome
    }

    /// Walk procedures `1..=max` in order; the first one after which the
    /// device re-enumerates wins. Otherwise the last outcome is returned.
    pub async fn run_auto(&self, max: usize) -> RecoveryOutcome {
        let mut last = None;
        for &procedure in RecoveryProcedure::LADDER.iter().take(max.max(1)) {
            let outcome = self.run(procedure).await;
            if outcome.device_found {
                info!(procedure = outcome.procedure, "device found after recovery");
                return outcome;
            }
            last = Some(outcome);
        }
        last.unwrap_or(RecoveryOutcome {
            success: false,
            procedure: "none",
            message: "no recovery procedures available".to_string(),
            device_found: false,
        })
    }

    /// The full six-rung sequence, least to most invasive.
    pub async fn run_ultimate(&self) -> RecoveryOutcome {
        self.run_auto(RecoveryProcedure::LADDER.len()).await
    }

    async fn authorize_toggle(&self) -> RecoveryOutcome {
        let Some(device) = self.find_device() else {
            return missing(RecoveryProcedure::AuthorizeToggle, "device node not present");
        };
        let authorized = device.join("authorized");
        let wrote = write_sysfs(&authorized, "0");
        self.pause(1).await;
        let wrote = write_sysfs(&authorized, "1") && wrote;
        done(
            RecoveryProcedure::AuthorizeToggle,
            wrote,
            format!("toggled {}", authorized.display()),
        )
    }

    async fn remove_rescan(&self) -> RecoveryOutcome {
        let removed = match self.find_device() {
            Some(device) => write_sysfs(&device.join("remove"), "1"),
            None => false,
        };
        self.pause(1).await;

        let mut toggled = 0;
        for bus in self.host_buses() {
            let default = bus.join("authorized_default");
            if write_sysfs(&default, "0") {
                self.pause(1).await;
                write_sysfs(&default, "1");
                toggled += 1;
            }
        }
        done(
            RecoveryProcedure::RemoveRescan,
            removed || toggled > 0,
            format!("removed={removed}, buses re-enumerated={toggled}"),
        )
    }

    async fn host_unbind(&self) -> RecoveryOutcome {
        let addresses = self.xhci_addresses();
        if addresses.is_empty() {
            return missing(RecoveryProcedure::HostUnbind, "no xHCI controller visible");
        }
        let driver = self.root.join("bus/pci/drivers/xhci_hcd");
        let mut cycled = 0;
        for addr in &addresses {
            if write_sysfs(&driver.join("unbind"), addr) {
                self.pause(2).await;
                write_sysfs(&driver.join("bind"), addr);
                cycled += 1;
            }
        }
        done(
            RecoveryProcedure::HostUnbind,
            cycled > 0,
            format!("rebound {cycled} xHCI controller(s)"),
        )
    }

    async fn pci_power_cycle(&self) -> RecoveryOutcome {
        let addresses = self.xhci_addresses();
        if addresses.is_empty() {
            return missing(RecoveryProcedure::PciPowerCycle, "no xHCI controller visible");
        }
        let mut removed = 0;
        for addr in &addresses {
            let remove = self.root.join("bus/pci/devices").join(addr).join("remove");
            if write_sysfs(&remove, "1") {
                removed += 1;
            }
        }
        // The slot needs real time to drop to its deepest power state
        // before a rescan will re-probe it.
        self.pause(30).await;
        let rescanned = write_sysfs(&self.root.join("bus/pci/rescan"), "1");
        done(
            RecoveryProcedure::PciPowerCycle,
            removed > 0 && rescanned,
            format!("removed {removed} controller(s), rescan={rescanned}"),
        )
    }

    async fn multi_cycle(&self) -> RecoveryOutcome {
        let mut attempts = Vec::new();
        for round in 1..=3u32 {
            let pci = self.pci_power_cycle().await;
            if self.find_device().is_some() {
                return done(
                    RecoveryProcedure::MultiCycle,
                    true,
                    format!("device returned after PCI cycle round {round}"),
                );
            }
            let host = self.host_unbind().await;
            if self.find_device().is_some() {
                return done(
                    RecoveryProcedure::MultiCycle,
                    true,
                    format!("device returned after host rebind round {round}"),
                );
            }
            attempts.push(pci.success || host.success);
            self.pause(round * 2).await;
        }
        let any = attempts.iter().any(|&ok| ok);
        done(
            RecoveryProcedure::MultiCycle,
            any,
            format!("3 rounds completed, any step applied={any}"),
        )
    }

    async fn runtime_pm(&self) -> RecoveryOutcome {
        let Some(device) = self.find_device() else {
            return missing(RecoveryProcedure::RuntimePm, "device node not present");
        };
        let power = device.join("power");
        let forced = write_sysfs(&power.join("autosuspend_delay_ms"), "0")
            && write_sysfs(&power.join("control"), "auto");
        self.pause(2).await;
        let restored = write_sysfs(&power.join("control"), "on");
        done(
            RecoveryProcedure::RuntimePm,
            forced && restored,
            "forced autosuspend cycle".to_string(),
        )
    }
}

fn write_sysfs(path: &Path, value: &str) -> bool {
    match std::fs::write(path, value) {
        Ok(()) => {
            debug!(path = %path.display(), value, "sysfs write");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "sysfs write failed");
            false
        }
    }
}

fn done(procedure: RecoveryProcedure, success: bool, message: String) -> RecoveryOutcome {
    RecoveryOutcome {
        success,
        procedure: procedure.name(),
        message,
        device_found: false,
    }
}

fn missing(procedure: RecoveryProcedure, message: &str) -> RecoveryOutcome {
    RecoveryOutcome {
        success: false,
        procedure: procedure.name(),
        message: message.to_string(),
        device_found: false,
    }
}
