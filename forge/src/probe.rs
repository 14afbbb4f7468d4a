// SPDX-License-Identifier: AGPL-3.0-only

//! Device probing for multi-electrode arrays exposed as `/dev/mea*` nodes.
//!
//! Channel counts come from sysfs (`/sys/class/mea/meaN/channels`) when the
//! driver publishes them, otherwise the standard 60-electrode layout is
//! assumed.

use std::fs;
use std::path::{Path, PathBuf};

/// Electrodes on a standard 8×8 array minus the four corners.
pub const DEFAULT_CHANNELS: usize = 60;

/// Number of `/dev/meaN` indices checked.
const MAX_DEVICES: usize = 4;

/// A signal device found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device node, e.g. `/dev/mea0`.
    pub node: PathBuf,
    /// Display name.
    pub name: String,
    /// Electrode channels.
    pub channels: usize,
}

/// Probe `/dev` for electrode arrays.
#[must_use]
pub fn probe_devices() -> Vec<DeviceInfo> {
    probe_in(Path::new("/dev"), Path::new("/sys/class/mea"))
}

/// Probe `dev_dir` for `meaN` nodes, reading channel counts from `sys_dir`.
#[must_use]
pub fn probe_in(dev_dir: &Path, sys_dir: &Path) -> Vec<DeviceInfo> {
    (0..MAX_DEVICES)
        .filter_map(|idx| {
            let node = dev_dir.join(format!("mea{idx}"));
            if !node.exists() {
                return None;
            }
            let channels = read_channels(&sys_dir.join(format!("mea{idx}")).join("channels"))
                .unwrap_or(DEFAULT_CHANNELS);
            Some(DeviceInfo {
                node,
                name: format!("MEA array {idx}"),
                channels,
            })
        })
        .collect()
}

fn read_channels(path: &Path) -> Option<usize> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|&n: &usize| n > 0)
}
