//! Project and workstation identity
//!
//! Projects are working-directory-scoped: `dirname_<6hex>` where the hex is
//! the leading bytes of a SHA-256 over the absolute path. Workstations are
//! an 8-hex digest of hostname plus a stable machine id.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Derive the project id for a working directory.
///
/// The directory name is sanitized to lowercase alphanumerics so ids stay
/// shell- and URL-safe; the digest suffix keeps same-named directories in
/// different locations distinct.
pub fn project_id(cwd: &Path) -> String {
    let canonical = cwd.to_string_lossy();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = hex_prefix(&digest, 3);

    let dirname = cwd
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());
    let sanitized: String = dirname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let name = if sanitized.is_empty() { "project" } else { sanitized };

    format!("{}_{}", name, hex)
}

/// Derive the workstation id: 8 hex chars of SHA-256(hostname || machine id).
///
/// An explicit override wins so fleets can pin ids. The machine id comes
/// from `/etc/machine-id` (or the DMI product uuid) and falls back to the
/// hostname alone when neither is readable.
pub fn workstation_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let hostname = read_hostname();
    let machine = read_machine_id().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(machine.as_bytes());
    hex_prefix(&hasher.finalize(), 4)
}

fn read_hostname() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.trim().is_empty() {
            return h.trim().to_string();
        }
    }
    for path in ["/etc/hostname", "/proc/sys/kernel/hostname"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    "localhost".to_string()
}

fn read_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id", "/sys/class/dmi/id/product_uuid"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    digest
        .iter()
        .take(bytes)
        .map(|b| format!("{:02x}", b))
        .collect()
}
