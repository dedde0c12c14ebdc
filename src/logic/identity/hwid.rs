//! Host Fingerprint Generation
//!
//! Builds a stable, unprivileged fingerprint from host name, OS family/version
//! and the primary network hardware address. The raw identifiers never leave
//! this module: only a truncated SHA-256 is exposed.

use sha2::{Digest, Sha256};
use sysinfo::{Networks, System};

/// Length of the exposed fingerprint (hex chars)
pub const FINGERPRINT_LEN: usize = 16;

const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Host facts that feed the fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub mac_address: Option<String>,
}

impl HostFacts {
    /// Hardware identifiers are usable only when a network address was found
    pub fn has_hardware_id(&self) -> bool {
        self.mac_address.is_some()
    }

    /// `host-os-release-mac`, missing parts left empty
    pub fn material(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.host_name.as_deref().unwrap_or_default(),
            self.os_name.as_deref().unwrap_or_default(),
            self.os_version.as_deref().unwrap_or_default(),
            self.mac_address.as_deref().unwrap_or_default(),
        )
    }

    /// Compute the fingerprint hash for these facts
    pub fn compute_fingerprint(&self) -> String {
        hash_material(&self.material())
    }
}

/// SHA-256, first 16 hex chars, upper-cased
pub fn hash_material(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_uppercase()
}

/// Collect host facts from the running system
pub fn collect_host_facts() -> HostFacts {
    let facts = HostFacts {
        host_name: get_host_name(),
        os_name: System::name(),
        os_version: System::os_version().or_else(System::kernel_version),
        mac_address: get_primary_mac(),
    };

    log::debug!(
        "Host facts: host={}, os={}, mac_present={}",
        facts.host_name.as_deref().unwrap_or("?"),
        facts.os_name.as_deref().unwrap_or("?"),
        facts.mac_address.is_some()
    );

    facts
}

fn get_host_name() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
}

fn get_primary_mac() -> Option<String> {
    let networks = Networks::new_with_refreshed_list();
    select_primary_mac(
        networks
            .iter()
            .map(|(_, data)| data.mac_address().to_string()),
    )
}

/// Lowest universally administered unicast MAC, so the choice does not
/// depend on enumeration order. Locally administered addresses (docker0,
/// veth, VPN and hypervisor adapters) come and go between boots and are
/// never used; a host with only those falls back to the persisted id.
pub fn select_primary_mac<I>(macs: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    macs.into_iter()
        .map(|mac| mac.trim().to_lowercase())
        .filter(|mac| mac != ZERO_MAC && is_burned_in(mac))
        .min()
}

fn is_burned_in(mac: &str) -> bool {
    let Some(first_octet) = mac
        .split([':', '-'])
        .next()
        .and_then(|octet| u8::from_str_radix(octet, 16).ok())
    else {
        return false;
    };
    // bit 0: multicast, bit 1: locally administered
    first_octet & 0x03 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> HostFacts {
        HostFacts {
            host_name: Some("ACCT-PC01".to_string()),
            os_name: Some("Windows".to_string()),
            os_version: Some("10".to_string()),
            mac_address: Some("aa:bb:cc:dd:ee:ff".to_string()),
        }
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = facts().compute_fingerprint();
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(facts().compute_fingerprint(), facts().compute_fingerprint());
    }

    fn macs(list: &[&str]) -> Vec<String> {
        list.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_virtual_adapters_do_not_win_mac_selection() {
        // docker0 sorts before the physical NIC but is locally administered
        let selected = select_primary_mac(macs(&["02:42:ac:11:00:02", "a4:bb:cc:dd:ee:ff"]));
        assert_eq!(selected.as_deref(), Some("a4:bb:cc:dd:ee:ff"));

        // A new veth pair does not change the choice
        let selected = select_primary_mac(macs(&[
            "02:42:ac:11:00:02",
            "A4:BB:CC:DD:EE:FF",
            "0a:58:0a:f4:00:01",
        ]));
        assert_eq!(selected.as_deref(), Some("a4:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_lowest_burned_in_mac_is_selected() {
        let selected = select_primary_mac(macs(&["d8:3a:dd:00:00:01", "a4:bb:cc:dd:ee:ff"]));
        assert_eq!(selected.as_deref(), Some("a4:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_zero_multicast_and_garbage_are_skipped() {
        assert_eq!(
            select_primary_mac(macs(&["00:00:00:00:00:00", "01:00:5e:00:00:fb", "", "zz:00"])),
            None
        );
    }

    #[test]
    fn test_only_local_macs_selects_none() {
        assert_eq!(select_primary_mac(macs(&["02:42:ac:11:00:02", "fe:ff:ff:ff:ff:ff"])), None);
    }

    #[test]
    fn test_any_fact_changes_fingerprint() {
        let base = facts().compute_fingerprint();

        let mut other = facts();
        other.mac_address = Some("aa:bb:cc:dd:ee:00".to_string());
        assert_ne!(base, other.compute_fingerprint());

        let mut other = facts();
        other.host_name = Some("ACCT-PC02".to_string());
        assert_ne!(base, other.compute_fingerprint());
    }

    #[test]
    fn test_material_format() {
        assert_eq!(facts().material(), "ACCT-PC01-Windows-10-aa:bb:cc:dd:ee:ff");
        assert_eq!(HostFacts::default().material(), "---");
    }

    #[test]
    fn test_hardware_id_requires_mac() {
        let mut f = facts();
        assert!(f.has_hardware_id());
        f.mac_address = None;
        assert!(!f.has_hardware_id());
    }
}
