/// Validate a MAC address in colon-separated form (e.g., "aa:bb:cc:dd:ee:ff").
pub fn is_valid_mac(mac: &str) -> bool {
    regex_lite::Regex::new(r"^[\da-fA-F]{2}(:[\da-fA-F]{2}){5}$")
        .map(|re| re.is_match(mac))
        .unwrap_or(false)
}

/// Form every stored or looked-up MAC takes: trimmed, lowercase and
/// colon-separated. None when `mac` is not a colon-separated MAC.
pub fn canonical_mac(mac: &str) -> Option<String> {
    let mac = mac.trim();
    is_valid_mac(mac).then(|| mac.to_ascii_lowercase())
}

/// Known OUI prefixes for hardware commonly found in racks and labs
const OUI_VENDORS: &[(&str, &str)] = &[
    ("52:54:00", "QEMU"),
    ("00:50:56", "VMware"),
    ("00:0C:29", "VMware"),
    ("08:00:27", "VirtualBox"),
    ("00:25:90", "Super Micro Computer"),
    ("0C:C4:7A", "Super Micro Computer"),
    ("AC:1F:6B", "Super Micro Computer"),
    ("00:1B:21", "Intel"),
    ("3C:FD:FE", "Intel"),
    ("00:02:C9", "Mellanox"),
    ("24:8A:07", "Mellanox"),
    ("14:18:77", "Dell"),
    ("F8:BC:12", "Dell"),
    ("18:66:DA", "Dell"),
    ("9C:B6:54", "HP"),
    ("3C:A8:2A", "HP"),
    ("94:18:82", "Hewlett Packard Enterprise"),
];

/// Look up the hardware vendor by MAC address OUI (first 3 bytes).
/// Returns "unknown" when the prefix is not in the table.
pub fn mac_vendor(mac: &str) -> &'static str {
    let normalized: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if normalized.len() < 6 {
        return "unknown";
    }

    let oui = format!(
        "{}:{}:{}",
        &normalized[0..2],
        &normalized[2..4],
        &normalized[4..6]
    )
    .to_uppercase();

    OUI_VENDORS
        .iter()
        .find(|(prefix, _)| *prefix == oui)
        .map(|(_, vendor)| *vendor)
        .unwrap_or("unknown")
}

/// Map a DHCP client system architecture code (option 93, RFC 4578 and the
/// IANA processor architecture registry) to its name
pub fn dhcp_arch_name(code: i64) -> &'static str {
    match code {
        0x00 => "x86 BIOS",
        0x02 => "Itanium",
        0x06 => "x86 UEFI",
        0x07 => "x64 UEFI",
        0x09 => "EBC",
        0x0a => "ARM 32-bit UEFI",
        0x0b => "ARM 64-bit UEFI",
        0x0c => "PowerPC Open Firmware",
        0x0d => "PowerPC ePAPR",
        0x0e => "POWER OPAL v3",
        0x0f => "x86 uefi boot from http",
        0x10 => "x64 uefi boot from http",
        0x11 => "ebc boot from http",
        0x12 => "arm uefi 32 boot from http",
        0x13 => "arm uefi 64 boot from http",
        0x14 => "pc/at bios boot from http",
        0x15 => "arm 32 uboot",
        0x16 => "arm 64 uboot",
        0x17 => "arm uboot 32 boot from http",
        0x18 => "arm uboot 64 boot from http",
        0x19 => "RISC-V 32-bit UEFI",
        0x1a => "RISC-V 32-bit UEFI boot from http",
        0x1b => "RISC-V 64-bit UEFI",
        0x1c => "RISC-V 64-bit UEFI boot from http",
        0x1d => "RISC-V 128-bit UEFI",
        0x1e => "RISC-V 128-bit UEFI boot from http",
        _ => "unknown",
    }
}

/// Clamp a caller-supplied page size into [1, 100]
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_mac() {
        assert_eq!(canonical_mac(" AA:BB:CC:DD:EE:FF\n").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(canonical_mac("52:54:00:ab:CD:01").as_deref(), Some("52:54:00:ab:cd:01"));
        assert_eq!(canonical_mac("AA-BB-CC-DD-EE-FF"), None);
        assert_eq!(canonical_mac("aabbccddeeff"), None);
    }

    #[test]
    fn test_is_valid_mac() {
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("52:54:00:AB:cd:01"));
        assert!(!is_valid_mac(""));
        assert!(!is_valid_mac("aa-bb-cc-dd-ee-ff"));
        assert!(!is_valid_mac("aa:bb:cc:dd:ee"));
        assert!(!is_valid_mac("aa:bb:cc:dd:ee:ff:00"));
        assert!(!is_valid_mac("gg:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac("xaa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_mac_vendor() {
        assert_eq!(mac_vendor("52:54:00:12:34:56"), "QEMU");
        assert_eq!(mac_vendor("0c:c4:7a:00:00:01"), "Super Micro Computer");
        assert_eq!(mac_vendor("00:11:22:33:44:55"), "unknown");
        assert_eq!(mac_vendor("00"), "unknown");
    }

    #[test]
    fn test_dhcp_arch_name() {
        assert_eq!(dhcp_arch_name(0), "x86 BIOS");
        assert_eq!(dhcp_arch_name(7), "x64 UEFI");
        assert_eq!(dhcp_arch_name(0x0b), "ARM 64-bit UEFI");
        assert_eq!(dhcp_arch_name(0x1e), "RISC-V 128-bit UEFI boot from http");
        assert_eq!(dhcp_arch_name(1), "unknown");
        assert_eq!(dhcp_arch_name(-4), "unknown");
        assert_eq!(dhcp_arch_name(500), "unknown");
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(-5), 1);
        assert_eq!(clamp_limit(25), 25);
        assert_eq!(clamp_limit(1000), 100);
    }
}
