//! Symbolic names of partition type codes.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Known partition codes, in lookup priority order.
///
/// Several codes share a name. Where a code appears twice the first entry
/// wins.
pub const PARTITION_CODES: &[(u32, &str)] = &[
    (0x20000, "M3Boot"),
    (0x10000, "M3Boot-ptable"),
    (0x200000, "M3Boot_R11"),
    (0x10000, "Ptable"),
    (0x480000, "Ptable_ext_A"),
    (0x490000, "Ptable_ext_B"),
    (0x110000, "Fastboot"),
    (0x130000, "Logo"),
    (0x30000, "Kernel"),
    (0x90000, "Kernel_R11"),
    (0x270000, "DTS_R11"),
    (0x40000, "VxWorks"),
    (0x220000, "VxWorks_R11"),
    (0x50000, "M3Image"),
    (0x230000, "M3Image_R11"),
    (0x60000, "DSP"),
    (0x240000, "DSP_R11"),
    (0x70000, "Nvdload"),
    (0x250000, "Nvdload_R11"),
    (0x80000, "Nvimg"),
    (0x590000, "System"),
    (0x100000, "System"),
    (0x570000, "APP"),
    (0x5a0000, "APP"),
    (0x450000, "APP_EXT_A"),
    (0x460000, "APP_EXT_B"),
    (0xa0000, "Oeminfo"),
    (0xb0000, "CDROMISO"),
    (0x550000, "Oeminfo"),
    (0x510000, "Oeminfo"),
    (0x1a0000, "Oeminfo"),
    (0x560000, "WEBUI"),
    (0x5b0000, "WEBUI"),
    (0x170000, "Wimaxcfg"),
    (0x180000, "Wimaxcrf"),
    (0x190000, "Userdata"),
    (0x1b0000, "Online"),
    (0x5d0000, "Online"),
    (0x5e0000, "Online"),
    (0x100, "Ptable_R1"),
    (0x101, "Bootloader_R1"),
    (0x102, "Bootrom_R1"),
    (0x550103, "VxWorks_R1"),
    (0x104, "Fastboot_R1"),
    (0x105, "Kernel_R1"),
    (0x107, "System_R1"),
    (0x66, "Nvimage_R1"),
    (0x113, "WEBUI_R1"),
    (0x109, "APP_R1"),
    (0x280000, "HIFI_R11"),
    (0x1e0000, "Modem_fw"),
    (0x290000, "Teeos"),
];

static NAMES: LazyLock<HashMap<u32, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::with_capacity(PARTITION_CODES.len());
    for &(code, name) in PARTITION_CODES {
        map.entry(code).or_insert(name);
    }
    map
});

/// Known name of `code`, if any.
pub fn known_name(code: u32) -> Option<&'static str> {
    NAMES.get(&code).copied()
}

/// Name of `code`, or `U` followed by the code as 8 hex digits.
pub fn partition_name(code: u32) -> String {
    known_name(code).map_or_else(|| format!("U{code:08x}"), str::to_string)
}
