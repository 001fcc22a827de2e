//! Known ESC/POS BLE printer models and the GATT services they expose.

use uuid::Uuid;

/// A recognized printer model, matched by advertised name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterModel {
    /// Advertised local name prefix (case-insensitive).
    pub name_prefix: &'static str,
    /// Printable width in pixels.
    pub width_px: u16,
    pub dpi: u16,
    /// Line feeds before the cut.
    pub feed_lines: u8,
    /// Whether the model has a cutter.
    pub cut: bool,
}

const fn model(name_prefix: &'static str, width_px: u16, feed_lines: u8) -> PrinterModel {
    PrinterModel {
        name_prefix,
        width_px,
        dpi: 203,
        feed_lines,
        cut: true,
    }
}

/// Printer models recognized during filtered discovery.
pub const KNOWN_MODELS: &[PrinterModel] = &[
    model("MTP-II", 384, 3),
    model("MTP-2", 384, 3),
    model("MTP-3", 576, 3),
    model("MPT-II", 384, 3),
    model("PT-210", 384, 3),
    model("PT-280", 576, 3),
    model("RPP02", 384, 2),
    model("RPP300", 576, 3),
    model("GOOJPRT", 384, 3),
    model("POS-58", 384, 3),
    model("POS-80", 576, 3),
    model("BlueTooth Printer", 384, 3),
    model("Printer001", 384, 3),
];

/// Look up a model by advertised name.
pub fn find_model(name: &str) -> Option<&'static PrinterModel> {
    let name = name.trim();
    KNOWN_MODELS.iter().find(|m| {
        name.get(..m.name_prefix.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(m.name_prefix))
    })
}

const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Candidate printer services, probed in order by the direct variant.
pub const CANDIDATE_SERVICES: &[Uuid] = &[
    // Generic serial-over-GATT service used by most ESC/POS BLE printers
    uuid16(0x18f0),
    Uuid::from_u128(0xe781_0a71_73ae_499d_8c15_faa9_aef0_c3f2),
    // ISSC transparent UART
    Uuid::from_u128(0x4953_5343_fe7d_4ae5_8fa9_9faf_d205_e455),
    uuid16(0xff00),
    uuid16(0xffe0),
    uuid16(0xae30),
];
