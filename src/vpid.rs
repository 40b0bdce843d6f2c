//! VPID (SMPTE ST 352) decode: colorimetry, transfer characteristic, and
//! sample range derived from the A/B VPID dwords (§4.5.5 "Derive pixel
//! aspect ratio and colorimetry").

/// Transfer characteristic as carried in VPID byte 3, bits 4-5.
ffi_enum! {
    pub enum TransferCharacteristic: u8 {
        Sdr = 0b00,
        Hlg = 0b01,
        Pq = 0b10,
        Linear = 0b11,
    }
}

/// Colorimetry (primaries/matrix) as carried in VPID byte 3, bits 2-3.
ffi_enum! {
    pub enum Colorimetry: u8 {
        Bt709 = 0b00,
        Bt2020 = 0b01,
        Unknown = 0b11,
    }
}

/// Quantization range as carried in VPID byte 3, bit 6.
ffi_enum! {
    pub enum SampleRange: u8 {
        Narrow = 0,
        Full = 1,
    }
}

/// Decoded fields pulled out of one VPID dword (§4.5.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpidInfo {
    pub transfer: TransferCharacteristic,
    pub colorimetry: Colorimetry,
    pub range: SampleRange,
    /// Widescreen aspect-ratio flag (byte 3, bit 7); combined with the
    /// active raster's line count to pick the pixel aspect ratio for SD
    /// formats (§4.5.5: 40/33 for 525-line, 16/11 for 625-line).
    pub widescreen: bool,
}

pub fn decode(vpid: u32) -> VpidInfo {
    let byte3 = ((vpid >> 8) & 0xff) as u8;
    VpidInfo {
        transfer: TransferCharacteristic((byte3 >> 4) & 0b11),
        colorimetry: Colorimetry((byte3 >> 2) & 0b11),
        range: SampleRange((byte3 >> 6) & 0b1),
        widescreen: byte3 & 0b1000_0000 != 0,
    }
}

/// Pixel aspect ratio for an SD format given VPID's widescreen flag and
/// the format's active line count (§4.5.5).
pub fn sd_pixel_aspect_ratio(widescreen: bool, lines: u32) -> (u32, u32) {
    match (widescreen, lines) {
        (false, _) => (1, 1),
        (true, 486) => (40, 33),
        (true, _) => (16, 11),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_transfer_and_colorimetry_from_byte3() {
        // byte3 = 0b1_0_10_01_0 -> widescreen, range full(not used here),
        // colorimetry bits (2-3)=10 -> but Colorimetry only defines 00/01/11;
        // use an unambiguous construction instead.
        let byte3: u32 = 0b1_1_01_01_00; // widescreen, range=1, colorimetry=01(Bt2020), transfer=01(Hlg)
        let vpid = byte3 << 8;
        let info = decode(vpid);
        assert_eq!(info.transfer, TransferCharacteristic::Hlg);
        assert_eq!(info.colorimetry, Colorimetry::Bt2020);
        assert_eq!(info.range, SampleRange::Full);
        assert!(info.widescreen);
    }

    #[test]
    fn sd_par_depends_on_line_count() {
        assert_eq!(sd_pixel_aspect_ratio(false, 486), (1, 1));
        assert_eq!(sd_pixel_aspect_ratio(true, 486), (40, 33));
        assert_eq!(sd_pixel_aspect_ratio(true, 576), (16, 11));
    }
}
