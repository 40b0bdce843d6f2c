//! Video format descriptors (§3 "Video format descriptor").
//!
//! Modeled the way the teacher generates its wide enumerations
//! (`buf_types!` in the original `buf_type.rs`): one macro invocation lists
//! every mode as a record, and the macro expands it into both the public
//! enum and a static table used for capability intersection and routing
//! decisions. Nothing here is read from the wire; it is a compile-time
//! catalog of the modes §3 and the "Supported modes" list in §6 name.

use std::fmt;

/// Progressive, interlaced, or segmented-frame (PSF) scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Progressive,
    Interlaced,
    /// Progressive picture transmitted as two segments, e.g. `1080psf_2500`.
    SegmentedFrame,
}

/// Field order for interlaced and PSF formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    TopFieldFirst,
    BottomFieldFirst,
}

/// A single entry in the format table.
#[derive(Debug, Clone, Copy)]
pub struct FormatRecord {
    /// SMPTE-ish name used in logging, e.g. `"1080i_5000"`.
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    /// Pixel aspect ratio; non-square only for 525/625-line formats.
    pub par_num: u32,
    pub par_den: u32,
    pub scan: Scan,
    pub field_order: Option<FieldOrder>,
    /// Hardware mode id used when routing a single SDI link. At most one of
    /// `single_link_id`/`quad_link_id` may be absent.
    pub single_link_id: Option<u32>,
    /// Hardware mode id used when routing a quad-link (SQD or TSI) group.
    pub quad_link_id: Option<u32>,
    /// High frame rate tier (59.94/60 and above at UHD+), relevant to the
    /// quad-quad routing decision in §4.5.2 step 5.
    pub is_hfr: bool,
}

impl FormatRecord {
    /// Whether this mode can be used in quad-link mode at all.
    pub fn quad_capable(&self) -> bool {
        self.quad_link_id.is_some()
    }

    /// Frame duration as a (numerator, denominator) pair in seconds.
    pub fn frame_duration(&self) -> (u32, u32) {
        (self.fps_den, self.fps_num)
    }
}

macro_rules! video_formats {
    (
        $(
            $variant:ident => {
                name: $name:literal,
                size: ($w:expr, $h:expr),
                fps: $fn_:expr / $fd:expr,
                par: $pn:expr / $pd:expr,
                scan: $scan:expr,
                field_order: $field_order:expr,
                single: $single:expr,
                quad: $quad:expr,
                hfr: $hfr:expr $(,)?
            }
        ),+ $(,)?
    ) => {
        /// A named video mode, or [`VideoFormat::Auto`] to request runtime detection.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[non_exhaustive]
        pub enum VideoFormat {
            /// Requests runtime format detection (§3).
            Auto,
            $( $variant, )+
        }

        impl VideoFormat {
            const ALL: &'static [VideoFormat] = &[ $( VideoFormat::$variant, )+ ];

            /// Returns the static descriptor for this mode, or `None` for [`VideoFormat::Auto`].
            pub fn record(self) -> Option<&'static FormatRecord> {
                match self {
                    VideoFormat::Auto => None,
                    $(
                        VideoFormat::$variant => Some(&FormatRecord {
                            name: $name,
                            width: $w,
                            height: $h,
                            fps_num: $fn_,
                            fps_den: $fd,
                            par_num: $pn,
                            par_den: $pd,
                            scan: $scan,
                            field_order: $field_order,
                            single_link_id: $single,
                            quad_link_id: $quad,
                            is_hfr: $hfr,
                        }),
                    )+
                }
            }

            /// All concrete (non-`Auto`) modes known to this table.
            pub fn all() -> &'static [VideoFormat] {
                Self::ALL
            }
        }

        impl fmt::Display for VideoFormat {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.record() {
                    Some(rec) => f.write_str(rec.name),
                    None => f.write_str("auto"),
                }
            }
        }
    };
}

video_formats! {
    Sd525_5994 => {
        name: "525_5994", size: (720, 486), fps: 60000/1001, par: 10/11,
        scan: Scan::Interlaced, field_order: Some(FieldOrder::BottomFieldFirst),
        single: Some(0x01), quad: None, hfr: false,
    },
    Sd625_5000 => {
        name: "625_5000", size: (720, 576), fps: 50/1, par: 12/11,
        scan: Scan::Interlaced, field_order: Some(FieldOrder::TopFieldFirst),
        single: Some(0x02), quad: None, hfr: false,
    },
    Hd720p_5994 => {
        name: "720p_5994", size: (1280, 720), fps: 60000/1001, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x10), quad: None, hfr: false,
    },
    Hd720p_6000 => {
        name: "720p_6000", size: (1280, 720), fps: 60/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x11), quad: None, hfr: false,
    },
    Hd1080i_5000 => {
        name: "1080i_5000", size: (1920, 1080), fps: 25/1, par: 1/1,
        scan: Scan::Interlaced, field_order: Some(FieldOrder::TopFieldFirst),
        single: Some(0x20), quad: None, hfr: false,
    },
    Hd1080i_5994 => {
        name: "1080i_5994", size: (1920, 1080), fps: 30000/1001, par: 1/1,
        scan: Scan::Interlaced, field_order: Some(FieldOrder::TopFieldFirst),
        single: Some(0x21), quad: None, hfr: false,
    },
    Hd1080psf_2500_2 => {
        name: "1080psf_2500_2", size: (1920, 1080), fps: 25/1, par: 1/1,
        scan: Scan::SegmentedFrame, field_order: Some(FieldOrder::TopFieldFirst),
        single: Some(0x22), quad: None, hfr: false,
    },
    Hd1080p_3000 => {
        name: "1080p_3000", size: (1920, 1080), fps: 30/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x23), quad: Some(0x23), hfr: false,
    },
    Hd1080p_2997 => {
        name: "1080p_2997", size: (1920, 1080), fps: 30000/1001, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x24), quad: Some(0x24), hfr: false,
    },
    Hd1080p_5994 => {
        name: "1080p_5994", size: (1920, 1080), fps: 60000/1001, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x25), quad: Some(0x25), hfr: true,
    },
    Hd1080p_6000 => {
        name: "1080p_6000", size: (1920, 1080), fps: 60/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x26), quad: Some(0x26), hfr: true,
    },
    Dci2kp_2400 => {
        name: "2kdci_2400", size: (2048, 1080), fps: 24/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: Some(0x30), quad: Some(0x30), hfr: false,
    },
    Uhd2160p_3000 => {
        name: "2160p_3000", size: (3840, 2160), fps: 30/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x40), hfr: false,
    },
    Uhd2160p_5994 => {
        name: "2160p_5994", size: (3840, 2160), fps: 60000/1001, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x41), hfr: true,
    },
    Uhd2160p_6000 => {
        name: "2160p_6000", size: (3840, 2160), fps: 60/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x42), hfr: true,
    },
    Dci4kp_2400 => {
        name: "4kdci_2400", size: (4096, 2160), fps: 24/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x43), hfr: false,
    },
    Uhd4320p_6000 => {
        name: "4320p_6000", size: (7680, 4320), fps: 60/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x50), hfr: true,
    },
    Uhd4320p_5994 => {
        name: "4320p_5994", size: (7680, 4320), fps: 60000/1001, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x51), hfr: true,
    },
    Dci8kp_2400 => {
        name: "8kdci_2400", size: (8192, 4320), fps: 24/1, par: 1/1,
        scan: Scan::Progressive, field_order: None,
        single: None, quad: Some(0x52), hfr: false,
    },
}

/// Pixel format used for every hardware frame buffer (§1 non-goals, §3):
/// 10-bit packed 4:2:2 Y'CbCr, the `v210` FourCC-equivalent layout.
///
/// This crate does not support any other sample format; conversions are
/// out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFormat;

impl SampleFormat {
    /// `v210` packs 6 pixels (12 components) into 4 32-bit words (16 bytes).
    const V210_GROUP_PIXELS: u32 = 6;
    const V210_GROUP_BYTES: u32 = 16;

    /// Number of bytes per scanline of the given pixel width, rounded up to
    /// whole `v210` groups (this mirrors the driver's `GetVideoActiveSize`
    /// rounding, §4.5.2 step 11).
    pub fn bytes_per_line(width: u32) -> u32 {
        let groups = (width + Self::V210_GROUP_PIXELS - 1) / Self::V210_GROUP_PIXELS;
        groups * Self::V210_GROUP_BYTES
    }
}

/// Computes the active-raster byte size of a frame buffer, mirroring the
/// SDK's `GetVideoActiveSize(format, 10-bit 422, vanc_mode)` (§4.5.2 step 11,
/// §4.6.2 step 1).
///
/// `vanc_lines` is the number of additional ancillary-data lines included
/// above the active raster (0 when VANC is off and custom-ANC DMA is used,
/// per §4.5.2 step 6).
pub fn video_active_size(format: VideoFormat, vanc_lines: u32) -> Option<u32> {
    let rec = format.record()?;
    let lines = rec.height + vanc_lines;
    Some(SampleFormat::bytes_per_line(rec.width) * lines)
}
