//! Ancillary (VANC/ANC) packet model (§4.5.5, §4.6.2, GLOSSARY "VANC /
//! ANC", "RP188", "AFD / Bar").
//!
//! One [`AncPacket`] is the parsed form of an SMPTE 291M ancillary data
//! packet, whichever path it arrived by: custom-ANC DMA (a dedicated
//! buffer of pre-parsed packets) or tall-VANC (packets embedded in the
//! video buffer's extra lines). Parsing and serialization both work on
//! this common representation; only the DMA-buffer-vs-VANC-line framing
//! differs between the two paths.

use crate::pipeline::{AfdMeta, BarMeta};

/// Data ID / Secondary Data ID pair identifying an ancillary packet's
/// payload kind (SMPTE 291M).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Did(pub u8, pub u8);

impl Did {
    pub const CEA708_CDP: Did = Did(0x61, 0x01);
    pub const CEA608_S334: Did = Did(0x61, 0x02);
    pub const AFD_BAR: Did = Did(0x41, 0x05);
}

/// A single parsed SMPTE 291M ancillary packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncPacket {
    pub did: Did,
    pub line_number: u16,
    /// Link A (false) or Link B (true) for dual-link/quad-link carriage.
    pub link_b: bool,
    pub user_data: Vec<u8>,
}

impl AncPacket {
    pub fn is_cea708(&self) -> bool {
        self.did == Did::CEA708_CDP
    }

    pub fn is_cea608(&self) -> bool {
        self.did == Did::CEA608_S334
    }

    pub fn is_afd_bar(&self) -> bool {
        self.did == Did::AFD_BAR
    }
}

/// Parses the ancillary packet list out of either a custom-ANC DMA buffer
/// or the VANC lines of a video buffer (§4.5.5 "Parse the ancillary packet
/// list").
///
/// The wire framing below is a compact fixed-header form: each packet is
/// `[did, sdid, line_hi, line_lo, flags, len, user_data...]`, flags bit 0
/// selecting link B. This is the ingest side of [`serialize_packets`].
pub fn parse_packets(buf: &[u8]) -> Vec<AncPacket> {
    let mut packets = Vec::new();
    let mut i = 0;
    while i + 6 <= buf.len() {
        let did = Did(buf[i], buf[i + 1]);
        let line_number = u16::from_be_bytes([buf[i + 2], buf[i + 3]]);
        let flags = buf[i + 4];
        let len = buf[i + 5] as usize;
        let start = i + 6;
        let end = start + len;
        if end > buf.len() {
            log::warn!("truncated ancillary packet at offset {i}, declared len {len}");
            break;
        }
        packets.push(AncPacket {
            did,
            line_number,
            link_b: flags & 0x01 != 0,
            user_data: buf[start..end].to_vec(),
        });
        i = end;
    }
    packets
}

/// Serializes a packet list back to the same fixed-header wire form
/// [`parse_packets`] reads, padded per `pad_to_sd_workaround` if set
/// (§4.6.2 "SDK-workaround pad").
pub fn serialize_packets(packets: &[AncPacket], pad_to_sd_workaround: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    for packet in packets {
        let start = buf.len();
        buf.push(packet.did.0);
        buf.push(packet.did.1);
        buf.extend_from_slice(&packet.line_number.to_be_bytes());
        buf.push(if packet.link_b { 0x01 } else { 0x00 });
        buf.push(packet.user_data.len() as u8);
        buf.extend_from_slice(&packet.user_data);

        if pad_to_sd_workaround {
            pad_adf_to_12_words(&mut buf, start);
        }
    }
    buf
}

/// SD formats require every ADF packet padded to a multiple of 12 words
/// with `0x040` filler, a documented workaround for an SDK truncation bug
/// (§4.6.2, "Tall-VANC path"). Words here are 16 bits wide, matching the
/// SDK's own ANC word size; the filler value `0x040` cannot be confused
/// with a real ADF byte since packet bytes are 8-bit and this filler is
/// written as a 16-bit unit.
const SD_ADF_WORD_MULTIPLE: usize = 12;
const SD_ADF_FILLER: u16 = 0x040;

fn pad_adf_to_12_words(buf: &mut Vec<u8>, packet_start: usize) {
    let packet_len = buf.len() - packet_start;
    let words = (packet_len + 1) / 2;
    let padded_words = ((words + SD_ADF_WORD_MULTIPLE - 1) / SD_ADF_WORD_MULTIPLE)
        * SD_ADF_WORD_MULTIPLE;
    let padded_bytes = padded_words * 2;
    while buf.len() - packet_start < padded_bytes {
        let filler = SD_ADF_FILLER.to_be_bytes();
        buf.extend_from_slice(&filler);
    }
}

/// Decodes an AFD/Bar packet's user data into the two separate metadata
/// structs the engine attaches (§4.5.5: "set field id, aspect-ratio flag,
/// AFD code, letterbox flag, and bar values").
///
/// Byte 0 bit 2 is the aspect-ratio flag, bits 4-7 the AFD code (unchanged
/// from the original layout); bit 1 is the letterbox flag and bit 0 the
/// field id, both carried in the two previously-unused low bits.
pub fn decode_afd_bar(packet: &AncPacket) -> Option<(AfdMeta, BarMeta)> {
    if !packet.is_afd_bar() || packet.user_data.len() < 6 {
        return None;
    }
    let data = &packet.user_data;
    let field = data[0] & 0x01;
    let is_letterbox = data[0] & 0x02 != 0;
    let afd = AfdMeta {
        afd: (data[0] >> 3) & 0x0f,
        aspect_ratio: data[0] & 0x04,
        field,
        is_letterbox,
    };
    let bar = BarMeta {
        top: u16::from_be_bytes([data[1], data[2]]),
        bottom: u16::from_be_bytes([data[3], data[4]]),
        left: 0,
        right: data[5] as u16,
        field,
        is_letterbox,
    };
    Some((afd, bar))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(did: Did, data: Vec<u8>) -> AncPacket {
        AncPacket {
            did,
            line_number: 12,
            link_b: false,
            user_data: data,
        }
    }

    #[test]
    fn round_trips_through_wire_form() {
        let packets = vec![
            sample_packet(Did::CEA708_CDP, vec![1, 2, 3]),
            sample_packet(Did::CEA608_S334, vec![4, 5]),
        ];
        let wire = serialize_packets(&packets, false);
        let parsed = parse_packets(&wire);
        assert_eq!(parsed, packets);
    }

    #[test]
    fn sd_workaround_pads_every_packet_to_12_word_multiple() {
        let packets = vec![sample_packet(Did::CEA708_CDP, vec![1, 2, 3])];
        let wire = serialize_packets(&packets, true);
        // header(6) + payload(3) = 9 bytes = 5 words (rounded up), padded to 12 words = 24 bytes.
        assert_eq!(wire.len(), 24);
    }

    #[test]
    fn truncated_packet_is_dropped_not_panicked() {
        let wire = vec![0x61, 0x01, 0x00, 0x0c, 0x00, 0xff, 1, 2, 3];
        let parsed = parse_packets(&wire);
        assert!(parsed.is_empty());
    }

    #[test]
    fn afd_bar_decodes_field_and_value_layout() {
        let packet = sample_packet(Did::AFD_BAR, vec![0b0100_1100, 0, 10, 0, 20, 30]);
        let (afd, bar) = decode_afd_bar(&packet).unwrap();
        assert_eq!(afd.afd, 0b1001);
        assert_eq!(bar.top, 10);
        assert_eq!(bar.bottom, 20);
        assert_eq!(bar.right, 30);
        assert_eq!(afd.field, 0);
        assert!(!afd.is_letterbox);
        assert_eq!(bar.field, afd.field);
    }

    #[test]
    fn afd_bar_decodes_letterbox_and_field_bits() {
        let packet = sample_packet(Did::AFD_BAR, vec![0b0100_1111, 0, 10, 0, 20, 30]);
        let (afd, bar) = decode_afd_bar(&packet).unwrap();
        assert_eq!(afd.field, 1);
        assert!(afd.is_letterbox);
        assert_eq!(bar.field, 1);
        assert!(bar.is_letterbox);
    }
}
