//! Sensor capability set: packet geometry, header decoding and buffer
//! arithmetic for each supported detector kind.
//!
//! Every quantity the ingest and writer sides need (header layout, packet
//! counts and sizes, image shape, per-packet payload capacity) is derived
//! from one [`SensorGeometry`] value, so the two sides can never disagree
//! about the shape of a frame.

use crate::error::DecodeError;

/// Size of the fixed packet preamble: type (1) + subframe (1) + frame
/// number (4) + packet number (2) + reserved info block (14).
pub const PACKET_HEADER_SIZE: usize = 22;

/// Bytes per pixel; all supported sensors emit 16-bit pixels.
pub const PIXEL_BYTES: usize = 2;

/// Discriminates the two packet series each frame is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Sample = 0,
    Reset = 1,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Sample),
            1 => Some(PacketType::Reset),
            _ => None,
        }
    }

    /// Index of this type's plane within a frame buffer.
    pub fn plane_index(self) -> usize {
        self as usize
    }

    /// Name of the dataset this plane is persisted into.
    pub fn dataset_name(self) -> &'static str {
        match self {
            PacketType::Sample => "data",
            PacketType::Reset => "reset",
        }
    }
}

/// Decoded packet preamble fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub subframe_number: u8,
    pub frame_number: u32,
    pub packet_number: u16,
}

/// The supported detector kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Percival2M,
    Percival13M,
    Excalibur3M,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Percival2M => "percival2m",
            SensorKind::Percival13M => "percival13m",
            SensorKind::Excalibur3M => "excalibur3m",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packet and frame geometry for one sensor kind.
///
/// Fields are public so tests can construct reduced geometries; production
/// code goes through [`SensorGeometry::for_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    pub kind: SensorKind,
    pub packet_header_size: usize,
    pub num_packet_types: usize,
    pub num_subframes: usize,
    pub num_primary_packets: usize,
    pub primary_packet_size: usize,
    pub tail_packet_size: usize,
    /// Image shape in pixels, per plane.
    pub rows: usize,
    pub cols: usize,
    /// The emulator firmware increments the frame counter between the reset
    /// and sample series of one logical frame; when set, sample packets get
    /// their frame number bumped by one so the two series match up again.
    pub sample_frame_workaround: bool,
}

impl SensorGeometry {
    pub fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Percival2M => Self {
                kind,
                packet_header_size: PACKET_HEADER_SIZE,
                num_packet_types: 2,
                num_subframes: 2,
                num_primary_packets: 255,
                primary_packet_size: 8192,
                tail_packet_size: 512,
                rows: 1484,
                cols: 1408,
                sample_frame_workaround: true,
            },
            SensorKind::Percival13M => Self {
                kind,
                packet_header_size: PACKET_HEADER_SIZE,
                num_packet_types: 2,
                num_subframes: 2,
                num_primary_packets: 1600,
                primary_packet_size: 8192,
                tail_packet_size: 6376,
                rows: 3717,
                cols: 3528,
                sample_frame_workaround: true,
            },
            SensorKind::Excalibur3M => Self {
                kind,
                packet_header_size: PACKET_HEADER_SIZE,
                num_packet_types: 2,
                num_subframes: 2,
                num_primary_packets: 383,
                primary_packet_size: 8192,
                tail_packet_size: 8192,
                rows: 1536,
                cols: 2048,
                sample_frame_workaround: false,
            },
        }
    }

    /// Parse the fixed preamble of a datagram. Multi-byte fields are network
    /// byte order.
    pub fn decode_header(&self, buf: &[u8]) -> Result<PacketHeader, DecodeError> {
        if buf.len() < self.packet_header_size {
            return Err(DecodeError::ShortHeader {
                expected: self.packet_header_size,
                actual: buf.len(),
            });
        }
        let packet_type =
            PacketType::from_u8(buf[0]).ok_or(DecodeError::UnknownPacketType(buf[0]))?;
        let frame_number = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let packet_number = u16::from_be_bytes([buf[6], buf[7]]);
        Ok(PacketHeader {
            packet_type,
            subframe_number: buf[1],
            frame_number,
            packet_number,
        })
    }

    /// Frame number after the sample/reset matching workaround.
    pub fn effective_frame_number(&self, header: &PacketHeader) -> u32 {
        if self.sample_frame_workaround && header.packet_type == PacketType::Sample {
            header.frame_number.wrapping_add(1)
        } else {
            header.frame_number
        }
    }

    /// Packets per frame counted towards completion: the primary series plus
    /// the tail packet.
    pub fn num_frame_packets(&self) -> usize {
        self.num_primary_packets + 1
    }

    /// Payload capacity for a given packet number within a series.
    pub fn payload_size_for(&self, packet_number: u16) -> usize {
        if (packet_number as usize) < self.num_primary_packets {
            self.primary_packet_size
        } else {
            self.tail_packet_size
        }
    }

    pub fn max_payload(&self) -> usize {
        self.primary_packet_size.max(self.tail_packet_size)
    }

    /// Bytes carried by one complete subframe packet series.
    pub fn subframe_bytes(&self) -> usize {
        self.num_primary_packets * self.primary_packet_size + self.tail_packet_size
    }

    /// Bytes of one packet-type plane (all subframes).
    pub fn plane_bytes(&self) -> usize {
        self.num_subframes * self.subframe_bytes()
    }

    /// Total payload grid size: one plane per packet type.
    pub fn frame_buffer_size(&self) -> usize {
        self.num_packet_types * self.plane_bytes()
    }

    /// Width in pixels of one horizontal subframe strip.
    pub fn subframe_width(&self) -> usize {
        self.cols / self.num_subframes
    }

    /// Number of slots in the per-frame packet arrival bitmap.
    pub fn packet_state_slots(&self) -> usize {
        self.num_packet_types * self.num_subframes * self.num_frame_packets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(ptype: u8, subframe: u8, frame: u32, packet: u16) -> [u8; PACKET_HEADER_SIZE] {
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        buf[0] = ptype;
        buf[1] = subframe;
        buf[2..6].copy_from_slice(&frame.to_be_bytes());
        buf[6..8].copy_from_slice(&packet.to_be_bytes());
        buf
    }

    #[test]
    fn decodes_network_byte_order_fields() {
        let geometry = SensorGeometry::for_kind(SensorKind::Percival2M);
        let buf = header_bytes(1, 1, 0x0102_0304, 0x0506);
        let header = geometry.decode_header(&buf).unwrap();
        assert_eq!(header.packet_type, PacketType::Reset);
        assert_eq!(header.subframe_number, 1);
        assert_eq!(header.frame_number, 0x0102_0304);
        assert_eq!(header.packet_number, 0x0506);
    }

    #[test]
    fn short_header_is_rejected() {
        let geometry = SensorGeometry::for_kind(SensorKind::Percival2M);
        let err = geometry.decode_header(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortHeader {
                expected: PACKET_HEADER_SIZE,
                actual: 10
            }
        );
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        let geometry = SensorGeometry::for_kind(SensorKind::Percival2M);
        let buf = header_bytes(7, 0, 1, 0);
        assert_eq!(
            geometry.decode_header(&buf).unwrap_err(),
            DecodeError::UnknownPacketType(7)
        );
    }

    #[test]
    fn sample_frame_workaround_bumps_sample_packets_only() {
        let geometry = SensorGeometry::for_kind(SensorKind::Percival2M);
        let sample = PacketHeader {
            packet_type: PacketType::Sample,
            subframe_number: 0,
            frame_number: 41,
            packet_number: 0,
        };
        let reset = PacketHeader {
            packet_type: PacketType::Reset,
            ..sample
        };
        assert_eq!(geometry.effective_frame_number(&sample), 42);
        assert_eq!(geometry.effective_frame_number(&reset), 41);

        let excalibur = SensorGeometry::for_kind(SensorKind::Excalibur3M);
        assert_eq!(excalibur.effective_frame_number(&sample), 41);
    }

    #[test]
    fn tail_packet_has_tail_capacity() {
        let geometry = SensorGeometry::for_kind(SensorKind::Percival2M);
        assert_eq!(geometry.payload_size_for(0), 8192);
        assert_eq!(geometry.payload_size_for(254), 8192);
        assert_eq!(geometry.payload_size_for(255), 512);
    }

    #[test]
    fn plane_bytes_match_image_shape() {
        for kind in [
            SensorKind::Percival2M,
            SensorKind::Percival13M,
            SensorKind::Excalibur3M,
        ] {
            let g = SensorGeometry::for_kind(kind);
            assert_eq!(g.plane_bytes(), g.rows * g.cols * PIXEL_BYTES, "{kind}");
            assert_eq!(g.cols % g.num_subframes, 0, "{kind}");
            assert_eq!(
                g.subframe_bytes(),
                g.rows * g.subframe_width() * PIXEL_BYTES,
                "{kind}"
            );
        }
    }
}
