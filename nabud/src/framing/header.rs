//! The fixed 16-byte segment header.

use bilge::prelude::*;
use utils::bytes::Cast;
use utils::endian::u16be;

use super::HEADER_SIZE;

/// Owner/type tag placed in every header; the adaptor only ever targets a single NABU.
const OWNER_NABU: u8 = 0x01;
/// "Tier" value; unused beyond its wire presence, fixed at the value observed on real hardware.
const TIER: u16 = 0x0001;
/// Two bytes of unexplained but fixed wire content ("mystery bytes").
const MYSTERY: [u8; 2] = [0x01, 0xFF];

/// The segment-type byte: carries the "last segment in this image" flag in bit 0.
#[bitsize(8)]
#[derive(Clone, Copy, FromBits)]
struct SegType {
	last: bool,
	reserved: u7,
}

// SAFETY: `SegType` is a `#[bitsize(8)]` newtype over a `u8`, so it has the same layout and no
// padding or invalid bit patterns.
unsafe impl Cast for SegType {}
// SAFETY: as above; the single backing `u8` has an alignment of 1.
unsafe impl utils::bytes::Unaligned for SegType {}

/// The 16-byte segment header, laid out exactly as it appears on the wire.
///
/// Built with `#[derive(Cast)]` so the struct's byte layout *is* its wire layout: filling in the
/// fields and reading `header.as_bytes()` needs no manual serialization step.
#[derive(Cast)]
#[repr(C)]
pub struct Header {
	/// 24-bit image id, wire order matches [`CHANGE_CHANNEL`](super::CHANGE_CHANNEL)'s little-endian
	/// convention: least-significant byte first.
	pub image_id: [u8; 3],
	pub segment: u8,
	owner: u8,
	tier: u16be,
	mystery: [u8; 2],
	seg_type: SegType,
	/// The segment number, written twice (see spec DESIGN.md for why).
	segment_number_a: u16be,
	segment_number_b: u16be,
	/// Offset of this segment within the image, truncated to 16 bits; advisory only, the NABU
	/// client reconstructs the real address from the segment index instead of this field.
	offset: u16be,
}

impl Header {
	pub fn new(image_id: u32, segment: u8, offset: usize, last: bool) -> Self {
		Self {
			image_id: [(image_id & 0xFF) as u8, ((image_id >> 8) & 0xFF) as u8, ((image_id >> 16) & 0xFF) as u8],
			segment,
			owner: OWNER_NABU,
			tier: TIER.into(),
			mystery: MYSTERY,
			seg_type: SegType::new(last, u7::new(0)),
			segment_number_a: (segment as u16).into(),
			segment_number_b: (segment as u16).into(),
			offset: ((offset & 0xFFFF) as u16).into(),
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		utils::bytes::as_slice(self)
	}
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn size_is_16_bytes() {
		assert_eq!(std::mem::size_of::<Header>(), 16);
	}

	#[test]
	fn last_flag_is_encoded() {
		let h = Header::new(1, 0, 0, true);
		// seg_type is the 9th byte (0-indexed 8): 3 (image) + 1 (segment) + 1 (owner) + 2 (tier) + 2 (mystery).
		assert_eq!(h.as_bytes()[8] & 0x01, 0x01);

		let h = Header::new(1, 0, 0, false);
		assert_eq!(h.as_bytes()[8] & 0x01, 0x00);
	}

	#[test]
	fn image_id_is_little_endian() {
		let h = Header::new(0x7F_FFFF, 0, 0, true);
		assert_eq!(&h.as_bytes()[0..3], &[0xFF, 0xFF, 0x7F]);
	}
}
