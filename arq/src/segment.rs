use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Wire header size: conv(4) cmd(1) frg(1) wnd(2) ts(4) sn(4) una(4) len(4).
pub const HEADER_SIZE: usize = 24;

pub const CMD_PUSH: u8 = 81;
pub const CMD_ACK: u8 = 82;
pub const CMD_WASK: u8 = 83;
pub const CMD_WINS: u8 = 84;

pub fn cmd_valid(cmd: u8) -> bool {
	matches!(cmd, CMD_PUSH | CMD_ACK | CMD_WASK | CMD_WINS)
}

/// One unit of reliable transmission: the wire fields of §3 plus transport-local bookkeeping
/// that never goes on the wire (`resendts`, `rto`, `fastack`, `xmit`).
#[derive(Debug, Clone)]
pub struct Segment {
	pub conv: u32,
	pub cmd: u8,
	pub frg: u8,
	pub wnd: u16,
	pub ts: u32,
	pub sn: u32,
	pub una: u32,
	pub data: Bytes,

	pub resendts: u32,
	pub rto: u32,
	pub fastack: u32,
	pub xmit: u32,
}

impl Segment {
	pub fn new(conv: u32, cmd: u8, data: Bytes) -> Self {
		Self { conv, cmd, frg: 0, wnd: 0, ts: 0, sn: 0, una: 0, data, resendts: 0, rto: 0, fastack: 0, xmit: 0 }
	}

	pub fn len(&self) -> u32 {
		self.data.len() as u32
	}

	pub fn encoded_len(&self) -> usize {
		HEADER_SIZE + self.data.len()
	}

	/// Writes the 24-byte header followed by the payload.
	pub fn encode(&self, buf: &mut BytesMut) {
		buf.put_u32_le(self.conv);
		buf.put_u8(self.cmd);
		buf.put_u8(self.frg);
		buf.put_u16_le(self.wnd);
		buf.put_u32_le(self.ts);
		buf.put_u32_le(self.sn);
		buf.put_u32_le(self.una);
		buf.put_u32_le(self.len());
		buf.put_slice(&self.data);
	}

	/// Parses one header + payload from the front of `buf`, advancing past it.
	///
	/// `buf` may contain further concatenated segments; only this one is consumed.
	pub fn decode(buf: &mut Bytes) -> Result<Self> {
		if buf.remaining() < HEADER_SIZE {
			return Err(Error::ShortPacket);
		}

		let conv = buf.get_u32_le();
		let cmd = buf.get_u8();
		let frg = buf.get_u8();
		let wnd = buf.get_u16_le();
		let ts = buf.get_u32_le();
		let sn = buf.get_u32_le();
		let una = buf.get_u32_le();
		let len = buf.get_u32_le() as usize;

		if buf.remaining() < len {
			return Err(Error::ShortPacket);
		}

		let data = buf.copy_to_bytes(len);

		Ok(Self { conv, cmd, frg, wnd, ts, sn, una, data, resendts: 0, rto: 0, fastack: 0, xmit: 0 })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_decode_round_trips_on_boundary_values() {
		let mut seg = Segment::new(u32::MAX, CMD_PUSH, Bytes::from_static(b"payload"));
		seg.frg = 255;
		seg.wnd = u16::MAX;
		seg.ts = u32::MAX;
		seg.sn = u32::MAX;
		seg.una = u32::MAX;

		let mut buf = BytesMut::new();
		seg.encode(&mut buf);

		let mut cursor = buf.freeze();
		let decoded = Segment::decode(&mut cursor).unwrap();

		assert_eq!(decoded.conv, seg.conv);
		assert_eq!(decoded.cmd, seg.cmd);
		assert_eq!(decoded.frg, seg.frg);
		assert_eq!(decoded.wnd, seg.wnd);
		assert_eq!(decoded.ts, seg.ts);
		assert_eq!(decoded.sn, seg.sn);
		assert_eq!(decoded.una, seg.una);
		assert_eq!(decoded.data, seg.data);
		assert!(cursor.is_empty());
	}

	#[test]
	fn encode_decode_round_trips_on_empty_payload() {
		let seg = Segment::new(0, CMD_ACK, Bytes::new());

		let mut buf = BytesMut::new();
		seg.encode(&mut buf);
		assert_eq!(buf.len(), HEADER_SIZE);

		let mut cursor = buf.freeze();
		let decoded = Segment::decode(&mut cursor).unwrap();
		assert_eq!(decoded.data.len(), 0);
		assert!(cursor.is_empty());
	}

	#[test]
	fn decode_rejects_a_datagram_shorter_than_the_header() {
		let mut cursor = Bytes::from_static(&[0u8; HEADER_SIZE - 1]);
		assert_eq!(Segment::decode(&mut cursor), Err(Error::ShortPacket));
	}
}
