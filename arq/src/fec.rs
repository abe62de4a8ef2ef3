use bytes::{Buf, BufMut, Bytes, BytesMut};
use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 6;
pub const FLAG_DATA: u16 = 0xf1;
pub const FLAG_FEC: u16 = 0xf2;
const EXPIRE_MS: u32 = 30_000;

/// One datagram as seen by the FEC layer. `raw` is the *entire* wire packet, FEC header
/// included: Reed-Solomon needs the same byte layout on decode as it saw on encode, so the
/// window stores full rows rather than header-stripped payloads.
#[derive(Debug, Clone)]
pub struct Packet {
	pub seqid: u32,
	pub flag: u16,
	pub raw: Bytes,
	pub ts_local: u32,
}

impl Packet {
	/// Reads the 6-byte FEC prefix without consuming `buf`; keeps the full datagram as `raw`.
	pub fn decode(buf: Bytes, now_ms: u32) -> Result<Self> {
		if buf.remaining() < HEADER_SIZE {
			return Err(Error::ShortPacket);
		}

		let mut header = buf.clone();
		let seqid = header.get_u32_le();
		let flag = header.get_u16_le();

		Ok(Self { seqid, flag, raw: buf, ts_local: now_ms })
	}
}

/// Reed-Solomon (k, m) systematic erasure shim with a reordering reception window.
///
/// Tags outbound datagrams with an incrementing `seqid`; on the inbound side, buffers datagrams
/// until either a whole block of `k` data shards has arrived intact, or enough of the `k + m`
/// shards for a block are present to reconstruct the rest.
pub struct Fec {
	data_shards: usize,
	parity_shards: usize,
	total_shards: usize,
	rxlimit: usize,
	rs: ReedSolomon,

	next: u32,
	paws: u32,

	rx: Vec<Packet>,
	last_check: u32,
}

impl Fec {
	pub fn new(rxlimit: usize, data_shards: usize, parity_shards: usize) -> Result<Self> {
		if data_shards == 0 || parity_shards == 0 {
			return Err(Error::InvalidFecConfig);
		}

		let total_shards = data_shards + parity_shards;

		if rxlimit < total_shards {
			return Err(Error::InvalidFecConfig);
		}

		let rs = ReedSolomon::new(data_shards, parity_shards)?;
		let paws = (u32::MAX / total_shards as u32 - 1) * total_shards as u32;

		Ok(Self { data_shards, parity_shards, total_shards, rxlimit, rs, next: 0, paws, rx: Vec::new(), last_check: 0 })
	}

	pub fn data_shards(&self) -> usize {
		self.data_shards
	}

	pub fn parity_shards(&self) -> usize {
		self.parity_shards
	}

	/// Prefixes `payload` with the 6-byte FEC header plus a 2-byte length-including-itself word,
	/// tagging it as a DATA shard and advancing the seqid counter.
	pub fn mark_data(&mut self, payload: &[u8]) -> BytesMut {
		let mut buf = BytesMut::with_capacity(HEADER_SIZE + 2 + payload.len());

		buf.put_u32_le(self.next);
		buf.put_u16_le(FLAG_DATA);
		buf.put_u16_le((payload.len() + 2) as u16);
		buf.put_slice(payload);

		self.next += 1;

		buf
	}

	/// Prefixes `parity` with the 6-byte FEC header, tagging it as a parity (FEC) shard.
	///
	/// Resets the seqid counter at the PAWS boundary so a block is never split by wraparound;
	/// this is the only place `next` wraps (data shards never trigger it mid-block).
	pub fn mark_fec(&mut self, parity: &[u8]) -> BytesMut {
		let mut buf = BytesMut::with_capacity(HEADER_SIZE + parity.len());

		buf.put_u32_le(self.next);
		buf.put_u16_le(FLAG_FEC);
		buf.put_slice(parity);

		self.next += 1;

		if self.next >= self.paws {
			self.next = 0;
		}

		buf
	}

	/// Pads `shards[0..k]` to a common length and computes `shards[k..k+m]` in place.
	///
	/// `shards` holds the full marked rows (FEC header included) for the `k` data shards, and
	/// placeholder vectors (any length, content ignored) for the `m` parity shards.
	pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result {
		debug_assert_eq!(shards.len(), self.total_shards);

		let max = shards[..self.data_shards].iter().map(Vec::len).max().unwrap_or(0);

		for shard in shards.iter_mut() {
			shard.resize(max, 0);
		}

		self.rs.encode(shards)?;

		Ok(())
	}

	/// Feeds one received [`Packet`] into the reception window, returning any data shards that
	/// became recoverable as a result (as the original post-header, post-length payload bytes).
	pub fn input(&mut self, pkt: Packet) -> Result<Vec<Bytes>> {
		self.expire(pkt.ts_local);

		let Some(insert_at) = self.insert(pkt) else { return Ok(Vec::new()) };

		let recovered = self.try_recover(insert_at);

		if self.rx.len() > self.rxlimit {
			self.rx.remove(0);
		}

		Ok(recovered)
	}

	fn expire(&mut self, now: u32) {
		if now.wrapping_sub(self.last_check) < EXPIRE_MS {
			return;
		}

		self.rx.retain(|pkt| now.wrapping_sub(pkt.ts_local) <= EXPIRE_MS);
		self.last_check = now;
	}

	/// Ordered-inserts `pkt` into `rx` by `seqid`, dropping exact-`seqid` duplicates (replayed
	/// retransmissions). Returns the insertion index, or `None` if it was a duplicate.
	///
	/// Handles the empty-`rx` case explicitly rather than computing `rx.len() - 1` on an empty
	/// (unsigned) vector, which is where the off-by-one in the source this is grounded on comes
	/// from.
	fn insert(&mut self, pkt: Packet) -> Option<usize> {
		if self.rx.is_empty() {
			self.rx.push(pkt);
			return Some(0);
		}

		let mut insert_at = 0;

		for i in (0..self.rx.len()).rev() {
			if self.rx[i].seqid == pkt.seqid {
				return None;
			} else if self.rx[i].seqid < pkt.seqid {
				insert_at = i + 1;
				break;
			}
		}

		self.rx.insert(insert_at, pkt);
		Some(insert_at)
	}

	/// Scans the block containing the packet just inserted at `insert_at` and, if enough shards
	/// are present, drops the block from `rx` and returns any data shards that were missing.
	fn try_recover(&mut self, insert_at: usize) -> Vec<Bytes> {
		let n = self.total_shards as u32;
		let seqid = self.rx[insert_at].seqid;
		let block_begin = seqid - seqid % n;
		let block_end = block_begin + n - 1;

		// Saturating clamp into [0, rx.len() - 1]; the clamp the source's malformed ternary
		// expression was evidently meant to express.
		let search_begin = insert_at.saturating_sub((seqid % n) as usize).clamp(0, self.rx.len() - 1);
		let search_end = (search_begin + n as usize - 1).min(self.rx.len() - 1);

		let mut present = vec![false; self.total_shards];
		let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.total_shards];
		let mut num_shard = 0;
		let mut num_data_shard = 0;
		let mut first = None;
		let mut maxlen = 0;

		for i in search_begin..=search_end {
			let Some(entry) = self.rx.get(i) else { break };

			if entry.seqid > block_end {
				break;
			}

			if entry.seqid < block_begin {
				continue;
			}

			let slot = (entry.seqid % n) as usize;
			maxlen = maxlen.max(entry.raw.len());
			present[slot] = true;
			shards[slot] = Some(entry.raw.to_vec());
			num_shard += 1;

			if entry.flag == FLAG_DATA {
				num_data_shard += 1;
			}

			if first.is_none() {
				first = Some(i);
			}
		}

		let Some(first) = first else { return Vec::new() };

		if num_data_shard == self.data_shards {
			self.rx.drain(first..first + num_shard);
			return Vec::new();
		}

		if num_shard < self.data_shards {
			return Vec::new();
		}

		for shard in shards.iter_mut().flatten() {
			shard.resize(maxlen, 0);
		}

		// Missing slots stay `None`: `reconstruct` treats `None` as the erasure to fill in and
		// leaves `Some(_)` entries untouched, so a zero-filled placeholder here would read back
		// as a "present" all-zero shard instead of ever being recomputed.
		if self.rs.reconstruct(&mut shards).is_err() {
			self.rx.drain(first..first + num_shard);
			return Vec::new();
		}

		let mut recovered = Vec::new();

		for (slot, was_present) in present.iter().enumerate().take(self.data_shards) {
			if *was_present {
				continue;
			}

			if let Some(shard) = &shards[slot] {
				recovered.push(unpad(shard));
			}
		}

		self.rx.drain(first..first + num_shard);

		recovered
	}
}

/// Strips the 6-byte FEC header and the 2-byte length-including-itself word a DATA row carries.
fn unpad(row: &[u8]) -> Bytes {
	if row.len() < HEADER_SIZE + 2 {
		return Bytes::new();
	}

	let lenfield = u16::from_le_bytes([row[HEADER_SIZE], row[HEADER_SIZE + 1]]) as usize;
	let payload_len = lenfield.saturating_sub(2).min(row.len() - HEADER_SIZE - 2);

	Bytes::copy_from_slice(&row[HEADER_SIZE + 2..HEADER_SIZE + 2 + payload_len])
}

#[cfg(test)]
mod tests {
	use super::*;

	fn group(fec: &mut Fec, payloads: &[&[u8]]) -> Vec<Vec<u8>> {
		let mut shards: Vec<Vec<u8>> = payloads.iter().map(|p| fec.mark_data(p).to_vec()).collect();

		for _ in 0..fec.parity_shards() {
			shards.push(Vec::new());
		}

		fec.encode(&mut shards).unwrap();
		shards
	}

	#[test]
	fn recovers_a_single_dropped_data_shard() {
		let (k, m) = (3, 1);
		let mut fec = Fec::new(3 * (k + m), k, m).unwrap();

		let shards = group(&mut fec, &[b"alpha", b"bravo", b"charl"]);

		let mut recv = Fec::new(3 * (k + m), k, m).unwrap();
		let mut recovered = Vec::new();

		// Deliver shards 0, 2, 3 (parity); drop shard 1 ("bravo").
		for idx in [0usize, 2, 3] {
			let pkt = Packet::decode(Bytes::copy_from_slice(&shards[idx]), 1_000).unwrap();
			recovered.extend(recv.input(pkt).unwrap());
		}

		assert_eq!(recovered.len(), 1);
		assert_eq!(&recovered[0][..], b"bravo".as_slice());
	}

	#[test]
	fn no_loss_returns_nothing_to_recover() {
		let (k, m) = (2, 1);
		let mut fec = Fec::new(3 * (k + m), k, m).unwrap();
		let shards = group(&mut fec, &[b"one", b"two"]);

		let mut recv = Fec::new(3 * (k + m), k, m).unwrap();

		for shard in &shards {
			let pkt = Packet::decode(Bytes::copy_from_slice(shard), 1_000).unwrap();
			assert!(recv.input(pkt).unwrap().is_empty());
		}
	}

	#[test]
	fn empty_rx_insert_does_not_panic() {
		let mut fec = Fec::new(8, 2, 2).unwrap();
		let payload = fec.mark_data(b"x").to_vec();
		let pkt = Packet::decode(Bytes::copy_from_slice(&payload), 0).unwrap();
		assert!(fec.input(pkt).unwrap().is_empty());
	}

	#[test]
	fn duplicate_seqid_is_dropped() {
		let mut fec = Fec::new(8, 2, 2).unwrap();
		let payload = fec.mark_data(b"x").to_vec();

		let pkt1 = Packet::decode(Bytes::copy_from_slice(&payload), 0).unwrap();
		let pkt2 = Packet::decode(Bytes::copy_from_slice(&payload), 1).unwrap();

		fec.input(pkt1).unwrap();
		assert_eq!(fec.rx.len(), 1);
		fec.input(pkt2).unwrap();
		assert_eq!(fec.rx.len(), 1);
	}

	#[test]
	fn window_is_bounded_by_rxlimit() {
		let mut fec = Fec::new(4, 2, 2).unwrap();

		for i in 0..10u32 {
			let payload = fec.mark_fec(&[i as u8]).to_vec();
			let pkt = Packet::decode(Bytes::copy_from_slice(&payload), 0).unwrap();
			fec.input(pkt).unwrap();
		}

		assert!(fec.rx.len() <= 4);
	}
}
