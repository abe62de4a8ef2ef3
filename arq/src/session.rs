use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use crate::engine::{self, ArqEngine};
use crate::error::{Error, Result};
use crate::fec::{self, Fec};
use crate::segment::HEADER_SIZE;

/// Reed-Solomon shard counts and reception window size for the optional FEC shim.
#[derive(Debug, Clone, Copy)]
pub struct FecConfig {
	pub data_shards: usize,
	pub parity_shards: usize,
	pub rxlimit: usize,
}

/// Construction parameters for a [`Session`]; fields mirror the engine's own setters so a whole
/// session can be stood up from one value instead of a chain of calls.
#[derive(Debug, Clone, Copy)]
pub struct Config {
	pub conv: u32,
	pub mtu: u32,
	pub interval: u32,
	pub nodelay: bool,
	pub fastresend: u32,
	pub nocwnd: bool,
	pub snd_wnd: u16,
	pub rcv_wnd: u16,
	pub stream: bool,
	pub dead_link: u32,
	pub fec: Option<FecConfig>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			conv: 0,
			mtu: engine::MTU_DEFAULT,
			interval: engine::INTERVAL_DEFAULT,
			nodelay: false,
			fastresend: engine::FASTACK_LIMIT_DEFAULT,
			nocwnd: false,
			snd_wnd: engine::WND_SND_DEFAULT,
			rcv_wnd: engine::WND_RCV_DEFAULT,
			stream: false,
			dead_link: engine::DEADLINK_DEFAULT,
			fec: None,
		}
	}
}

type RawOutput = Rc<RefCell<VecDeque<Bytes>>>;

fn forwarder(queue: RawOutput) -> Box<dyn FnMut(&[u8])> {
	Box::new(move |buf: &[u8]| queue.borrow_mut().push_back(Bytes::copy_from_slice(buf)))
}

/// Ties an [`ArqEngine`] to an optional [`Fec`] shim and a caller-supplied datagram transport.
///
/// This is the surface embedders actually drive: `send`/`recv` for messages, `input` for
/// arriving datagrams, `update`/`check` for the polled timer loop. When FEC is configured, data
/// shards are forwarded to `output` as soon as the engine emits them and parity is forwarded
/// once a full group of data shards has been seen.
pub struct Session<O: FnMut(&[u8])> {
	engine: ArqEngine<Box<dyn FnMut(&[u8])>>,
	raw_out: RawOutput,
	fec: Option<Fec>,
	fec_group: Vec<Vec<u8>>,
	output: O,
}

impl<O: FnMut(&[u8])> Session<O> {
	pub fn new(config: Config, output: O) -> Result<Self> {
		let raw_out: RawOutput = Rc::new(RefCell::new(VecDeque::new()));
		let mut engine = ArqEngine::new(config.conv, forwarder(raw_out.clone()));

		engine.set_mtu(config.mtu)?;
		engine.set_interval(config.interval);
		engine.set_nodelay(config.nodelay, None, config.fastresend, config.nocwnd);
		engine.set_wndsize(config.snd_wnd, config.rcv_wnd);
		engine.set_stream(config.stream);
		engine.set_dead_link(config.dead_link);

		let fec = config.fec.map(|c| Fec::new(c.rxlimit, c.data_shards, c.parity_shards)).transpose()?;

		Ok(Self { engine, raw_out, fec, fec_group: Vec::new(), output })
	}

	pub fn send(&mut self, data: &[u8]) -> Result {
		self.engine.send(data)
	}

	pub fn recv(&mut self, buffer: &mut [u8]) -> Result<usize> {
		self.engine.recv(buffer)
	}

	pub fn peeksize(&self) -> Option<usize> {
		self.engine.peeksize()
	}

	pub fn waitsnd(&self) -> usize {
		self.engine.waitsnd()
	}

	pub fn is_dead(&self) -> bool {
		self.engine.is_dead()
	}

	pub fn conv(&self) -> u32 {
		self.engine.conv()
	}

	/// Hands one arriving datagram to the session: strips and resolves the FEC shard first (if
	/// configured), then feeds any recovered or pass-through payloads to the ARQ engine.
	pub fn input(&mut self, data: &[u8], now_ms: u32) -> Result {
		let Some(fec) = &mut self.fec else {
			return self.engine.input(data);
		};

		let pkt = fec::Packet::decode(Bytes::copy_from_slice(data), now_ms)?;
		let is_data = pkt.flag == fec::FLAG_DATA;
		let raw = pkt.raw.clone();

		for payload in fec.input(pkt)? {
			self.engine.input(&payload)?;
		}

		if is_data {
			if let Some(payload) = strip_data_shard(&raw) {
				self.engine.input(&payload)?;
			}
		}

		Ok(())
	}

	pub fn update(&mut self, now_ms: u32) -> Result {
		self.engine.update(now_ms);
		self.drain(now_ms);
		Ok(())
	}

	pub fn check(&self, now_ms: u32) -> u32 {
		self.engine.check(now_ms)
	}

	pub fn set_mtu(&mut self, mtu: u32) -> Result {
		self.engine.set_mtu(mtu)
	}

	pub fn set_interval(&mut self, interval: u32) {
		self.engine.set_interval(interval);
	}

	pub fn set_nodelay(&mut self, nodelay: bool, interval: Option<u32>, fastresend: u32, nocwnd: bool) {
		self.engine.set_nodelay(nodelay, interval, fastresend, nocwnd);
	}

	pub fn set_wndsize(&mut self, snd: u16, rcv: u16) {
		self.engine.set_wndsize(snd, rcv);
	}

	/// Drains whatever the engine flushed this tick, marking and forwarding through FEC (if
	/// configured) or straight to `output`.
	fn drain(&mut self, now_ms: u32) {
		let _ = now_ms;

		while let Some(dgram) = self.raw_out.borrow_mut().pop_front() {
			match &mut self.fec {
				None => (self.output)(&dgram),
				Some(fec) => {
					let marked = fec.mark_data(&dgram);
					(self.output)(&marked);
					self.fec_group.push(marked.to_vec());

					if self.fec_group.len() == fec.data_shards() {
						flush_fec_group(fec, &mut self.fec_group, &mut self.output);
					}
				}
			}
		}
	}
}

fn flush_fec_group(fec: &mut Fec, group: &mut Vec<Vec<u8>>, output: &mut impl FnMut(&[u8])) {
	let total = fec.data_shards() + fec.parity_shards();
	let mut shards = std::mem::take(group);

	shards.resize_with(total, Vec::new);

	if fec.encode(&mut shards).is_err() {
		return;
	}

	for parity in &shards[fec.data_shards()..] {
		let marked = fec.mark_fec(parity);
		output(&marked);
	}
}

/// Recovers the ARQ datagram carried by a DATA shard that arrived intact (no FEC loss to repair).
fn strip_data_shard(raw: &Bytes) -> Option<Bytes> {
	if raw.len() < fec::HEADER_SIZE + 2 {
		return None;
	}

	let lenfield = u16::from_le_bytes([raw[fec::HEADER_SIZE], raw[fec::HEADER_SIZE + 1]]) as usize;
	let payload_len = lenfield.checked_sub(2)?;

	if raw.len() < fec::HEADER_SIZE + 2 + payload_len || payload_len < HEADER_SIZE {
		return None;
	}

	Some(raw.slice(fec::HEADER_SIZE + 2..fec::HEADER_SIZE + 2 + payload_len))
}

/// Extracts the `conv` field from a raw inbound datagram, looking past any FEC header first.
pub fn get_conv(data: &[u8], fec_enabled: bool) -> Option<u32> {
	if !fec_enabled {
		return engine::get_conv(data);
	}

	let payload = strip_data_shard(&Bytes::copy_from_slice(data))?;
	engine::get_conv(&payload)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell as StdRefCell;

	fn session(conv: u32, fec: Option<FecConfig>) -> (Session<impl FnMut(&[u8])>, Rc<StdRefCell<Vec<Vec<u8>>>>) {
		let out = Rc::new(StdRefCell::new(Vec::new()));
		let out2 = out.clone();
		let config = Config { conv, nodelay: true, nocwnd: true, interval: 10, fec, ..Config::default() };
		let sess = Session::new(config, move |buf: &[u8]| out2.borrow_mut().push(buf.to_vec())).unwrap();
		(sess, out)
	}

	#[test]
	fn plain_round_trip_without_fec() {
		let (mut a, a_out) = session(1, None);
		let (mut b, _b_out) = session(1, None);

		a.send(b"hello").unwrap();
		a.update(0).unwrap();

		for dgram in a_out.borrow_mut().drain(..) {
			b.input(&dgram, 0).unwrap();
		}

		let mut buf = [0u8; 64];
		let n = b.recv(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"hello");
	}

	#[test]
	fn round_trip_survives_a_dropped_datagram_under_fec() {
		let fec_cfg = FecConfig { data_shards: 3, parity_shards: 1, rxlimit: 32 };
		let (mut a, a_out) = session(2, Some(fec_cfg));
		let (mut b, _b_out) = session(2, Some(fec_cfg));

		for i in 0..3 {
			a.send(format!("msg{i}").as_bytes()).unwrap();
			a.update(0).unwrap();
		}

		let dgrams: Vec<_> = a_out.borrow_mut().drain(..).collect();
		// Expect 3 data shards plus 1 parity shard.
		assert_eq!(dgrams.len(), 4);

		// Drop the second data shard ("msg1"); deliver the rest.
		for (i, dgram) in dgrams.iter().enumerate() {
			if i == 1 {
				continue;
			}

			b.input(dgram, 0).unwrap();
		}

		let mut buf = [0u8; 64];
		let mut received = Vec::new();

		while let Ok(n) = b.recv(&mut buf) {
			received.push(String::from_utf8_lossy(&buf[..n]).into_owned());
		}

		assert_eq!(received.len(), 3);
		assert!(received.contains(&"msg0".to_string()));
		assert!(received.contains(&"msg1".to_string()));
		assert!(received.contains(&"msg2".to_string()));
	}
}
