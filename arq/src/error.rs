use thiserror::Error;

/// Errors surfaced by [`crate::session::Session`] and the lower-level engine it wraps.
///
/// Mirrors the source's taxonomy of small negative return codes, but as a typed enum so callers
/// can match on failure modes instead of memorizing magic numbers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
	#[error("no complete message is ready")]
	NoData,
	#[error("output buffer too small to hold the next message")]
	BufferTooSmall,
	#[error("datagram shorter than a segment header")]
	ShortPacket,
	#[error("datagram conv {got} does not match session conv {expected}")]
	UnknownConv { expected: u32, got: u32 },
	#[error("unrecognized command byte {0}")]
	BadCommand(u8),
	#[error("send() called with an empty payload")]
	EmptySend,
	#[error("message requires more than 255 fragments")]
	TooManyFragments,
	#[error("mtu must be at least {min} bytes, got {got}")]
	MtuTooSmall { min: u32, got: u32 },
	#[error("FEC shard counts must be nonzero and rxlimit >= k + m")]
	InvalidFecConfig,
	#[error("reed-solomon operation failed: {0}")]
	ReedSolomon(#[from] reed_solomon_erasure::Error),
}

pub type Result<T = (), E = Error> = core::result::Result<T, E>;
