pub mod engine;
pub mod error;
pub mod fec;
pub mod segment;
pub mod session;

pub use engine::{get_conv, ArqEngine};
pub use error::{Error, Result};
pub use fec::Fec;
pub use session::{Config, FecConfig, Session};
