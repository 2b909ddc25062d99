//! Blocking collective reductions for a fixed group of cooperating ranks.
//!
//! The [`Collective`] trait is the only thing the rest of the system depends on. Two
//! transports implement it: [`LocalGroup`] for ranks living as threads of one process and
//! [`TcpCollective`] for ranks living in separate processes, framed with the length prefixed
//! [`OnoSender`] / [`OnoReceiver`] protocol.

mod codec;
mod collective;
mod error;
mod frame;
mod local;
pub mod msg;
mod tcp;

pub use codec::{Align8, Deserialize, Serialize};
pub use collective::{Collective, ReduceOp};
pub use error::{CommErr, Result};
pub use frame::{MAX_FRAME_LEN, OnoReceiver, OnoSender, channel};
pub use local::LocalGroup;
pub use tcp::{PendingRoot, TcpCollective};
