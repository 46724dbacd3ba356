//! GSIM Core Runtime Library
//!
//! Shared runtime pieces of the simulator: the process-wide statistics
//! registry, the datagram transport abstraction, and the logical
//! retransmission timer that implements the T3/N3 policy.

pub mod retrans;
pub mod stats;
pub mod transport;

pub use retrans::{RetransAction, RetransState, RetransTimer};
pub use stats::{MsgCounters, StatsRegistry, StatsSnapshot};
pub use transport::{ChannelTransport, Transport, TransportError, UdpTransport};
