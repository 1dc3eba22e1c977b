// kvpb-common - Shared protocol definitions for the KVPB client
//
// This crate defines the opcodes, the message seam and the frame codec.
// Nothing in here touches a socket.

pub mod error;
pub mod frame;
pub mod message;
pub mod messages;
pub mod opcode;

// Re-export for convenience
pub use error::*;
pub use frame::*;
pub use message::*;
pub use messages::*;
pub use opcode::*;
