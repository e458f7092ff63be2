//! WebSocket protocol core (RFC 6455): frame codec, reassembly, handshake.

pub mod assembler;
pub mod fragmenter;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::MessageReassembler;
pub use fragmenter::Fragmenter;
pub use frame::{Frame, FrameDecoder, FrameEncoder, MAX_CONTROL_PAYLOAD};
pub use handshake::{
    ClientHandshake, HeaderValidator, Headers, ServerHandshake, UpgradeRequest, WS_GUID,
    compute_accept_key,
};
pub use mask::apply_mask;
pub use opcode::OpCode;
