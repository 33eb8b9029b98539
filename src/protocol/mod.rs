//! WebSocket wire-format building blocks: opcodes, masking, frames, and the
//! HTTP upgrade handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    HandshakeRequest, WS_GUID, build_accept_response, build_reject_response, compute_accept_key,
};
pub use mask::apply_mask;
pub use opcode::OpCode;
