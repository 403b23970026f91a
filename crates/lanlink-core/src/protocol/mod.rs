//! Protocol module containing packet types, the binary codec, frame
//! reassembly, and transfer-id allocation.

pub mod codec;
pub mod frame_buffer;
pub mod messages;
pub mod transfer_id;

pub use codec::{decode_packet, encode_packet, PacketHeader, ProtocolError};
pub use frame_buffer::FrameBuffer;
pub use messages::*;
pub use transfer_id::TransferIdAllocator;
