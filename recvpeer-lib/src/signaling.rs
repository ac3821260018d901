pub mod channel;
pub mod codec;

pub use self::{
    channel::{ConnectError, SendError, SignalingChannel},
    codec::{decode, encode, DecodeError, SdpType, SessionDescription, WireEnvelope},
};
