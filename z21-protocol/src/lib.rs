//! Wire protocol definitions for the Z21 LAN command-station engine.
//!
//! This crate defines the datagram protocol spoken between model-railway
//! command stations and their LAN clients (throttles, apps, WLANmaus).
//!
//! # Frame Format
//!
//! ```text
//! +--------+---------+------------------+-------+
//! | Length | Command |     Payload      | XOR   |
//! | u16 LE | u16 LE  |    (variable)    | (opt) |
//! +--------+---------+------------------+-------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use z21_protocol::{decode_frame, decode_request, encode_station_message};
//! use z21_protocol::{ClientRequest, PowerState, StationMessage, XRequest};
//!
//! // LAN_X_GET_STATUS as sent by a throttle
//! let datagram = [0x07, 0x00, 0x40, 0x00, 0x21, 0x24, 0x05];
//! let frame = decode_frame(&datagram).unwrap();
//! let request = decode_request(frame.header.command, frame.payload).unwrap();
//! assert_eq!(request, ClientRequest::XBus(XRequest::GetStatus));
//!
//! let reply = encode_station_message(&StationMessage::XStatus(PowerState::Normal)).unwrap();
//! assert_eq!(&reply[..], &[0x08, 0x00, 0x40, 0x00, 0x62, 0x22, 0x00, 0x40]);
//! ```
//!
//! # Broadcast Categories
//!
//! Clients choose what they hear about through [`BroadcastCategory`]
//! subscriptions. See [`broadcast`] for the wire and storage encodings.

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod types;

pub use broadcast::{BroadcastCategory, SubscriptionSet, CATEGORY_ENCODINGS};
pub use codec::{
    decode_frame, decode_request, decode_x_request, encode_frame, encode_station_message, frames,
    xor_checksum, Frame, FrameHeader, Frames,
};
pub use error::ProtocolError;
pub use types::{
    capability, x_header, ClientRequest, FunctionGroup, FunctionSwitch, LanCommand, LocoState,
    PomOperation, PomTarget, PowerState, SpeedSteps, StationMessage, SystemState, XRequest,
    FIRMWARE_VERSION_MAJOR, FIRMWARE_VERSION_MINOR, HARDWARE_TYPE, HEADER_SIZE,
    MAX_LOCONET_TUNNEL, STATION_ID, XBUS_VERSION, Z21_PORT,
};
