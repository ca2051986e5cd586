//! Codec for encoding and decoding Z21 LAN frames.
//!
//! Frame format:
//! ```text
//! +--------+---------+------------------+-------+
//! | Length | Command |     Payload      | XOR   |
//! | u16 LE | u16 LE  |    (variable)    | (opt) |
//! +--------+---------+------------------+-------+
//! | 2 bytes| 2 bytes |                  | 1 byte|
//! ```
//!
//! `Length` counts every byte of the frame, the checksum included. Only
//! X-Bus frames (`0x40`) carry the checksum, which is the XOR of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::broadcast::SubscriptionSet;
use crate::error::ProtocolError;
use crate::types::*;

/// XOR of all bytes in `payload`.
pub fn xor_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode a frame with length, command id, payload and optional checksum.
pub fn encode_frame(
    command: LanCommand,
    payload: &[u8],
    with_checksum: bool,
) -> Result<Bytes, ProtocolError> {
    let total = HEADER_SIZE + payload.len() + usize::from(with_checksum);
    if total > u16::MAX as usize {
        return Err(ProtocolError::FrameTooLarge(total));
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.put_u16_le(total as u16);
    frame.put_u16_le(command.into());
    frame.put_slice(payload);
    if with_checksum {
        frame.put_u8(xor_checksum(payload));
    }

    Ok(frame.freeze())
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length as declared by the sender.
    pub length: u16,
    /// Raw command id; may not be a known [`LanCommand`].
    pub command: u16,
}

/// A frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// Bytes after the header, up to the declared length. Includes the
    /// checksum byte on X-Bus frames.
    pub payload: &'a [u8],
}

/// Decode a single frame. The checksum is not verified.
pub fn decode_frame(buf: &[u8]) -> Result<Frame<'_>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Err(ProtocolError::short(HEADER_SIZE, buf.len()));
    }

    let length = u16::from_le_bytes([buf[0], buf[1]]);
    let command = u16::from_le_bytes([buf[2], buf[3]]);
    let end = (length as usize).clamp(HEADER_SIZE, buf.len());

    Ok(Frame {
        header: FrameHeader { length, command },
        payload: &buf[HEADER_SIZE..end],
    })
}

/// Iterator over the frames packed into one datagram.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    rest: &'a [u8],
}

/// Split a datagram into frames.
///
/// Iteration stops at the end of the buffer or at a declared length shorter
/// than a header. A final frame declaring more bytes than remain is yielded
/// truncated.
pub fn frames(datagram: &[u8]) -> Frames<'_> {
    Frames { rest: datagram }
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.len() < HEADER_SIZE {
            return None;
        }
        let declared = u16::from_le_bytes([self.rest[0], self.rest[1]]) as usize;
        if declared < HEADER_SIZE {
            self.rest = &[];
            return None;
        }
        let (frame, rest) = self.rest.split_at(declared.min(self.rest.len()));
        self.rest = rest;
        Some(frame)
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::short(needed, buf.len()));
    }
    Ok(())
}

/// Decode a client request from its command id and payload.
pub fn decode_request(command: u16, mut payload: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let Ok(command) = LanCommand::try_from(command) else {
        return Ok(ClientRequest::Unknown(command));
    };

    let request = match command {
        LanCommand::GetSerialNumber => ClientRequest::GetSerialNumber,
        LanCommand::GetHardwareInfo => ClientRequest::GetHardwareInfo,
        LanCommand::GetCode => ClientRequest::GetCode,
        LanCommand::Logoff => ClientRequest::Logoff,
        LanCommand::XBus => ClientRequest::XBus(decode_x_request(payload)?),
        LanCommand::SetBroadcastFlags => {
            ensure(payload, 4)?;
            ClientRequest::SetBroadcastFlags(SubscriptionSet::from_wire(payload.get_u32_le()))
        }
        LanCommand::GetBroadcastFlags => ClientRequest::GetBroadcastFlags,
        LanCommand::GetLocoMode => {
            ensure(payload, 2)?;
            ClientRequest::GetLocoMode { address: payload.get_u16() }
        }
        LanCommand::SetLocoMode => ClientRequest::SetLocoMode,
        LanCommand::GetTurnoutMode => {
            ensure(payload, 2)?;
            ClientRequest::GetTurnoutMode { address: payload.get_u16() }
        }
        LanCommand::SetTurnoutMode => ClientRequest::SetTurnoutMode,
        LanCommand::RBusGetData => {
            ensure(payload, 1)?;
            ClientRequest::RBusGetData { group: payload.get_u8() }
        }
        LanCommand::RBusProgramModule => ClientRequest::RBusProgramModule,
        LanCommand::SystemStateGetData => ClientRequest::SystemStateGetData,
        LanCommand::RailComGetData => {
            ensure(payload, 1)?;
            let kind = payload.get_u8();
            let address = if kind == 0x01 {
                ensure(payload, 2)?;
                payload.get_u16_le()
            } else {
                0
            };
            ClientRequest::RailComGetData { kind, address }
        }
        LanCommand::LocoNetFromLan => {
            if payload.len() > MAX_LOCONET_TUNNEL {
                return Err(ProtocolError::TunnelTooLarge {
                    len: payload.len(),
                    max: MAX_LOCONET_TUNNEL,
                });
            }
            ClientRequest::LocoNetFromLan { data: payload.to_vec() }
        }
        LanCommand::LocoNetDispatchAddr => {
            ensure(payload, 2)?;
            ClientRequest::LocoNetDispatchAddr { address: payload.get_u16_le() }
        }
        LanCommand::LocoNetDetector => {
            ensure(payload, 3)?;
            let kind = payload.get_u8();
            ClientRequest::LocoNetDetector { kind, address: payload.get_u16_le() }
        }
        LanCommand::CanDetector => {
            ensure(payload, 3)?;
            let kind = payload.get_u8();
            ClientRequest::CanDetector { kind, id: payload.get_u16_le() }
        }
        LanCommand::ReadStationConfig => ClientRequest::ReadStationConfig,
        LanCommand::WriteStationConfig => {
            ensure(payload, 10)?;
            let mut record = [0u8; 10];
            payload.copy_to_slice(&mut record);
            ClientRequest::WriteStationConfig(record)
        }
        LanCommand::ReadTrackConfig => ClientRequest::ReadTrackConfig,
        LanCommand::WriteTrackConfig => {
            ensure(payload, 16)?;
            let mut record = [0u8; 16];
            payload.copy_to_slice(&mut record);
            ClientRequest::WriteTrackConfig(record)
        }
        // Station-to-client ids are not valid requests.
        LanCommand::RBusDataChanged
        | LanCommand::SystemStateDataChanged
        | LanCommand::RailComDataChanged
        | LanCommand::LocoNetRx
        | LanCommand::LocoNetTx => ClientRequest::Unknown(command.into()),
    };

    Ok(request)
}

/// Loco address from `DB1`/`DB2` of a loco command (14 bits).
fn loco_address(hi: u8, lo: u8) -> u16 {
    (u16::from(hi & 0x3F) << 8) | u16::from(lo)
}

/// Decode the payload of an X-Bus frame (header byte first).
pub fn decode_x_request(payload: &[u8]) -> Result<XRequest, ProtocolError> {
    ensure(payload, 1)?;
    let header = payload[0];
    let db = |i: usize| -> Result<u8, ProtocolError> {
        ensure(payload, i + 2)?;
        Ok(payload[i + 1])
    };

    let request = match header {
        x_header::GET_SETTING => match db(0)? {
            0x21 => XRequest::GetVersion,
            0x24 => XRequest::GetStatus,
            0x80 => XRequest::SetTrackPowerOff,
            0x81 => XRequest::SetTrackPowerOn,
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::DCC_READ_REGISTER => match db(0)? {
            // WLANmaus CV read, CV numbered from 1
            0x15 => XRequest::CvRead { cv: u16::from(db(1)?.wrapping_sub(1)) },
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::CV_READ => match db(0)? {
            0x11 => XRequest::CvRead {
                cv: u16::from_be_bytes([db(1)?, db(2)?]),
            },
            // WLANmaus CV write
            0x16 => XRequest::CvWrite {
                cv: u16::from(db(1)?.wrapping_sub(1)),
                value: db(2)?,
            },
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::CV_WRITE => match db(0)? {
            0x12 => XRequest::CvWrite {
                cv: u16::from_be_bytes([db(1)?, db(2)?]),
                value: db(3)?,
            },
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::CV_POM => {
            let db0 = db(0)?;
            let (target, mask) = match db0 {
                0x30 => (PomTarget::Loco, 0x3F),
                0x31 => (PomTarget::Accessory, 0x1F),
                other => return Ok(XRequest::Ignored { header, db0: Some(other) }),
            };
            let address = (u16::from(db(1)? & mask) << 8) | u16::from(db(2)?);
            let option = db(3)?;
            let cv = (u16::from(option & 0x03) << 8) | u16::from(db(4)?);
            let operation = match option & 0xFC {
                0xEC => PomOperation::WriteByte(db(5)?),
                0xE8 => PomOperation::WriteBit(db(5)?),
                0xE4 => PomOperation::ReadByte,
                _ => return Ok(XRequest::Ignored { header, db0: Some(db0) }),
            };
            XRequest::CvPom { target, address, cv, operation }
        }
        x_header::SET_TURNOUT => {
            let address = u16::from_be_bytes([db(0)?, db(1)?]);
            let flags = db(2)?;
            XRequest::SetTurnout {
                address,
                output: flags & 0x01 != 0,
                activate: flags & 0x08 != 0,
            }
        }
        x_header::GET_TURNOUT_INFO => XRequest::GetTurnoutInfo {
            address: u16::from_be_bytes([db(0)?, db(1)?]),
        },
        x_header::SET_EXT_ACCESSORY => XRequest::SetExtAccessory {
            address: u16::from_be_bytes([db(0)?, db(1)?]),
            state: db(2)?,
        },
        x_header::GET_EXT_ACCESSORY_INFO => XRequest::GetExtAccessoryInfo {
            address: u16::from_be_bytes([db(0)?, db(1)?]),
        },
        x_header::SET_STOP => XRequest::SetStop,
        x_header::GET_LOCO_INFO => match db(0)? {
            0xF0 => XRequest::GetLocoInfo {
                address: loco_address(db(1)?, db(2)?),
            },
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::SET_LOCO => {
            let db0 = db(0)?;
            let address = loco_address(db(1)?, db(2)?);
            if db0 & 0xF0 == 0x10 {
                XRequest::SetLocoDrive {
                    address,
                    steps: SpeedSteps::from_drive_db0(db0),
                    speed: db(3)?,
                }
            } else if db0 == 0xF8 {
                let db3 = db(3)?;
                XRequest::SetLocoFunction {
                    address,
                    switch: FunctionSwitch::from_bits(db3 >> 6),
                    function: db3 & 0x3F,
                }
            } else if let Some(group) = FunctionGroup::from_db0(db0) {
                XRequest::SetLocoFunctionGroup {
                    address,
                    group,
                    bits: db(3)? & group.mask(),
                }
            } else {
                XRequest::SetLoco { address }
            }
        }
        x_header::SET_LOCO_BINARY_STATE => match db(0)? {
            0x5F => XRequest::SetLocoBinaryState {
                address: loco_address(db(1)?, db(2)?),
                low: db(3)?,
                high: db(4)?,
            },
            other => XRequest::Ignored { header, db0: Some(other) },
        },
        x_header::GET_FIRMWARE_VERSION => XRequest::GetFirmwareVersion,
        x_header::WLANMAUS_POLL => XRequest::WlanMausPoll,
        _ => XRequest::Unknown { header },
    };

    Ok(request)
}

fn check_tunnel(data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_LOCONET_TUNNEL {
        return Err(ProtocolError::TunnelTooLarge {
            len: data.len(),
            max: MAX_LOCONET_TUNNEL,
        });
    }
    Ok(())
}

/// Encode a station message into a complete frame.
pub fn encode_station_message(msg: &StationMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        StationMessage::SerialNumber(serial) => {
            payload.put_u32_le(*serial);
        }
        StationMessage::HardwareInfo { hardware_type, firmware_version } => {
            payload.put_u32_le(*hardware_type);
            payload.put_u32_le(*firmware_version);
        }
        StationMessage::Code(code) => {
            payload.put_u8(*code);
        }
        StationMessage::BroadcastFlags(set) => {
            payload.put_u32_le(set.to_wire());
        }
        StationMessage::LocoMode { address, mode }
        | StationMessage::TurnoutMode { address, mode } => {
            payload.put_u16(*address);
            payload.put_u8(*mode);
        }
        StationMessage::StationConfig(record) => {
            payload.put_slice(record);
        }
        StationMessage::TrackConfig(record) => {
            payload.put_slice(record);
        }
        StationMessage::RBusData { group, feedback } => {
            payload.put_u8(*group);
            payload.put_slice(feedback);
        }
        StationMessage::SystemState(state) => {
            payload.put_u16_le(state.main_current);
            payload.put_u16_le(state.prog_current);
            payload.put_u16_le(state.filtered_main_current);
            payload.put_u16_le(state.temperature);
            payload.put_u16_le(state.supply_voltage);
            payload.put_u16_le(state.vcc_voltage);
            payload.put_u8(state.central_state);
            payload.put_u8(state.central_state_ex);
            payload.put_u8(0x00); // reserved
            payload.put_u8(state.capabilities);
        }
        StationMessage::RailComData { address, receive_counter, error_counter } => {
            payload.put_u16(*address);
            payload.put_u32_le(*receive_counter);
            payload.put_u32_le(*error_counter);
        }
        StationMessage::LocoNetRx(data)
        | StationMessage::LocoNetTx(data)
        | StationMessage::LocoNetFromLan(data) => {
            check_tunnel(data)?;
            payload.put_slice(data);
        }
        StationMessage::LocoNetDispatch { address, slot } => {
            payload.put_u16_le(*address);
            payload.put_u8(*slot);
        }
        StationMessage::LocoNetDetector(data) => {
            payload.put_slice(data);
        }
        StationMessage::CanDetector { network_id, address, port, kind, value1, value2 } => {
            payload.put_u16_le(*network_id);
            payload.put_u16_le(*address);
            payload.put_u8(*port);
            payload.put_u8(*kind);
            payload.put_u16_le(*value1);
            payload.put_u16_le(*value2);
        }
        StationMessage::XVersion => {
            payload.put_slice(&[x_header::GET_VERSION, 0x21, XBUS_VERSION, STATION_ID]);
        }
        StationMessage::XStatus(power) => {
            payload.put_slice(&[x_header::STATUS_CHANGED, 0x22, power.code()]);
        }
        StationMessage::TrackPower(power) => {
            payload.put_slice(&power.broadcast_bytes());
        }
        StationMessage::XFirmwareVersion => {
            payload.put_slice(&[
                x_header::FIRMWARE_VERSION,
                0x0A,
                FIRMWARE_VERSION_MAJOR,
                FIRMWARE_VERSION_MINOR,
            ]);
        }
        StationMessage::LocoInfo { address, state, busy } => {
            let busy_bit = if *busy { 0x08 } else { 0x00 };
            payload.put_u8(x_header::LOCO_INFO);
            payload.put_u8(((address >> 8) & 0x3F) as u8);
            payload.put_u8((address & 0xFF) as u8);
            payload.put_u8(state.steps.loco_info_code() | busy_bit);
            payload.put_u8(state.speed);
            payload.put_u8(state.functions[0] & 0x1F);
            payload.put_u8(state.functions[1]);
            payload.put_u8(state.functions[2]);
            payload.put_u8(state.functions[3]);
            payload.put_u8(state.functions[0] >> 7);
        }
        StationMessage::TurnoutInfo { address, active } => {
            payload.put_u8(x_header::GET_TURNOUT_INFO);
            payload.put_u16(*address);
            payload.put_u8(if *active { 0x02 } else { 0x01 });
        }
        StationMessage::ExtAccessoryInfo { address, state, valid } => {
            payload.put_u8(x_header::GET_EXT_ACCESSORY_INFO);
            payload.put_u16(*address);
            payload.put_u8(*state);
            payload.put_u8(if *valid { 0x00 } else { 0xFF });
        }
        StationMessage::CvResult { cv, value } => {
            payload.put_slice(&[x_header::CV_RESULT, 0x14]);
            payload.put_u16(*cv);
            payload.put_u8(*value);
        }
        StationMessage::PomResult { cv, value } => {
            payload.put_slice(&[x_header::CV_RESULT, 0x14]);
            payload.put_u16(cv & 0x3FFF);
            payload.put_u8(*value);
        }
        StationMessage::CvNack => {
            payload.put_slice(&[x_header::CV_NACK, 0x13]);
        }
        StationMessage::CvNackShortCircuit => {
            payload.put_slice(&[x_header::CV_NACK, 0x12]);
        }
        StationMessage::UnknownCommand => {
            payload.put_slice(&[x_header::UNKNOWN_COMMAND, 0x82]);
        }
    }

    encode_frame(msg.command(), &payload, msg.has_checksum())
}
