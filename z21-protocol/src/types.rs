//! Message type definitions for the Z21 LAN protocol.

use serde::{Deserialize, Serialize};

use crate::broadcast::SubscriptionSet;

/// UDP port command stations listen on.
pub const Z21_PORT: u16 = 21105;

/// Firmware version reported to clients (1.42).
pub const FIRMWARE_VERSION_MAJOR: u8 = 0x01;
pub const FIRMWARE_VERSION_MINOR: u8 = 0x42;

/// Hardware type reported by `LAN_GET_HWINFO` ("Z21 XL Series").
pub const HARDWARE_TYPE: u32 = 0x0000_0211;

/// X-Bus protocol version and command station id for `LAN_X_GET_VERSION`.
pub const XBUS_VERSION: u8 = 0x30;
pub const STATION_ID: u8 = 0x12;

/// Maximum LocoNet tunnel payload relayed in either direction.
pub const MAX_LOCONET_TUNNEL: usize = 20;

/// Frame header size: 2 (length) + 2 (command id).
pub const HEADER_SIZE: usize = 4;

/// Top-level command identifiers (the 16-bit header field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LanCommand {
    // Identity (0x1x)
    /// Serial number request/response.
    GetSerialNumber = 0x0010,
    /// Read the station settings record.
    ReadStationConfig = 0x0012,
    /// Write the station settings record.
    WriteStationConfig = 0x0013,
    /// Read the track settings record.
    ReadTrackConfig = 0x0016,
    /// Write the track settings record.
    WriteTrackConfig = 0x0017,
    /// Feature lock code.
    GetCode = 0x0018,
    /// Hardware type and firmware version.
    GetHardwareInfo = 0x001A,

    // Session (0x3x, 0x5x)
    /// Client leaves.
    Logoff = 0x0030,
    /// X-Bus tunnel, sub-opcode in payload byte 0.
    XBus = 0x0040,
    /// Set broadcast subscriptions.
    SetBroadcastFlags = 0x0050,
    /// Get broadcast subscriptions.
    GetBroadcastFlags = 0x0051,

    // Output format (0x6x, 0x7x)
    GetLocoMode = 0x0060,
    SetLocoMode = 0x0061,
    GetTurnoutMode = 0x0070,
    SetTurnoutMode = 0x0071,

    // Feedback (0x8x)
    /// R-Bus feedback changed (station to client).
    RBusDataChanged = 0x0080,
    /// R-Bus feedback request for a group.
    RBusGetData = 0x0081,
    /// R-Bus module programming.
    RBusProgramModule = 0x0082,
    /// System state (station to client).
    SystemStateDataChanged = 0x0084,
    /// System state request.
    SystemStateGetData = 0x0085,
    /// RailCom data (station to client).
    RailComDataChanged = 0x0088,
    /// RailCom data request.
    RailComGetData = 0x0089,

    // LocoNet (0xAx)
    /// Message received from LocoNet.
    LocoNetRx = 0x00A0,
    /// Message sent to LocoNet by the station.
    LocoNetTx = 0x00A1,
    /// Message from a LAN client to LocoNet.
    LocoNetFromLan = 0x00A2,
    /// Dispatch a loco address to a LocoNet slot.
    LocoNetDispatchAddr = 0x00A3,
    /// LocoNet occupancy detector.
    LocoNetDetector = 0x00A4,

    // CAN (0xCx)
    /// CAN occupancy detector.
    CanDetector = 0x00C4,
}

impl TryFrom<u16> for LanCommand {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0010 => Ok(LanCommand::GetSerialNumber),
            0x0012 => Ok(LanCommand::ReadStationConfig),
            0x0013 => Ok(LanCommand::WriteStationConfig),
            0x0016 => Ok(LanCommand::ReadTrackConfig),
            0x0017 => Ok(LanCommand::WriteTrackConfig),
            0x0018 => Ok(LanCommand::GetCode),
            0x001A => Ok(LanCommand::GetHardwareInfo),
            0x0030 => Ok(LanCommand::Logoff),
            0x0040 => Ok(LanCommand::XBus),
            0x0050 => Ok(LanCommand::SetBroadcastFlags),
            0x0051 => Ok(LanCommand::GetBroadcastFlags),
            0x0060 => Ok(LanCommand::GetLocoMode),
            0x0061 => Ok(LanCommand::SetLocoMode),
            0x0070 => Ok(LanCommand::GetTurnoutMode),
            0x0071 => Ok(LanCommand::SetTurnoutMode),
            0x0080 => Ok(LanCommand::RBusDataChanged),
            0x0081 => Ok(LanCommand::RBusGetData),
            0x0082 => Ok(LanCommand::RBusProgramModule),
            0x0084 => Ok(LanCommand::SystemStateDataChanged),
            0x0085 => Ok(LanCommand::SystemStateGetData),
            0x0088 => Ok(LanCommand::RailComDataChanged),
            0x0089 => Ok(LanCommand::RailComGetData),
            0x00A0 => Ok(LanCommand::LocoNetRx),
            0x00A1 => Ok(LanCommand::LocoNetTx),
            0x00A2 => Ok(LanCommand::LocoNetFromLan),
            0x00A3 => Ok(LanCommand::LocoNetDispatchAddr),
            0x00A4 => Ok(LanCommand::LocoNetDetector),
            0x00C4 => Ok(LanCommand::CanDetector),
            _ => Err(value),
        }
    }
}

impl From<LanCommand> for u16 {
    fn from(value: LanCommand) -> Self {
        value as u16
    }
}

/// X-Bus header bytes (payload byte 0 of a [`LanCommand::XBus`] frame).
pub mod x_header {
    pub const GET_SETTING: u8 = 0x21;
    pub const DCC_READ_REGISTER: u8 = 0x22;
    pub const CV_READ: u8 = 0x23;
    pub const CV_WRITE: u8 = 0x24;
    pub const GET_TURNOUT_INFO: u8 = 0x43;
    pub const GET_EXT_ACCESSORY_INFO: u8 = 0x44;
    pub const SET_TURNOUT: u8 = 0x53;
    pub const SET_EXT_ACCESSORY: u8 = 0x54;
    pub const BC_TRACK_POWER: u8 = 0x61;
    pub const UNKNOWN_COMMAND: u8 = 0x61;
    pub const CV_NACK: u8 = 0x61;
    pub const STATUS_CHANGED: u8 = 0x62;
    pub const GET_VERSION: u8 = 0x63;
    pub const CV_RESULT: u8 = 0x64;
    pub const WLANMAUS_POLL: u8 = 0x73;
    pub const SET_STOP: u8 = 0x80;
    pub const BC_STOPPED: u8 = 0x81;
    pub const GET_LOCO_INFO: u8 = 0xE3;
    pub const SET_LOCO: u8 = 0xE4;
    pub const SET_LOCO_BINARY_STATE: u8 = 0xE5;
    pub const CV_POM: u8 = 0xE6;
    pub const LOCO_INFO: u8 = 0xEF;
    pub const GET_FIRMWARE_VERSION: u8 = 0xF1;
    pub const FIRMWARE_VERSION: u8 = 0xF3;
}

/// Track power state of the command station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Normal operation, track powered.
    Normal,
    /// Emergency stop: track powered, all locos halted.
    EmergencyStop,
    /// Track voltage switched off.
    TrackVoltageOff,
    /// Short circuit detected.
    ShortCircuit,
    /// Programming (service mode) active.
    ServiceMode,
}

impl PowerState {
    /// Central state bitmask as reported by `LAN_X_STATUS_CHANGED`.
    pub fn code(self) -> u8 {
        match self {
            PowerState::Normal => 0x00,
            PowerState::EmergencyStop => 0x01,
            PowerState::TrackVoltageOff => 0x02,
            PowerState::ShortCircuit => 0x04,
            PowerState::ServiceMode => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(PowerState::Normal),
            0x01 => Some(PowerState::EmergencyStop),
            0x02 => Some(PowerState::TrackVoltageOff),
            0x04 => Some(PowerState::ShortCircuit),
            0x08 => Some(PowerState::ServiceMode),
            _ => None,
        }
    }

    /// `CentralState` byte of the system state record.
    pub fn central_state(self) -> u8 {
        match self {
            PowerState::ServiceMode => 0x20,
            other => other.code(),
        }
    }

    /// X-Bus broadcast announcing this state (`[header, DB0]`).
    pub fn broadcast_bytes(self) -> [u8; 2] {
        match self {
            PowerState::Normal => [x_header::BC_TRACK_POWER, 0x01],
            PowerState::TrackVoltageOff => [x_header::BC_TRACK_POWER, 0x00],
            PowerState::ServiceMode => [x_header::BC_TRACK_POWER, 0x02],
            PowerState::ShortCircuit => [x_header::BC_TRACK_POWER, 0x08],
            PowerState::EmergencyStop => [x_header::BC_STOPPED, 0x00],
        }
    }
}

/// DCC speed-step mode of a locomotive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedSteps {
    Dcc14,
    Dcc28,
    #[default]
    Dcc128,
}

impl SpeedSteps {
    /// Number of speed steps.
    pub fn steps(self) -> u8 {
        match self {
            SpeedSteps::Dcc14 => 14,
            SpeedSteps::Dcc28 => 28,
            SpeedSteps::Dcc128 => 128,
        }
    }

    /// Step field of `LAN_X_SET_LOCO_DRIVE` DB0 (`0x1S`).
    pub fn from_drive_db0(db0: u8) -> Self {
        match db0 & 0x0F {
            0x00 => SpeedSteps::Dcc14,
            0x02 => SpeedSteps::Dcc28,
            _ => SpeedSteps::Dcc128,
        }
    }

    /// Step field of `LAN_X_LOCO_INFO` DB2.
    pub fn loco_info_code(self) -> u8 {
        match self {
            SpeedSteps::Dcc14 => 0,
            SpeedSteps::Dcc28 => 2,
            SpeedSteps::Dcc128 => 4,
        }
    }
}

/// How a single-function command changes the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionSwitch {
    Off,
    On,
    Toggle,
    /// Reserved value `0b11`.
    Reserved,
}

impl FunctionSwitch {
    /// Decode the two type bits (`DB3 >> 6`).
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FunctionSwitch::Off,
            1 => FunctionSwitch::On,
            2 => FunctionSwitch::Toggle,
            _ => FunctionSwitch::Reserved,
        }
    }
}

/// Function groups of `LAN_X_SET_LOCO_FUNCTION_GROUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionGroup {
    F0ToF4,
    F5ToF8,
    F9ToF12,
    F13ToF20,
    F21ToF28,
    F29ToF36,
    F37ToF44,
    F45ToF52,
    F53ToF60,
    F61ToF68,
}

impl FunctionGroup {
    /// Group selected by a `LAN_X_SET_LOCO` DB0 byte.
    pub fn from_db0(db0: u8) -> Option<Self> {
        match db0 {
            0x20 => Some(FunctionGroup::F0ToF4),
            0x21 => Some(FunctionGroup::F5ToF8),
            0x22 => Some(FunctionGroup::F9ToF12),
            0x23 => Some(FunctionGroup::F13ToF20),
            0x28 => Some(FunctionGroup::F21ToF28),
            0x29 => Some(FunctionGroup::F29ToF36),
            0x2A => Some(FunctionGroup::F37ToF44),
            0x2B => Some(FunctionGroup::F45ToF52),
            0x50 => Some(FunctionGroup::F53ToF60),
            0x51 => Some(FunctionGroup::F61ToF68),
            _ => None,
        }
    }

    /// Bits of DB3 that carry function state for this group.
    pub fn mask(self) -> u8 {
        match self {
            FunctionGroup::F0ToF4 => 0x1F,
            FunctionGroup::F5ToF8 => 0x0F,
            FunctionGroup::F9ToF12 => 0x1F,
            _ => 0xFF,
        }
    }

    /// Groups above F36 are not echoed back to clients.
    pub fn is_silent(self) -> bool {
        matches!(
            self,
            FunctionGroup::F37ToF44
                | FunctionGroup::F45ToF52
                | FunctionGroup::F53ToF60
                | FunctionGroup::F61ToF68
        )
    }
}

/// Decoder family addressed by a program-on-main command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PomTarget {
    Loco,
    Accessory,
}

/// Program-on-main operation (option bits `DB3 & 0xFC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PomOperation {
    WriteByte(u8),
    WriteBit(u8),
    ReadByte,
}

/// Current state of a locomotive, as reported by the decoder logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocoState {
    pub steps: SpeedSteps,
    /// Direction and speed (`RVVV VVVV`).
    pub speed: u8,
    /// `[F0..F4, F5..F12, F13..F20, F21..F28]`.
    pub functions: [u8; 4],
}

/// Snapshot reported by `LAN_SYSTEMSTATE_DATACHANGED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemState {
    pub main_current: u16,
    pub prog_current: u16,
    pub filtered_main_current: u16,
    pub temperature: u16,
    pub supply_voltage: u16,
    pub vcc_voltage: u16,
    pub central_state: u8,
    pub central_state_ex: u8,
    pub capabilities: u8,
}

/// Capability bits of [`SystemState::capabilities`].
pub mod capability {
    pub const DCC: u8 = 0x01;
    pub const MM: u8 = 0x02;
    pub const RAILCOM: u8 = 0x08;
    pub const LOCO_CMDS: u8 = 0x10;
    pub const ACCESSORY_CMDS: u8 = 0x20;
    pub const DETECTOR_CMDS: u8 = 0x40;
    pub const NEEDS_UNLOCK_CODE: u8 = 0x80;
}

/// Requests sent from a LAN client to the command station.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    GetSerialNumber,
    GetHardwareInfo,
    GetCode,
    Logoff,
    SetBroadcastFlags(SubscriptionSet),
    GetBroadcastFlags,
    /// Output format query; the address bytes are echoed big-endian.
    GetLocoMode { address: u16 },
    SetLocoMode,
    GetTurnoutMode { address: u16 },
    SetTurnoutMode,
    RBusGetData { group: u8 },
    RBusProgramModule,
    SystemStateGetData,
    /// `kind == 0x01` asks for `address`, otherwise the next loco in line.
    RailComGetData { kind: u8, address: u16 },
    LocoNetFromLan { data: Vec<u8> },
    LocoNetDispatchAddr { address: u16 },
    LocoNetDetector { kind: u8, address: u16 },
    CanDetector { kind: u8, id: u16 },
    ReadStationConfig,
    WriteStationConfig([u8; 10]),
    ReadTrackConfig,
    WriteTrackConfig([u8; 16]),
    XBus(XRequest),
    /// Command id this station does not implement.
    Unknown(u16),
}

/// X-Bus requests (`LanCommand::XBus`), keyed by header and DB0.
#[derive(Debug, Clone, PartialEq)]
pub enum XRequest {
    GetVersion,
    GetStatus,
    SetTrackPowerOff,
    SetTrackPowerOn,
    SetStop,
    GetFirmwareVersion,
    CvRead { cv: u16 },
    CvWrite { cv: u16, value: u8 },
    CvPom {
        target: PomTarget,
        address: u16,
        cv: u16,
        operation: PomOperation,
    },
    SetTurnout { address: u16, output: bool, activate: bool },
    GetTurnoutInfo { address: u16 },
    SetExtAccessory { address: u16, state: u8 },
    GetExtAccessoryInfo { address: u16 },
    GetLocoInfo { address: u16 },
    SetLocoDrive { address: u16, steps: SpeedSteps, speed: u8 },
    SetLocoFunction { address: u16, switch: FunctionSwitch, function: u8 },
    SetLocoFunctionGroup { address: u16, group: FunctionGroup, bits: u8 },
    /// `LAN_X_SET_LOCO` with a DB0 this station does not interpret.
    SetLoco { address: u16 },
    SetLocoBinaryState { address: u16, low: u8, high: u8 },
    WlanMausPoll,
    /// Known header whose DB0 is not handled; no reply is sent.
    Ignored { header: u8, db0: Option<u8> },
    /// Header this station does not implement.
    Unknown { header: u8 },
}

/// Messages sent from the command station to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum StationMessage {
    SerialNumber(u32),
    HardwareInfo { hardware_type: u32, firmware_version: u32 },
    Code(u8),
    BroadcastFlags(SubscriptionSet),
    LocoMode { address: u16, mode: u8 },
    TurnoutMode { address: u16, mode: u8 },
    StationConfig([u8; 10]),
    TrackConfig([u8; 16]),
    RBusData { group: u8, feedback: [u8; 10] },
    SystemState(SystemState),
    RailComData { address: u16, receive_counter: u32, error_counter: u32 },
    LocoNetRx(Vec<u8>),
    LocoNetTx(Vec<u8>),
    LocoNetFromLan(Vec<u8>),
    LocoNetDispatch { address: u16, slot: u8 },
    LocoNetDetector(Vec<u8>),
    CanDetector {
        network_id: u16,
        address: u16,
        port: u8,
        kind: u8,
        value1: u16,
        value2: u16,
    },

    // X-Bus replies (with checksum)
    XVersion,
    XStatus(PowerState),
    TrackPower(PowerState),
    XFirmwareVersion,
    LocoInfo { address: u16, state: LocoState, busy: bool },
    TurnoutInfo { address: u16, active: bool },
    ExtAccessoryInfo { address: u16, state: u8, valid: bool },
    CvResult { cv: u16, value: u8 },
    PomResult { cv: u16, value: u8 },
    CvNack,
    CvNackShortCircuit,
    UnknownCommand,
}

impl StationMessage {
    /// Command id of the frame carrying this message.
    pub fn command(&self) -> LanCommand {
        match self {
            StationMessage::SerialNumber(_) => LanCommand::GetSerialNumber,
            StationMessage::HardwareInfo { .. } => LanCommand::GetHardwareInfo,
            StationMessage::Code(_) => LanCommand::GetCode,
            StationMessage::BroadcastFlags(_) => LanCommand::GetBroadcastFlags,
            StationMessage::LocoMode { .. } => LanCommand::GetLocoMode,
            StationMessage::TurnoutMode { .. } => LanCommand::GetTurnoutMode,
            StationMessage::StationConfig(_) => LanCommand::ReadStationConfig,
            StationMessage::TrackConfig(_) => LanCommand::ReadTrackConfig,
            StationMessage::RBusData { .. } => LanCommand::RBusDataChanged,
            StationMessage::SystemState(_) => LanCommand::SystemStateDataChanged,
            StationMessage::RailComData { .. } => LanCommand::RailComDataChanged,
            StationMessage::LocoNetRx(_) => LanCommand::LocoNetRx,
            StationMessage::LocoNetTx(_) => LanCommand::LocoNetTx,
            StationMessage::LocoNetFromLan(_) => LanCommand::LocoNetFromLan,
            StationMessage::LocoNetDispatch { .. } => LanCommand::LocoNetDispatchAddr,
            StationMessage::LocoNetDetector(_) => LanCommand::LocoNetDetector,
            StationMessage::CanDetector { .. } => LanCommand::CanDetector,
            _ => LanCommand::XBus,
        }
    }

    /// X-Bus messages carry a trailing XOR checksum.
    pub fn has_checksum(&self) -> bool {
        self.command() == LanCommand::XBus
    }
}
