//! Request handling.

use log::{debug, info, trace, warn};
use z21_protocol::{
    BroadcastCategory, ClientRequest, PomOperation, PowerState, StationMessage, SubscriptionSet,
    XRequest, FIRMWARE_VERSION_MAJOR, FIRMWARE_VERSION_MINOR, HARDWARE_TYPE,
};

use super::{busy, Engine};
use crate::notifier::Notifier;
use crate::session::ClientId;
use crate::store::{
    clamp_track_record, ConfigStore, SERIAL_LSB, SERIAL_MSB, STATION_RECORD, STATION_RECORD_LEN,
    TRACK_RECORD, TRACK_RECORD_LEN,
};

/// Output format reported for every address.
const FORMAT_DCC: u8 = 0x00;

/// Feature lock code: nothing locked.
const CODE_NO_LOCK: u8 = 0x00;

impl<N: Notifier, S: ConfigStore> Engine<N, S> {
    pub(super) fn dispatch(&mut self, client: ClientId, request: ClientRequest) {
        match request {
            ClientRequest::GetSerialNumber => {
                let serial = u32::from_le_bytes([
                    self.store.read(SERIAL_LSB),
                    self.store.read(SERIAL_MSB),
                    0,
                    0,
                ]);
                self.reply(client, &StationMessage::SerialNumber(serial));
            }
            ClientRequest::GetHardwareInfo => {
                let firmware_version =
                    (u32::from(FIRMWARE_VERSION_MAJOR) << 8) | u32::from(FIRMWARE_VERSION_MINOR);
                self.reply(
                    client,
                    &StationMessage::HardwareInfo { hardware_type: HARDWARE_TYPE, firmware_version },
                );
            }
            ClientRequest::GetCode => self.reply(client, &StationMessage::Code(CODE_NO_LOCK)),
            ClientRequest::Logoff => {
                if self.sessions.remove(client).is_some() {
                    info!("[Client {}] Logged off", client);
                }
            }
            ClientRequest::SetBroadcastFlags(subscriptions) => {
                self.set_broadcast_flags(client, subscriptions);
            }
            ClientRequest::GetBroadcastFlags => {
                let subscriptions = self
                    .sessions
                    .get(client)
                    .map(|s| s.subscriptions)
                    .unwrap_or_default();
                self.reply(client, &StationMessage::BroadcastFlags(subscriptions));
            }
            ClientRequest::GetLocoMode { address } => {
                self.reply(client, &StationMessage::LocoMode { address, mode: FORMAT_DCC });
            }
            ClientRequest::GetTurnoutMode { address } => {
                self.reply(client, &StationMessage::TurnoutMode { address, mode: FORMAT_DCC });
            }
            request @ (ClientRequest::SetLocoMode
            | ClientRequest::SetTurnoutMode
            | ClientRequest::RBusProgramModule) => {
                trace!("[Client {}] Accepted {:?} without reply", client, request);
            }
            ClientRequest::RBusGetData { group } => self.notifier.s88_data_requested(group),
            ClientRequest::SystemStateGetData => self.notifier.system_info_requested(client),
            ClientRequest::RailComGetData { kind: _, address } => {
                let address = self.notifier.railcom_address_query().unwrap_or(address);
                self.reply(
                    client,
                    &StationMessage::RailComData { address, receive_counter: 0, error_counter: 0 },
                );
            }
            ClientRequest::LocoNetFromLan { data } => {
                self.notifier.loconet_send_packet(&data);
                self.send(
                    client,
                    &StationMessage::LocoNetFromLan(data),
                    Some(BroadcastCategory::LocoNet),
                );
            }
            ClientRequest::LocoNetDispatchAddr { address } => {
                if let Some(slot) = self.notifier.loconet_dispatch(address) {
                    debug!("[Client {}] Dispatched loco {} to slot {}", client, address, slot);
                    self.reply(client, &StationMessage::LocoNetDispatch { address, slot });
                }
            }
            ClientRequest::LocoNetDetector { kind, address } => {
                self.notifier.loconet_detector_query(client, kind, address);
            }
            ClientRequest::CanDetector { kind, id } => {
                self.notifier.can_detector_query(client, kind, id);
            }
            ClientRequest::ReadStationConfig => {
                let mut record = [0u8; STATION_RECORD_LEN];
                self.store.read_into(STATION_RECORD, &mut record);
                self.reply(client, &StationMessage::StationConfig(record));
            }
            ClientRequest::WriteStationConfig(record) => {
                self.write_record(client, STATION_RECORD, &record);
            }
            ClientRequest::ReadTrackConfig => {
                let mut record = [0u8; TRACK_RECORD_LEN];
                self.store.read_into(TRACK_RECORD, &mut record);
                clamp_track_record(&mut record);
                self.reply(client, &StationMessage::TrackConfig(record));
            }
            ClientRequest::WriteTrackConfig(record) => {
                self.write_record(client, TRACK_RECORD, &record);
            }
            ClientRequest::XBus(request) => self.dispatch_x(client, request),
            ClientRequest::Unknown(command) => {
                debug!("[Client {}] Unknown command {:#06x}", client, command);
                self.reply(client, &StationMessage::UnknownCommand);
            }
        }
    }

    fn dispatch_x(&mut self, client: ClientId, request: XRequest) {
        match request {
            XRequest::GetVersion => self.reply(client, &StationMessage::XVersion),
            XRequest::GetStatus => self.reply(client, &StationMessage::XStatus(self.power)),
            XRequest::GetFirmwareVersion => self.reply(client, &StationMessage::XFirmwareVersion),
            XRequest::SetTrackPowerOff => self.request_power(PowerState::TrackVoltageOff),
            XRequest::SetTrackPowerOn => {
                self.reply(client, &StationMessage::TrackPower(PowerState::Normal));
                self.request_power(PowerState::Normal);
            }
            XRequest::SetStop => self.request_power(PowerState::EmergencyStop),

            XRequest::CvRead { cv } => self.notifier.cv_read(cv),
            XRequest::CvWrite { cv, value } => self.notifier.cv_write(cv, value),
            XRequest::CvPom { target, address, cv, operation } => match operation {
                PomOperation::WriteByte(value) => {
                    self.notifier.cv_pom_write_byte(target, address, cv, value)
                }
                PomOperation::WriteBit(value) => {
                    self.notifier.cv_pom_write_bit(target, address, cv, value)
                }
                PomOperation::ReadByte => self.notifier.cv_pom_read_byte(target, address, cv),
            },

            XRequest::SetTurnout { address, output, activate } => {
                self.notifier.turnout_changed(address, output, activate);
                if self.all_sessions_subscribed(client) {
                    self.turnout_info(client, address);
                }
            }
            XRequest::GetTurnoutInfo { address } => self.turnout_info(client, address),
            XRequest::SetExtAccessory { address, state } => {
                self.notifier.ext_accessory_changed(address, state);
                self.ext_accessory = Some(state);
                self.set_ext_accessory_info(address, state, true);
            }
            XRequest::GetExtAccessoryInfo { address } => match self.ext_accessory {
                Some(state) => self.set_ext_accessory_info(address, state, true),
                None => self.set_ext_accessory_info(address, 0x00, false),
            },

            XRequest::GetLocoInfo { address } => {
                self.return_loco_state(Some(client), address, false);
            }
            XRequest::SetLocoDrive { address, steps, speed } => {
                busy::claim(&mut self.sessions, client, address);
                self.notifier.loco_speed_changed(address, speed, steps);
                self.return_loco_state(Some(client), address, true);
            }
            XRequest::SetLocoFunction { address, switch, function } => {
                busy::claim(&mut self.sessions, client, address);
                self.notifier.loco_function_changed(address, switch, function);
                self.return_loco_state(Some(client), address, true);
            }
            XRequest::SetLocoFunctionGroup { address, group, bits } => {
                busy::claim(&mut self.sessions, client, address);
                self.notifier.loco_function_group_changed(address, group, bits);
                if !group.is_silent() {
                    self.return_loco_state(Some(client), address, true);
                }
            }
            XRequest::SetLoco { address } => {
                busy::claim(&mut self.sessions, client, address);
                self.return_loco_state(Some(client), address, true);
            }
            XRequest::SetLocoBinaryState { address, low, high } => {
                self.notifier.loco_binary_state_changed(address, low, high);
            }

            XRequest::WlanMausPoll => {
                let unsubscribed = self
                    .sessions
                    .get(client)
                    .is_some_and(|s| s.subscriptions.is_empty());
                if unsubscribed {
                    debug!("[Client {}] WLANmaus poll, subscribing to All", client);
                    self.set_broadcast_flags(client, SubscriptionSet::only(BroadcastCategory::All));
                }
            }
            XRequest::Ignored { header, db0 } => {
                debug!("[Client {}] Ignored X-Bus {:#04x}/{:02X?}", client, header, db0);
            }
            XRequest::Unknown { header } => {
                debug!("[Client {}] Unknown X-Bus header {:#04x}", client, header);
                self.reply(client, &StationMessage::UnknownCommand);
            }
        }
    }

    /// Apply a power change requested by a client.
    fn request_power(&mut self, state: PowerState) {
        info!("Track power requested: {:?}", state);
        self.power = state;
        self.notifier.rail_power_changed(state);
        self.broadcast_power();
    }

    /// Send the current power state to category All.
    pub(super) fn broadcast_power(&mut self) {
        let power = self.power;
        self.send(
            ClientId::BROADCAST,
            &StationMessage::TrackPower(power),
            Some(BroadcastCategory::All),
        );
    }

    fn set_broadcast_flags(&mut self, client: ClientId, subscriptions: SubscriptionSet) {
        if !subscriptions.is_empty() {
            match self.sessions.get_mut(client) {
                Some(session) => {
                    session.subscriptions = subscriptions;
                    debug!("[Client {}] Subscribed to {:?}", client, subscriptions);
                    self.persist_subscriptions(client, subscriptions);
                }
                None => warn!("[Client {}] No session to hold subscriptions", client),
            }
        }
        self.broadcast_power();
    }

    /// True when every session of `client` has at least one subscription.
    fn all_sessions_subscribed(&self, client: ClientId) -> bool {
        self.sessions
            .iter()
            .filter(|s| s.client == client)
            .all(|s| !s.subscriptions.is_empty())
    }

    fn turnout_info(&mut self, client: ClientId, address: u16) {
        if let Some(active) = self.notifier.turnout_query(address) {
            self.reply(client, &StationMessage::TurnoutInfo { address, active });
        }
    }

    fn write_record(&mut self, client: ClientId, offset: u16, record: &[u8]) {
        if let Err(e) = self.store.write_all(offset, record) {
            warn!("[Client {}] Failed to write config record at {}: {}", client, offset, e);
        }
        self.notifier.config_changed();
    }
}
