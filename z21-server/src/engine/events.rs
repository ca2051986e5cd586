//! Events reported by the host's decoder logic.
//!
//! These are the station-side counterparts of client requests: the host calls
//! them when a value becomes known (a CV was read, a feedback module changed,
//! a throttle on another bus moved a loco) and the engine fans the result out
//! to the subscribed clients.

use log::{debug, warn};
use z21_protocol::{
    capability, BroadcastCategory, PowerState, StationMessage, SystemState, MAX_LOCONET_TUNNEL,
};

use super::{busy, Engine};
use crate::notifier::Notifier;
use crate::session::ClientId;
use crate::store::{ConfigStore, STATION_RECORD};

/// Capabilities every station reports.
const BASE_CAPABILITIES: u8 =
    capability::DCC | capability::LOCO_CMDS | capability::ACCESSORY_CMDS | capability::DETECTOR_CMDS;

/// Station record byte 0 value that enables RailCom.
const RAILCOM_ENABLED: u8 = 0x01;

/// Measurements for `LAN_SYSTEMSTATE_DATACHANGED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// Main track current in mA.
    pub main_current: u16,
    /// Programming track current in mA.
    pub prog_current: u16,
    pub filtered_main_current: u16,
    /// Internal temperature in °C.
    pub temperature: u16,
    /// Supply voltage in mV.
    pub supply_voltage: u16,
    /// Track voltage in mV.
    pub vcc_voltage: u16,
}

impl SystemInfo {
    /// A station with only a main track: the programming and filtered
    /// currents follow the main current and supply equals track voltage.
    pub fn from_main(current: u16, voltage: u16, temperature: u16) -> Self {
        Self {
            main_current: current,
            prog_current: current,
            filtered_main_current: current,
            temperature,
            supply_voltage: voltage,
            vcc_voltage: voltage,
        }
    }
}

impl<N: Notifier, S: ConfigStore> Engine<N, S> {
    /// Power state changed outside the LAN, e.g. a short circuit.
    ///
    /// The `rail_power_changed` hook is not invoked since the host is the
    /// source of the change.
    pub fn set_power(&mut self, state: PowerState) {
        if self.power != state {
            debug!("Track power {:?} -> {:?}", self.power, state);
        }
        self.power = state;
        self.broadcast_power();
    }

    /// Answer to a programming-on-main read.
    pub fn set_cv_pom_byte(&mut self, cv: u16, value: u8) {
        self.broadcast_all(&StationMessage::PomResult { cv, value });
    }

    /// A loco was changed by something other than a LAN client.
    ///
    /// Every LAN client loses ownership of `address` and all loco watchers
    /// receive the new state.
    pub fn set_loco_state_ext(&mut self, address: u16) {
        busy::release(&mut self.sessions, address);
        self.return_loco_state(None, address, true);
    }

    /// Feedback group changed.
    pub fn set_s88_data(&mut self, group: u8, feedback: [u8; 10]) {
        self.send(
            ClientId::BROADCAST,
            &StationMessage::RBusData { group, feedback },
            Some(BroadcastCategory::RBus),
        );
    }

    /// LocoNet occupancy report. A non-zero `client` answers that client's
    /// query; otherwise the report goes to all LocoNet subscribers.
    pub fn set_loconet_detector(&mut self, client: ClientId, data: &[u8]) {
        let msg = StationMessage::LocoNetDetector(data.to_vec());
        if client.is_broadcast() {
            self.send(ClientId::BROADCAST, &msg, Some(BroadcastCategory::LocoNet));
        } else {
            self.reply(client, &msg);
        }
    }

    /// Relay a packet seen on LocoNet. `tx` marks packets the station sent
    /// itself. Returns `false` when the packet does not fit in a frame.
    pub fn set_loconet_message(
        &mut self,
        data: &[u8],
        category: BroadcastCategory,
        tx: bool,
    ) -> bool {
        if data.len() > MAX_LOCONET_TUNNEL {
            warn!("LocoNet packet of {} bytes is too large to relay", data.len());
            return false;
        }
        let msg = if tx {
            StationMessage::LocoNetTx(data.to_vec())
        } else {
            StationMessage::LocoNetRx(data.to_vec())
        };
        self.send(ClientId::BROADCAST, &msg, Some(category));
        true
    }

    /// CAN occupancy detector report.
    pub fn set_can_detector(
        &mut self,
        network_id: u16,
        address: u16,
        port: u8,
        kind: u8,
        value1: u16,
        value2: u16,
    ) {
        self.send(
            ClientId::BROADCAST,
            &StationMessage::CanDetector { network_id, address, port, kind, value1, value2 },
            Some(BroadcastCategory::CANDetector),
        );
    }

    pub fn set_turnout_info(&mut self, address: u16, active: bool) {
        self.broadcast_all(&StationMessage::TurnoutInfo { address, active });
    }

    pub fn set_ext_accessory_info(&mut self, address: u16, state: u8, valid: bool) {
        self.broadcast_all(&StationMessage::ExtAccessoryInfo { address, state, valid });
    }

    /// Result of a programming-track read or write.
    pub fn set_cv_return(&mut self, cv: u16, value: u8) {
        self.broadcast_all(&StationMessage::CvResult { cv, value });
    }

    pub fn set_cv_nack(&mut self) {
        self.broadcast_all(&StationMessage::CvNack);
    }

    pub fn set_cv_nack_short_circuit(&mut self) {
        self.broadcast_all(&StationMessage::CvNackShortCircuit);
    }

    /// Send `LAN_SYSTEMSTATE_DATACHANGED`. A non-zero `client` gets its own
    /// copy; otherwise it goes to the SystemInfo subscribers.
    pub fn send_system_info(&mut self, client: ClientId, info: SystemInfo) {
        let mut capabilities = BASE_CAPABILITIES;
        if self.store.read(STATION_RECORD) == RAILCOM_ENABLED {
            capabilities |= capability::RAILCOM;
        }

        let state = SystemState {
            main_current: info.main_current,
            prog_current: info.prog_current,
            filtered_main_current: info.filtered_main_current,
            temperature: info.temperature,
            supply_voltage: info.supply_voltage,
            vcc_voltage: info.vcc_voltage,
            central_state: self.power.central_state(),
            central_state_ex: 0x00,
            capabilities,
        };
        let msg = StationMessage::SystemState(state);

        if client.is_broadcast() {
            self.send(ClientId::BROADCAST, &msg, Some(BroadcastCategory::SystemInfo));
        } else {
            self.reply(client, &msg);
        }
    }

    fn broadcast_all(&mut self, msg: &StationMessage) {
        self.send(ClientId::BROADCAST, msg, Some(BroadcastCategory::All));
    }
}

#[cfg(test)]
mod tests {
    use z21_protocol::{LocoState, SpeedSteps};

    use super::*;
    use crate::engine::tests::{engine, subscribe, x};
    use crate::notifier::testing::Event;
    use crate::store::ConfigStore;

    #[test]
    fn test_set_power_skips_hook() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        engine.notifier_mut().clear();

        engine.set_power(PowerState::ShortCircuit);

        assert_eq!(engine.power(), PowerState::ShortCircuit);
        assert!(engine.notifier().events.is_empty());
        assert_eq!(
            engine.notifier().payloads_to(ClientId::BROADCAST),
            vec![vec![0x61, 0x08, 0x69]]
        );
    }

    #[test]
    fn test_external_loco_change_clears_owner() {
        let mut engine = engine();
        engine.notifier_mut().locos.insert(
            3,
            LocoState { steps: SpeedSteps::Dcc28, speed: 0x10, functions: [0; 4] },
        );
        subscribe(&mut engine, 1, 0x0000_0001);
        engine.receive(ClientId(1), &x(&[0xE4, 0x12, 0x00, 0x03, 0x10])).unwrap();
        engine.notifier_mut().clear();

        engine.set_loco_state_ext(3);

        assert_eq!(busy::owner_of(engine.sessions(), 3), None);
        let payloads = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0][3], 0x02 | 0x08);
    }

    #[test]
    fn test_s88_goes_to_rbus_subscribers() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0002);
        subscribe(&mut engine, 2, 0x0000_0001);
        engine.notifier_mut().clear();

        let feedback = [0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0x80];
        engine.set_s88_data(0, feedback);

        assert!(engine.notifier().sent_to(ClientId(2)).is_empty());
        let payloads = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0][0], 0x00);
        assert_eq!(&payloads[0][1..], &feedback);
    }

    #[test]
    fn test_loconet_detector_unicast_or_broadcast() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0100_0000);
        subscribe(&mut engine, 2, 0x0100_0000);
        engine.notifier_mut().clear();

        engine.set_loconet_detector(ClientId(2), &[0x01, 0x10, 0x00, 0x01]);
        assert_eq!(engine.notifier().sent.len(), 1);
        assert_eq!(engine.notifier().sent[0].0, ClientId(2));

        engine.notifier_mut().clear();
        engine.set_loconet_detector(ClientId::BROADCAST, &[0x01, 0x10, 0x00, 0x01]);
        assert_eq!(engine.notifier().sent.len(), 2);
    }

    #[test]
    fn test_loconet_message_size_cap() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0100_0000);
        engine.notifier_mut().clear();

        assert!(engine.set_loconet_message(&[0x83, 0x7C], BroadcastCategory::LocoNet, false));
        assert!(engine.set_loconet_message(&[0x85, 0x7A], BroadcastCategory::LocoNet, true));
        assert!(!engine.set_loconet_message(&[0u8; 21], BroadcastCategory::LocoNet, false));

        let sent = engine.notifier().sent_to(ClientId(1));
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][2..4], &[0xA0, 0x00]);
        assert_eq!(&sent[1][2..4], &[0xA1, 0x00]);
    }

    #[test]
    fn test_can_detector() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0008_0000);
        engine.notifier_mut().clear();

        engine.set_can_detector(0xC101, 0x0002, 1, 0x01, 0x0100, 0x0000);

        let payloads = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(payloads, vec![vec![0x01, 0xC1, 0x02, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x00]]);
    }

    #[test]
    fn test_cv_results_go_to_all() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        engine.notifier_mut().clear();

        engine.set_cv_return(0x001C, 0x07);
        engine.set_cv_nack();
        engine.set_cv_nack_short_circuit();
        engine.set_cv_pom_byte(0x401C, 0x07);

        let payloads = engine.notifier().payloads_to(ClientId::BROADCAST);
        assert_eq!(payloads[0], vec![0x64, 0x14, 0x00, 0x1C, 0x07, 0x64 ^ 0x14 ^ 0x1C ^ 0x07]);
        assert_eq!(payloads[1], vec![0x61, 0x13, 0x72]);
        assert_eq!(payloads[2], vec![0x61, 0x12, 0x73]);
        assert_eq!(&payloads[3][2..4], &[0x00, 0x1C]);
    }

    #[test]
    fn test_turnout_info_broadcast() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        engine.notifier_mut().clear();

        engine.set_turnout_info(5, true);
        assert_eq!(
            engine.notifier().payloads_to(ClientId::BROADCAST),
            vec![vec![0x43, 0x00, 0x05, 0x02, 0x44]]
        );
    }

    #[test]
    fn test_system_info_to_client() {
        let mut engine = engine().with_power(PowerState::EmergencyStop);
        engine.send_system_info(ClientId(4), SystemInfo::from_main(1200, 18_000, 35));

        let payloads = engine.notifier().payloads_to(ClientId(4));
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_eq!(p.len(), 16);
        assert_eq!(u16::from_le_bytes([p[0], p[1]]), 1200);
        assert_eq!(u16::from_le_bytes([p[2], p[3]]), 1200);
        assert_eq!(u16::from_le_bytes([p[4], p[5]]), 1200);
        assert_eq!(u16::from_le_bytes([p[10], p[11]]), 18_000);
        assert_eq!(p[12], 0x01);
        assert_eq!(p[15], 0x71);
    }

    #[test]
    fn test_system_info_railcom_capability() {
        let mut engine = engine();
        engine.store_mut().write(STATION_RECORD, RAILCOM_ENABLED).unwrap();
        subscribe(&mut engine, 1, 0x0000_0100);
        subscribe(&mut engine, 2, 0x0000_0001);
        engine.notifier_mut().clear();

        engine.send_system_info(ClientId::BROADCAST, SystemInfo::default());

        assert!(engine.notifier().sent_to(ClientId(2)).is_empty());
        let payloads = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(payloads[0][12], 0x02);
        assert_eq!(payloads[0][15], 0x79);
    }

    #[test]
    fn test_system_info_request_hook() {
        let mut engine = engine();
        engine
            .receive(
                ClientId(1),
                &crate::engine::tests::lan(z21_protocol::LanCommand::SystemStateGetData, &[]),
            )
            .unwrap();
        assert_eq!(engine.notifier().events, vec![Event::SystemInfoRequested(ClientId(1))]);
    }
}
