//! Hooks into the decoder logic and the transport.
//!
//! Every hook has a no-op default, so an implementation only overrides what
//! its hardware supports. Queries return `None` when unanswered.

use z21_protocol::{FunctionGroup, FunctionSwitch, LocoState, PomTarget, PowerState, SpeedSteps};

use crate::session::ClientId;

/// Callbacks the engine invokes while processing frames.
pub trait Notifier {
    /// Transmit a complete frame. `ClientId::BROADCAST` means every client.
    fn send_frame(&mut self, _target: ClientId, _frame: &[u8]) {}

    /// A client asked for `LAN_SYSTEMSTATE`; answer with
    /// [`Engine::send_system_info`](crate::Engine::send_system_info).
    fn system_info_requested(&mut self, _client: ClientId) {}

    fn rail_power_changed(&mut self, _state: PowerState) {}

    // Programming track
    fn cv_read(&mut self, _cv: u16) {}
    fn cv_write(&mut self, _cv: u16, _value: u8) {}

    // Programming on main
    fn cv_pom_read_byte(&mut self, _target: PomTarget, _address: u16, _cv: u16) {}
    fn cv_pom_write_byte(&mut self, _target: PomTarget, _address: u16, _cv: u16, _value: u8) {}
    fn cv_pom_write_bit(&mut self, _target: PomTarget, _address: u16, _cv: u16, _value: u8) {}

    /// Whether the turnout output is active.
    fn turnout_query(&mut self, _address: u16) -> Option<bool> {
        None
    }
    fn turnout_changed(&mut self, _address: u16, _output: bool, _activate: bool) {}
    fn ext_accessory_changed(&mut self, _address: u16, _state: u8) {}

    fn loco_state_query(&mut self, _address: u16) -> Option<LocoState> {
        None
    }
    fn loco_speed_changed(&mut self, _address: u16, _speed: u8, _steps: SpeedSteps) {}
    fn loco_function_changed(&mut self, _address: u16, _switch: FunctionSwitch, _function: u8) {}
    fn loco_function_group_changed(&mut self, _address: u16, _group: FunctionGroup, _bits: u8) {}
    fn loco_binary_state_changed(&mut self, _address: u16, _low: u8, _high: u8) {}

    fn s88_data_requested(&mut self, _group: u8) {}

    fn loconet_detector_query(&mut self, _client: ClientId, _kind: u8, _address: u16) {}
    /// Slot the address was dispatched to.
    fn loconet_dispatch(&mut self, _address: u16) -> Option<u8> {
        None
    }
    fn loconet_send_packet(&mut self, _data: &[u8]) {}
    fn can_detector_query(&mut self, _client: ClientId, _kind: u8, _id: u16) {}

    /// Loco address of the latest RailCom reading.
    fn railcom_address_query(&mut self) -> Option<u16> {
        None
    }

    /// A configuration record was written.
    fn config_changed(&mut self) {}

    /// Stable one-byte hash used to persist the client's subscriptions.
    fn client_hash(&mut self, _client: ClientId) -> Option<u8> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use z21_protocol::decode_frame;

    use super::*;

    /// A hook invocation seen by [`RecordingNotifier`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        SystemInfoRequested(ClientId),
        RailPower(PowerState),
        CvRead(u16),
        CvWrite(u16, u8),
        PomRead(PomTarget, u16, u16),
        PomWriteByte(PomTarget, u16, u16, u8),
        PomWriteBit(PomTarget, u16, u16, u8),
        TurnoutChanged(u16, bool, bool),
        ExtAccessory(u16, u8),
        LocoSpeed(u16, u8, SpeedSteps),
        LocoFunction(u16, FunctionSwitch, u8),
        LocoFunctionGroup(u16, FunctionGroup, u8),
        LocoBinaryState(u16, u8, u8),
        S88Requested(u8),
        LocoNetDetector(ClientId, u8, u16),
        LocoNetPacket(Vec<u8>),
        CanDetector(ClientId, u8, u16),
        ConfigChanged,
    }

    /// Records every frame and hook call; answers queries from its maps.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Vec<(ClientId, Vec<u8>)>,
        pub events: Vec<Event>,
        pub locos: HashMap<u16, LocoState>,
        pub turnouts: HashMap<u16, bool>,
        pub hashes: HashMap<ClientId, u8>,
        pub dispatch_slot: Option<u8>,
        pub railcom_address: Option<u16>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Frames sent to `target`, in order.
        pub fn sent_to(&self, target: ClientId) -> Vec<Vec<u8>> {
            self.sent
                .iter()
                .filter(|(t, _)| *t == target)
                .map(|(_, f)| f.clone())
                .collect()
        }

        /// Payloads (checksum included) of frames sent to `target`.
        pub fn payloads_to(&self, target: ClientId) -> Vec<Vec<u8>> {
            self.sent_to(target)
                .iter()
                .map(|f| decode_frame(f).unwrap().payload.to_vec())
                .collect()
        }

        pub fn clear(&mut self) {
            self.sent.clear();
            self.events.clear();
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_frame(&mut self, target: ClientId, frame: &[u8]) {
            self.sent.push((target, frame.to_vec()));
        }

        fn system_info_requested(&mut self, client: ClientId) {
            self.events.push(Event::SystemInfoRequested(client));
        }

        fn rail_power_changed(&mut self, state: PowerState) {
            self.events.push(Event::RailPower(state));
        }

        fn cv_read(&mut self, cv: u16) {
            self.events.push(Event::CvRead(cv));
        }

        fn cv_write(&mut self, cv: u16, value: u8) {
            self.events.push(Event::CvWrite(cv, value));
        }

        fn cv_pom_read_byte(&mut self, target: PomTarget, address: u16, cv: u16) {
            self.events.push(Event::PomRead(target, address, cv));
        }

        fn cv_pom_write_byte(&mut self, target: PomTarget, address: u16, cv: u16, value: u8) {
            self.events.push(Event::PomWriteByte(target, address, cv, value));
        }

        fn cv_pom_write_bit(&mut self, target: PomTarget, address: u16, cv: u16, value: u8) {
            self.events.push(Event::PomWriteBit(target, address, cv, value));
        }

        fn turnout_query(&mut self, address: u16) -> Option<bool> {
            self.turnouts.get(&address).copied()
        }

        fn turnout_changed(&mut self, address: u16, output: bool, activate: bool) {
            self.events.push(Event::TurnoutChanged(address, output, activate));
        }

        fn ext_accessory_changed(&mut self, address: u16, state: u8) {
            self.events.push(Event::ExtAccessory(address, state));
        }

        fn loco_state_query(&mut self, address: u16) -> Option<LocoState> {
            self.locos.get(&address).copied()
        }

        fn loco_speed_changed(&mut self, address: u16, speed: u8, steps: SpeedSteps) {
            self.events.push(Event::LocoSpeed(address, speed, steps));
        }

        fn loco_function_changed(&mut self, address: u16, switch: FunctionSwitch, function: u8) {
            self.events.push(Event::LocoFunction(address, switch, function));
        }

        fn loco_function_group_changed(&mut self, address: u16, group: FunctionGroup, bits: u8) {
            self.events.push(Event::LocoFunctionGroup(address, group, bits));
        }

        fn loco_binary_state_changed(&mut self, address: u16, low: u8, high: u8) {
            self.events.push(Event::LocoBinaryState(address, low, high));
        }

        fn s88_data_requested(&mut self, group: u8) {
            self.events.push(Event::S88Requested(group));
        }

        fn loconet_detector_query(&mut self, client: ClientId, kind: u8, address: u16) {
            self.events.push(Event::LocoNetDetector(client, kind, address));
        }

        fn loconet_dispatch(&mut self, _address: u16) -> Option<u8> {
            self.dispatch_slot
        }

        fn loconet_send_packet(&mut self, data: &[u8]) {
            self.events.push(Event::LocoNetPacket(data.to_vec()));
        }

        fn can_detector_query(&mut self, client: ClientId, kind: u8, id: u16) {
            self.events.push(Event::CanDetector(client, kind, id));
        }

        fn railcom_address_query(&mut self) -> Option<u16> {
            self.railcom_address
        }

        fn config_changed(&mut self) {
            self.events.push(Event::ConfigChanged);
        }

        fn client_hash(&mut self, client: ClientId) -> Option<u8> {
            self.hashes.get(&client).copied()
        }
    }
}
