//! Virtual command station used by the UDP host.
//!
//! [`VirtualStation`] implements [`Notifier`] without real track hardware:
//! it remembers loco, turnout and CV values and answers as a station would.
//! Answers that the engine expects through its `set_*` API are queued as
//! [`HostEvent`]s and applied after the frame was processed.

use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, info};
use z21_protocol::{
    FunctionGroup, FunctionSwitch, LocoState, PomTarget, PowerState, SpeedSteps,
};
use z21_server::{ClientId, ConfigStore, Engine, Notifier, SystemInfo};

use super::clients::ClientRegistry;

/// Reported track current with nothing on the rails, in mA.
const IDLE_CURRENT: u16 = 0;
/// Reported supply and track voltage, in mV.
const SUPPLY_VOLTAGE: u16 = 18_000;
/// Reported internal temperature, in °C.
const TEMPERATURE: u16 = 30;

/// A station answer that goes back through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    TurnoutInfo { address: u16, active: bool },
    CvReturn { cv: u16, value: u8 },
    CvNack,
    PomByte { cv: u16, value: u8 },
    S88 { group: u8, feedback: [u8; 10] },
    SystemInfo { client: ClientId, info: SystemInfo },
}

#[derive(Debug, Default)]
pub struct VirtualStation {
    registry: ClientRegistry,
    outbox: Vec<(ClientId, Bytes)>,
    events: Vec<HostEvent>,
    locos: HashMap<u16, LocoState>,
    turnouts: HashMap<u16, bool>,
    /// Programming track decoder.
    cvs: HashMap<u16, u8>,
    /// Decoders on the main track, by address and CV.
    pom_cvs: HashMap<(PomTarget, u16, u16), u8>,
}

impl VirtualStation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    /// Frames produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<(ClientId, Bytes)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn loco(&self, address: u16) -> Option<&LocoState> {
        self.locos.get(&address)
    }

    fn loco_mut(&mut self, address: u16) -> &mut LocoState {
        self.locos.entry(address).or_default()
    }
}

/// Apply `switch` to function `function` of `state`. Functions above F28
/// are not tracked.
fn apply_function(state: &mut LocoState, switch: FunctionSwitch, function: u8) {
    let (index, bit) = match function {
        0 => (0, 4),
        1..=4 => (0, function - 1),
        5..=12 => (1, function - 5),
        13..=20 => (2, function - 13),
        21..=28 => (3, function - 21),
        _ => return,
    };
    let mask = 1u8 << bit;
    let byte = &mut state.functions[index];
    match switch {
        FunctionSwitch::Off => *byte &= !mask,
        FunctionSwitch::On => *byte |= mask,
        FunctionSwitch::Toggle => *byte ^= mask,
        FunctionSwitch::Reserved => {}
    }
}

/// Store a function group in `state`. Groups above F28 are not tracked.
fn apply_function_group(state: &mut LocoState, group: FunctionGroup, bits: u8) {
    let f = &mut state.functions;
    match group {
        FunctionGroup::F0ToF4 => f[0] = (f[0] & !0x1F) | (bits & 0x1F),
        FunctionGroup::F5ToF8 => f[1] = (f[1] & 0xF0) | (bits & 0x0F),
        FunctionGroup::F9ToF12 => f[1] = (f[1] & 0x0F) | ((bits & 0x0F) << 4),
        FunctionGroup::F13ToF20 => f[2] = bits,
        FunctionGroup::F21ToF28 => f[3] = bits,
        _ => {}
    }
}

impl Notifier for VirtualStation {
    fn send_frame(&mut self, target: ClientId, frame: &[u8]) {
        self.outbox.push((target, Bytes::copy_from_slice(frame)));
    }

    fn system_info_requested(&mut self, client: ClientId) {
        let info = SystemInfo::from_main(IDLE_CURRENT, SUPPLY_VOLTAGE, TEMPERATURE);
        self.events.push(HostEvent::SystemInfo { client, info });
    }

    fn rail_power_changed(&mut self, state: PowerState) {
        info!("Track power is now {:?}", state);
    }

    fn cv_read(&mut self, cv: u16) {
        let event = match self.cvs.get(&cv) {
            Some(value) => HostEvent::CvReturn { cv, value: *value },
            None => HostEvent::CvNack,
        };
        self.events.push(event);
    }

    fn cv_write(&mut self, cv: u16, value: u8) {
        self.cvs.insert(cv, value);
        self.events.push(HostEvent::CvReturn { cv, value });
    }

    fn cv_pom_read_byte(&mut self, target: PomTarget, address: u16, cv: u16) {
        let value = self.pom_cvs.get(&(target, address, cv)).copied().unwrap_or(0);
        self.events.push(HostEvent::PomByte { cv, value });
    }

    fn cv_pom_write_byte(&mut self, target: PomTarget, address: u16, cv: u16, value: u8) {
        debug!("POM {:?} {} CV{} = {:#04x}", target, address, cv + 1, value);
        self.pom_cvs.insert((target, address, cv), value);
    }

    fn cv_pom_write_bit(&mut self, target: PomTarget, address: u16, cv: u16, value: u8) {
        // value is 1111VBBB: V the new bit value, BBB its position
        let mask = 1u8 << (value & 0x07);
        let entry = self.pom_cvs.entry((target, address, cv)).or_insert(0);
        if value & 0x08 != 0 {
            *entry |= mask;
        } else {
            *entry &= !mask;
        }
    }

    fn turnout_query(&mut self, address: u16) -> Option<bool> {
        Some(self.turnouts.get(&address).copied().unwrap_or(false))
    }

    fn turnout_changed(&mut self, address: u16, output: bool, activate: bool) {
        if !activate {
            return;
        }
        self.turnouts.insert(address, output);
        self.events.push(HostEvent::TurnoutInfo { address, active: output });
    }

    fn ext_accessory_changed(&mut self, address: u16, state: u8) {
        debug!("Extended accessory {} set to {:#04x}", address, state);
    }

    fn loco_state_query(&mut self, address: u16) -> Option<LocoState> {
        self.locos.get(&address).copied()
    }

    fn loco_speed_changed(&mut self, address: u16, speed: u8, steps: SpeedSteps) {
        let loco = self.loco_mut(address);
        loco.steps = steps;
        loco.speed = speed;
    }

    fn loco_function_changed(&mut self, address: u16, switch: FunctionSwitch, function: u8) {
        apply_function(self.loco_mut(address), switch, function);
    }

    fn loco_function_group_changed(&mut self, address: u16, group: FunctionGroup, bits: u8) {
        apply_function_group(self.loco_mut(address), group, bits);
    }

    fn s88_data_requested(&mut self, group: u8) {
        // No feedback modules attached: every input reads free
        self.events.push(HostEvent::S88 { group, feedback: [0; 10] });
    }

    fn client_hash(&mut self, client: ClientId) -> Option<u8> {
        self.registry.hash(client)
    }
}

/// Feed the station's queued answers back through the engine.
pub fn apply_host_events<S: ConfigStore>(engine: &mut Engine<VirtualStation, S>) {
    for event in engine.notifier_mut().take_events() {
        match event {
            HostEvent::TurnoutInfo { address, active } => engine.set_turnout_info(address, active),
            HostEvent::CvReturn { cv, value } => engine.set_cv_return(cv, value),
            HostEvent::CvNack => engine.set_cv_nack(),
            HostEvent::PomByte { cv, value } => engine.set_cv_pom_byte(cv, value),
            HostEvent::S88 { group, feedback } => engine.set_s88_data(group, feedback),
            HostEvent::SystemInfo { client, info } => engine.send_system_info(client, info),
        }
    }
}

#[cfg(test)]
mod tests {
    use z21_protocol::{encode_frame, LanCommand};
    use z21_server::MemoryConfigStore;

    use super::*;

    fn x(payload: &[u8]) -> Vec<u8> {
        encode_frame(LanCommand::XBus, payload, true).unwrap().to_vec()
    }

    fn station_engine() -> Engine<VirtualStation, MemoryConfigStore> {
        Engine::new(VirtualStation::new(), MemoryConfigStore::new())
    }

    #[test]
    fn test_function_bits() {
        let mut state = LocoState::default();
        apply_function(&mut state, FunctionSwitch::On, 0);
        apply_function(&mut state, FunctionSwitch::On, 3);
        apply_function(&mut state, FunctionSwitch::On, 12);
        apply_function(&mut state, FunctionSwitch::On, 28);
        apply_function(&mut state, FunctionSwitch::On, 40);
        assert_eq!(state.functions, [0x14, 0x80, 0x00, 0x80]);

        apply_function(&mut state, FunctionSwitch::Toggle, 0);
        apply_function(&mut state, FunctionSwitch::Off, 12);
        assert_eq!(state.functions, [0x04, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_function_groups() {
        let mut state = LocoState::default();
        apply_function_group(&mut state, FunctionGroup::F0ToF4, 0x11);
        apply_function_group(&mut state, FunctionGroup::F5ToF8, 0x03);
        apply_function_group(&mut state, FunctionGroup::F9ToF12, 0x05);
        apply_function_group(&mut state, FunctionGroup::F21ToF28, 0xAA);
        apply_function_group(&mut state, FunctionGroup::F29ToF36, 0xFF);
        assert_eq!(state.functions, [0x11, 0x53, 0x00, 0xAA]);
    }

    #[test]
    fn test_drive_is_remembered() {
        let mut engine = station_engine();
        engine.receive(ClientId(1), &x(&[0xE4, 0x13, 0x00, 0x03, 0x85])).unwrap();
        engine.receive(ClientId(1), &x(&[0xE4, 0xF8, 0x00, 0x03, 0x40])).unwrap();

        let loco = engine.notifier().loco(3).unwrap();
        assert_eq!(loco.steps, SpeedSteps::Dcc128);
        assert_eq!(loco.speed, 0x85);
        assert_eq!(loco.functions[0], 0x10);
    }

    #[test]
    fn test_cv_read_answers() {
        let mut engine = station_engine();
        engine.receive(ClientId(1), &x(&[0x23, 0x11, 0x00, 0x07])).unwrap();
        assert_eq!(engine.notifier_mut().take_events(), vec![HostEvent::CvNack]);

        engine.receive(ClientId(1), &x(&[0x24, 0x12, 0x00, 0x07, 0x2A])).unwrap();
        engine.receive(ClientId(1), &x(&[0x23, 0x11, 0x00, 0x07])).unwrap();
        assert_eq!(
            engine.notifier_mut().take_events(),
            vec![
                HostEvent::CvReturn { cv: 7, value: 0x2A },
                HostEvent::CvReturn { cv: 7, value: 0x2A },
            ]
        );
    }

    #[test]
    fn test_pom_bit_write() {
        let mut station = VirtualStation::new();
        station.cv_pom_write_bit(PomTarget::Loco, 3, 28, 0xFB);
        station.cv_pom_write_bit(PomTarget::Loco, 3, 28, 0xF1);
        station.cv_pom_read_byte(PomTarget::Loco, 3, 28);
        assert_eq!(station.take_events(), vec![HostEvent::PomByte { cv: 28, value: 0x08 }]);
    }

    #[test]
    fn test_turnout_switch_is_broadcast() {
        let mut engine = station_engine();
        // subscribe to All so the engine routes broadcasts
        engine
            .receive(
                ClientId(1),
                &encode_frame(LanCommand::SetBroadcastFlags, &[0x01, 0, 0, 0], false)
                    .unwrap(),
            )
            .unwrap();
        engine.notifier_mut().take_outbox();

        engine.receive(ClientId(1), &x(&[0x53, 0x00, 0x05, 0x09])).unwrap();
        engine.receive(ClientId(1), &x(&[0x53, 0x00, 0x05, 0x01])).unwrap();
        apply_host_events(&mut engine);

        let outbox = engine.notifier_mut().take_outbox();
        let targets: Vec<ClientId> = outbox.iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, vec![ClientId(1), ClientId(1), ClientId::BROADCAST]);
        assert_eq!(&outbox[2].1[4..8], &[0x43, 0x00, 0x05, 0x02]);
    }

    #[test]
    fn test_system_info_answer() {
        let mut engine = station_engine();
        engine
            .receive(
                ClientId(2),
                &encode_frame(LanCommand::SystemStateGetData, &[], false).unwrap(),
            )
            .unwrap();
        apply_host_events(&mut engine);

        let outbox = engine.notifier_mut().take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, ClientId(2));
        assert_eq!(outbox[0].1.len(), 0x14);
    }

    #[test]
    fn test_client_hash_from_registry() {
        let mut station = VirtualStation::new();
        let id = station.registry_mut().register("10.0.0.7:21105".parse().unwrap()).unwrap();
        assert_eq!(station.client_hash(id), Some(10 ^ 7));
        assert_eq!(station.client_hash(ClientId(200)), None);
    }
}
