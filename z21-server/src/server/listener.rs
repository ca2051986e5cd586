//! UDP listener driving the engine.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use z21_protocol::{decode_frame, frames, LanCommand};
use z21_server::{ClientId, ConfigStore, Engine};

use super::host::{apply_host_events, VirtualStation};

/// Largest datagram accepted from a client.
const MAX_DATAGRAM: usize = 1500;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Interval between session ticks.
    pub tick_interval: Duration,
}

/// The UDP host: one socket, one engine, one task.
pub struct Server<S: ConfigStore> {
    config: ServerConfig,
    engine: Engine<VirtualStation, S>,
}

impl<S: ConfigStore> Server<S> {
    pub fn new(config: ServerConfig, engine: Engine<VirtualStation, S>) -> Self {
        Self { config, engine }
    }

    /// Bind the configured address and serve until an I/O error.
    pub async fn run(mut self) -> std::io::Result<()> {
        let socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!("Server listening on {}", socket.local_addr()?);
        self.serve(socket).await
    }

    /// Serve on an already bound socket.
    ///
    /// Datagrams and ticks are handled one at a time, so the engine never
    /// sees two events concurrently.
    pub async fn serve(&mut self, socket: UdpSocket) -> std::io::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, addr)) => self.handle_datagram(addr, &buf[..len]),
                        Err(e) => {
                            // ICMP port unreachable surfaces here on some platforms
                            warn!("Failed to receive datagram: {}", e);
                            continue;
                        }
                    }
                }
                _ = ticker.tick() => self.handle_tick(),
            }
            self.flush(&socket).await;
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, datagram: &[u8]) {
        let Some(client) = self.engine.notifier_mut().registry_mut().register(addr) else {
            return;
        };
        trace!("[Client {}] RX {:02X?}", client, datagram);

        let mut logged_off = false;
        for frame in frames(datagram) {
            if let Err(e) = self.engine.receive(client, frame) {
                warn!("[Client {}] Dropping frame: {}", client, e);
                continue;
            }
            logged_off |= decode_frame(frame)
                .is_ok_and(|f| f.header.command == u16::from(LanCommand::Logoff));
        }
        apply_host_events(&mut self.engine);

        // A frame after the logoff opens a new session that still needs the peer
        if logged_off && self.engine.sessions().get(client).is_none() {
            self.engine.notifier_mut().registry_mut().remove(client);
        }
    }

    /// Age sessions and forget peers that no longer have one.
    fn handle_tick(&mut self) {
        self.engine.tick();

        let stale: Vec<ClientId> = self
            .engine
            .notifier()
            .registry()
            .ids()
            .filter(|id| self.engine.sessions().get(*id).is_none())
            .collect();
        if stale.is_empty() {
            return;
        }
        let registry = self.engine.notifier_mut().registry_mut();
        for id in stale {
            registry.remove(id);
        }
        debug!("{} peers registered", registry.len());
    }

    /// Send every queued frame. `ClientId::BROADCAST` goes to all peers.
    async fn flush(&mut self, socket: &UdpSocket) {
        let outbox = self.engine.notifier_mut().take_outbox();
        if outbox.is_empty() {
            return;
        }

        for (target, frame) in outbox {
            let registry = self.engine.notifier().registry();
            let addrs: Vec<SocketAddr> = if target.is_broadcast() {
                registry.addrs().collect()
            } else {
                registry.addr_of(target).into_iter().collect()
            };

            for addr in addrs {
                if let Err(e) = socket.send_to(&frame, addr).await {
                    warn!("[Client {}] Failed to send to {}: {}", target, addr, e);
                }
            }
        }
    }
}
