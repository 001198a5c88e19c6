use bevy::prelude::*;
use protocol::{link_pair, ClientEndpoint, ServerEndpoint, ServerMessage};

/// Configuration for the server's replication cadence.
#[derive(Clone, Resource)]
pub struct ServerNetworkConfig {
    /// Simulation ticks between state delta broadcasts. Cues are forwarded
    /// every tick regardless.
    pub replication_interval_ticks: u32,
}

impl Default for ServerNetworkConfig {
    fn default() -> Self {
        Self {
            // ~100ms at the 64 Hz fixed step, matching the usual
            // presentation update cadence.
            replication_interval_ticks: 6,
        }
    }
}

/// Authority-side record of one connected observer.
pub struct ClientLink {
    pub client_id: u64,
    pub endpoint: ServerEndpoint,
    /// Highest intent counter accepted from this link; earlier or repeated
    /// counters are dropped (replay guard).
    pub last_counter: u64,
    pub character_spawned: bool,
}

/// All live observer links. Opening a link is the whole of session
/// establishment here; anything fancier (matchmaking, handshakes) lives
/// outside this workspace.
#[derive(Resource, Default)]
pub struct ServerLinks {
    next_client_id: u64,
    pub links: Vec<ClientLink>,
}

impl ServerLinks {
    /// Create an in-memory link and return the observer-side endpoint along
    /// with the client id the server will associate with it.
    pub fn open_link(&mut self) -> (u64, ClientEndpoint) {
        let (server_end, client_end) = link_pair();
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.links.push(ClientLink {
            client_id,
            endpoint: server_end,
            last_counter: 0,
            character_spawned: false,
        });
        info!("Client {client_id} link opened");
        (client_id, client_end)
    }

    /// Send to every observer, pruning links whose other end is gone.
    pub fn broadcast(&mut self, message: &ServerMessage) {
        self.links.retain(|link| {
            let delivered = link.endpoint.send(message);
            if !delivered {
                info!("Client {} disconnected", link.client_id);
            }
            delivered
        });
    }
}

pub struct ServerNetworkPlugin {
    pub config: ServerNetworkConfig,
}

impl Default for ServerNetworkPlugin {
    fn default() -> Self {
        Self {
            config: ServerNetworkConfig::default(),
        }
    }
}

impl Plugin for ServerNetworkPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.config.clone());
        app.init_resource::<ServerLinks>();
    }
}
