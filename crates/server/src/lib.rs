pub mod gameplay;
pub mod network;
pub mod replication;

use avian3d::prelude::*;
use bevy::prelude::*;

pub use network::{ServerLinks, ServerNetworkConfig, ServerNetworkPlugin};

/// Everything the authoritative role runs: shared protocol wiring, the
/// combat mutation systems, physics, the link transport, and the
/// delta/cue broadcaster.
pub struct ServerPlugin {
    pub network: ServerNetworkConfig,
}

impl Default for ServerPlugin {
    fn default() -> Self {
        Self {
            network: ServerNetworkConfig::default(),
        }
    }
}

impl Plugin for ServerPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(protocol::ProtocolPlugin);
        app.add_plugins(protocol::CombatAuthorityPlugin);
        app.add_plugins(PhysicsPlugins::default());
        app.add_plugins(ServerNetworkPlugin {
            config: self.network.clone(),
        });
        app.add_plugins(gameplay::ServerGameplayPlugin);
        app.add_plugins(replication::ServerReplicationPlugin);
    }
}
