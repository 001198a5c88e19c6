pub mod mirror;
pub mod network;

use bevy::prelude::*;

pub use mirror::{Mirror, MirroredEntity, MirroredStatus};
pub use network::{AttackRequest, ClientSession};

/// Observer-side wiring: send signed intents, apply replicated deltas to
/// local mirrors, and re-emit presentation cues. No combat mutation system
/// is registered here; an observer structurally cannot apply damage, spawn
/// projectiles, or touch status registries.
pub struct ClientPlugin;

impl Plugin for ClientPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Mirror>();
        app.add_message::<AttackRequest>();
        app.add_message::<protocol::PresentationCue>();
        app.add_systems(
            Update,
            (network::send_attack_requests, mirror::apply_server_messages),
        );
    }
}
