use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::status::EffectId;
use crate::Team;

/// Stable cross-process identity for a replicated entity. Allocated by the
/// authoritative role; observers key their mirrors on it.
#[derive(Component, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct NetworkId(pub u64);

/// One-shot advisory events for the presentation layer. Deliberately a
/// separate type from [`StateDelta`]: cues carry no authority and observers
/// must never treat one as a state mutation.
#[derive(Message, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PresentationCue {
    WeaponFired { attacker: u64, cooldown: f32 },
    Impact { position: Vec3, normal: Vec3 },
    BeamPolyline { points: Vec<Vec3> },
    StatusApplied { target: u64, effect: EffectId },
    StatusRemoved { target: u64, effect: EffectId },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReplicatedKind {
    Character { team: Team, player: u64 },
    Dummy { team: Team },
    Projectile,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub id: u64,
    pub kind: ReplicatedKind,
    pub position: Vec3,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: u64,
    pub position: Vec3,
    pub health: Option<f32>,
    pub speed_multiplier: f32,
    pub stunned: bool,
}

/// Authoritative state snapshot delta, sent authority -> observers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: u32,
    pub spawns: Vec<EntitySpawn>,
    pub updates: Vec<EntityUpdate>,
    pub despawns: Vec<u64>,
}

/// Everything the authoritative role sends. Deltas mutate mirrors; cues are
/// replayed as local presentation events and nothing else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Delta(StateDelta),
    Cue(PresentationCue),
}

/// Everything an observer may send. Attack intents are re-validated on the
/// authoritative side; nothing in here is trusted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    AttackIntent {
        player: u64,
        counter: u64,
        signature: u64,
    },
}

/// Keyed hash over an intent's identifying fields. Demo-grade signing with
/// the shared private key; the counter doubles as a replay guard.
pub fn sign_intent(key: &[u8; 32], player: u64, counter: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    player.hash(&mut hasher);
    counter.hash(&mut hasher);
    hasher.finish()
}

pub fn verify_intent(key: &[u8; 32], player: u64, counter: u64, signature: u64) -> bool {
    sign_intent(key, player, counter) == signature
}

/// Authority-side end of one observer link.
pub struct ServerEndpoint {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Observer-side end of a link to the authority.
pub struct ClientEndpoint {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// In-memory message-passing link between the authoritative role and one
/// observer. Session establishment beyond handing out the endpoint pair is
/// outside this crate.
pub fn link_pair() -> (ServerEndpoint, ClientEndpoint) {
    let (server_tx, client_rx) = unbounded();
    let (client_tx, server_rx) = unbounded();
    (
        ServerEndpoint {
            tx: server_tx,
            rx: server_rx,
        },
        ClientEndpoint {
            tx: client_tx,
            rx: client_rx,
        },
    )
}

impl ServerEndpoint {
    /// Returns false once the observer side is gone.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match bincode::serialize(message) {
            Ok(bytes) => self.tx.send(bytes).is_ok(),
            Err(err) => {
                warn!("Failed to encode server message: {err}");
                true
            }
        }
    }

    pub fn try_recv(&self) -> Option<ClientMessage> {
        loop {
            let bytes = self.rx.try_recv().ok()?;
            match bincode::deserialize(&bytes) {
                Ok(message) => return Some(message),
                Err(err) => {
                    warn!("Dropping undecodable client message: {err}");
                }
            }
        }
    }
}

impl ClientEndpoint {
    /// Returns false once the authority side is gone.
    pub fn send(&self, message: &ClientMessage) -> bool {
        match bincode::serialize(message) {
            Ok(bytes) => self.tx.send(bytes).is_ok(),
            Err(err) => {
                warn!("Failed to encode client message: {err}");
                true
            }
        }
    }

    pub fn try_recv(&self) -> Option<ServerMessage> {
        loop {
            let bytes = self.rx.try_recv().ok()?;
            match bincode::deserialize(&bytes) {
                Ok(message) => return Some(message),
                Err(err) => {
                    warn!("Dropping undecodable server message: {err}");
                }
            }
        }
    }
}
