use bevy::prelude::*;
use protocol::{sign_intent, ClientEndpoint, ClientMessage, PRIVATE_KEY};

/// Observer-side session state: the link endpoint plus the signing counter.
/// Created from the endpoint handed out by the server's `open_link`.
#[derive(Resource)]
pub struct ClientSession {
    pub endpoint: ClientEndpoint,
    pub player: u64,
    counter: u64,
}

impl ClientSession {
    pub fn new(player: u64, endpoint: ClientEndpoint) -> Self {
        Self {
            endpoint,
            player,
            counter: 0,
        }
    }

    /// Sign and send one attack intent. The authoritative side re-validates
    /// everything; this is a request, not a command.
    pub fn request_attack(&mut self) -> bool {
        self.counter += 1;
        let signature = sign_intent(&PRIVATE_KEY, self.player, self.counter);
        self.endpoint.send(&ClientMessage::AttackIntent {
            player: self.player,
            counter: self.counter,
            signature,
        })
    }
}

/// Local request from whatever input layer sits above this crate.
#[derive(Message, Clone, Copy, Debug, Default)]
pub struct AttackRequest;

pub fn send_attack_requests(
    session: Option<ResMut<ClientSession>>,
    mut requests: MessageReader<AttackRequest>,
) {
    let Some(mut session) = session else {
        requests.clear();
        return;
    };
    for _ in requests.read() {
        if !session.request_attack() {
            warn!("Server link closed, attack request dropped");
        }
    }
}
