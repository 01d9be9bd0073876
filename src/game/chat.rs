//! Chat relay and voice indicator

use chrono::Utc;

use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::{Authority, Rejection};
use super::replica::ReplicaView;
use super::CharacterId;

pub struct ChatRelay;

impl ChatRelay {
    /// Client side: blank lines are never sent
    pub fn request_chat(view: &ReplicaView, text: &str) -> Option<ClientMsg> {
        view.local()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(ClientMsg::ChatRequest {
            text: text.to_string(),
        })
    }

    /// Relay a chat line to everyone. The dead may still talk.
    pub fn apply_chat(
        world: &mut Authority,
        requester: CharacterId,
        text: &str,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let max_len = world.rules.chat_max_len;
        let character = world.require(requester)?;

        let text: String = text.trim().chars().take(max_len).collect();
        if text.is_empty() {
            return Err(Rejection::EmptyChat);
        }

        out.push(ServerMsg::Chat {
            character_id: requester,
            display_name: character.display_name.clone(),
            text,
            sent_at: Utc::now(),
        });
        Ok(())
    }

    /// Broadcast the push-to-talk state; only changes are relayed
    pub fn apply_voice(
        world: &mut Authority,
        requester: CharacterId,
        talking: bool,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let character = world.require_mut(requester)?;
        if character.talking == talking {
            return Ok(());
        }
        character.talking = talking;
        out.push(ServerMsg::VoiceStateChanged {
            character_id: requester,
            talking,
        });
        Ok(())
    }
}
