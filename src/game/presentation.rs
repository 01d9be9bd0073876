//! Notification interface between the client mirror and UI/animation/VFX

use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;

use super::{CharacterId, WeaponId};

/// Whose character a notification is about, from the observer's seat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// The observer owns the subject: drive the main HUD
    Owner,
    /// Someone else's character: drive its nameplate / world effects
    Remote,
}

pub fn perspective_of(observer: CharacterId, subject: CharacterId) -> Perspective {
    if observer == subject {
        Perspective::Owner
    } else {
        Perspective::Remote
    }
}

/// Typed state-change events emitted by [`super::ReplicaView`]
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    HpChanged {
        subject: CharacterId,
        ratio: f32,
    },
    BulletCountChanged {
        subject: CharacterId,
        bullet_count: u32,
    },
    Fired {
        subject: CharacterId,
        hit_point: Option<Vec3>,
    },
    ReloadStarted {
        subject: CharacterId,
    },
    AmmoReset {
        subject: CharacterId,
    },
    WeaponAttached {
        subject: CharacterId,
        weapon_id: WeaponId,
    },
    WeaponDetached {
        subject: CharacterId,
        weapon_id: WeaponId,
    },
    /// Owner perspective shows the game-over overlay
    Died {
        subject: CharacterId,
    },
    ScoreChanged {
        subject: CharacterId,
        score: u32,
    },
    ChatReceived {
        subject: CharacterId,
        display_name: String,
        text: String,
    },
    VoiceChanged {
        subject: CharacterId,
        talking: bool,
    },
}

impl Notification {
    pub fn subject(&self) -> CharacterId {
        match self {
            Notification::HpChanged { subject, .. }
            | Notification::BulletCountChanged { subject, .. }
            | Notification::Fired { subject, .. }
            | Notification::ReloadStarted { subject }
            | Notification::AmmoReset { subject }
            | Notification::WeaponAttached { subject, .. }
            | Notification::WeaponDetached { subject, .. }
            | Notification::Died { subject }
            | Notification::ScoreChanged { subject, .. }
            | Notification::ChatReceived { subject, .. }
            | Notification::VoiceChanged { subject, .. } => *subject,
        }
    }
}

/// Receives notifications; owns its own UI, holds no game state
pub trait PresentationSink {
    fn notify(&mut self, perspective: Perspective, notification: &Notification);
}

/// Records notifications behind a shared handle
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(Perspective, Notification)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far
    pub fn drain(&self) -> Vec<(Perspective, Notification)> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl PresentationSink for RecordingSink {
    fn notify(&mut self, perspective: Perspective, notification: &Notification) {
        self.events.lock().push((perspective, notification.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perspective_distinguishes_owner_from_remote() {
        let me = CharacterId::new();
        let other = CharacterId::new();
        assert_eq!(perspective_of(me, me), Perspective::Owner);
        assert_eq!(perspective_of(me, other), Perspective::Remote);
    }

    #[test]
    fn recording_sink_clones_share_storage() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        let subject = CharacterId::new();
        writer.notify(Perspective::Remote, &Notification::Died { subject });

        assert_eq!(sink.len(), 1);
        let events = sink.drain();
        assert_eq!(events[0].1.subject(), subject);
        assert!(sink.is_empty());
    }
}
