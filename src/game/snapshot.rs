//! Periodic full-state snapshots

use crate::ws::protocol::{CharacterSnapshot, ServerMsg};

use super::authority::Authority;

/// Decides when to send a snapshot and builds it from the authority
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (joins, deaths)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message. Characters are ordered by id so
    /// consecutive snapshots diff cleanly.
    pub fn build(&self, world: &Authority) -> ServerMsg {
        let mut characters: Vec<CharacterSnapshot> =
            world.characters().map(|c| c.snapshot()).collect();
        characters.sort_unstable_by_key(|c| c.character_id);

        ServerMsg::Snapshot {
            tick: world.tick(),
            characters,
            weapons: world.weapons().iter().map(|w| w.snapshot()).collect(),
        }
    }
}

/// Snapshot stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub avg_characters_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, character_count: usize) {
        self.total_snapshots += 1;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_characters_per_snapshot = self.avg_characters_per_snapshot * ((n - 1.0) / n)
            + (character_count as f32 / n);
    }
}
