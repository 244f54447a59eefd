use crate::shared::PlayerId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RADIUS: i32 = 256;
pub const RADIUS_STEP: i32 = 50;
pub const RADIUS_MIN: i32 = 50;
pub const RADIUS_MAX: i32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusKind {
    Visit,
    Move,
}

impl RadiusKind {
    /// Backend command that applies this radius.
    pub fn command_label(&self) -> &'static str {
        match self {
            RadiusKind::Visit => "visitradius",
            RadiusKind::Move => "moveradius",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusChange {
    Set(i32),
    Increase,
    Decrease,
}

pub fn clamp_radius(value: i32) -> i32 {
    value.clamp(RADIUS_MIN, RADIUS_MAX)
}

/// Per-leader radius settings, kept on the orchestrator side so relative
/// adjustments survive backend restarts.
#[derive(Debug, Default)]
pub struct RadiusPreferences {
    values: DashMap<(PlayerId, RadiusKind), i32>,
}

impl RadiusPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, leader: PlayerId, kind: RadiusKind) -> i32 {
        self.values
            .get(&(leader, kind))
            .map(|v| *v.value())
            .unwrap_or(DEFAULT_RADIUS)
    }

    pub fn ensure_defaults(&self, leader: PlayerId) {
        for kind in [RadiusKind::Visit, RadiusKind::Move] {
            self.values.entry((leader, kind)).or_insert(DEFAULT_RADIUS);
        }
    }

    /// The clamped value `change` would produce, without storing it.
    pub fn resolve(&self, leader: PlayerId, kind: RadiusKind, change: RadiusChange) -> i32 {
        let current = self.get(leader, kind);
        clamp_radius(match change {
            RadiusChange::Set(v) => v,
            RadiusChange::Increase => current.saturating_add(RADIUS_STEP),
            RadiusChange::Decrease => current.saturating_sub(RADIUS_STEP),
        })
    }

    pub fn store(&self, leader: PlayerId, kind: RadiusKind, value: i32) {
        self.values.insert((leader, kind), clamp_radius(value));
    }

    pub fn forget(&self, leader: PlayerId) {
        self.values.remove(&(leader, RadiusKind::Visit));
        self.values.remove(&(leader, RadiusKind::Move));
    }

    pub fn clear(&self) {
        self.values.clear();
    }
}
