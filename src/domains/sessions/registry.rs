use super::entity::WorkerSession;
use crate::shared::{Clock, PlayerId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Who owns which session, and when each leader may start another one.
///
/// No global lock: each map is updated independently and removals are
/// compare-and-remove against the session object the caller holds.
pub struct SessionRegistry {
    by_leader: DashMap<PlayerId, Arc<WorkerSession>>,
    leader_of: DashMap<PlayerId, PlayerId>,
    next_allowed: DashMap<PlayerId, Instant>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            by_leader: DashMap::new(),
            leader_of: DashMap::new(),
            next_allowed: DashMap::new(),
            cooldown,
            clock,
        }
    }

    pub fn session_of(&self, leader: PlayerId) -> Option<Arc<WorkerSession>> {
        self.by_leader.get(&leader).map(|entry| Arc::clone(entry.value()))
    }

    /// The tracked leader of `member`, or `member` itself.
    pub fn leader_of(&self, member: PlayerId) -> PlayerId {
        self.leader_of
            .get(&member)
            .map(|entry| *entry.value())
            .unwrap_or(member)
    }

    pub fn session_for_member(&self, member: PlayerId) -> Option<Arc<WorkerSession>> {
        self.session_of(self.leader_of(member))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<WorkerSession>> {
        self.by_leader
            .iter()
            .find(|entry| entry.value().name().eq_ignore_ascii_case(name))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Installs leader→session first, then one member→leader entry at a time.
    pub fn attach(
        &self,
        session: &Arc<WorkerSession>,
        leader: PlayerId,
        members: impl IntoIterator<Item = PlayerId>,
    ) {
        self.by_leader.insert(leader, Arc::clone(session));
        self.leader_of.insert(leader, leader);
        for member in members {
            self.leader_of.insert(member, leader);
        }
    }

    /// Like [`attach`](Self::attach), but only when `leader` has no session
    /// yet. Returns false and changes nothing otherwise.
    pub fn attach_if_vacant(
        &self,
        session: &Arc<WorkerSession>,
        leader: PlayerId,
        members: impl IntoIterator<Item = PlayerId>,
    ) -> bool {
        match self.by_leader.entry(leader) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(session));
            }
        }
        self.leader_of.insert(leader, leader);
        for member in members {
            self.leader_of.insert(member, leader);
        }
        true
    }

    pub fn add_member(&self, leader: PlayerId, member: PlayerId) {
        self.leader_of.insert(member, leader);
    }

    /// Removes the session's mappings only while they still point at this
    /// exact session object. Returns whether the leader entry was removed.
    pub fn detach(&self, session: &Arc<WorkerSession>) -> bool {
        let Some(leader) = session.leader() else {
            return false;
        };
        let removed = self
            .by_leader
            .remove_if(&leader, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            for member in session.members() {
                self.leader_of
                    .remove_if(&member, |_, mapped| *mapped == leader);
            }
            self.leader_of.remove_if(&leader, |_, mapped| *mapped == leader);
        }
        removed
    }

    pub fn sessions(&self) -> Vec<Arc<WorkerSession>> {
        self.by_leader
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_leader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_leader.is_empty()
    }

    pub fn can_admit(&self, leader: PlayerId) -> bool {
        match self.next_allowed.get(&leader) {
            Some(allowed) => self.clock.now() >= *allowed.value(),
            None => true,
        }
    }

    pub fn record_admission(&self, leader: PlayerId) {
        self.next_allowed
            .insert(leader, self.clock.now() + self.cooldown);
    }

    pub fn clear_admission(&self, leader: PlayerId) {
        self.next_allowed.remove(&leader);
    }

    /// Whole seconds until `leader` may create again; at least 1 while the
    /// cooldown is running, 0 otherwise.
    pub fn remaining_secs(&self, leader: PlayerId) -> u64 {
        let Some(allowed) = self.next_allowed.get(&leader).map(|e| *e.value()) else {
            return 0;
        };
        let now = self.clock.now();
        if now >= allowed {
            return 0;
        }
        (allowed - now).as_secs().max(1)
    }

    /// Drops every mapping. Used once the shutdown drain has finished.
    pub fn clear(&self) {
        self.by_leader.clear();
        self.leader_of.clear();
        self.next_allowed.clear();
    }
}
