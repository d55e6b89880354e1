//! Participant - one process taking part in the probe protocol.
//!
//! A participant moves through three states:
//!
//! ```text
//!   ACTIVE ──(wait_on / make_blocked)──► BLOCKED ──(own probe returns)──► DEADLOCKED
//! ```
//!
//! No transition leaves DEADLOCKED, and `blocked` is never cleared once set.
//! The `dependent` bits only ever go from false to true.

use crate::config::{DuplicateGuard, ParticipantDescriptor};
use crate::probe::Probe;
use crate::types::{ParticipantId, SiteId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Externally visible participant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Active,
    Blocked,
    Deadlocked,
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParticipantStatus::Active => "ACTIVE",
            ParticipantStatus::Blocked => "BLOCKED",
            ParticipantStatus::Deadlocked => "DEADLOCKED",
        };
        f.write_str(name)
    }
}

/// What a participant did with a delivered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Receiver is not waiting on anything
    NotBlocked,

    /// Receiver already recorded a dependency on this origin
    AlreadyDependent,

    /// The reply guard refused the probe
    GuardRejected,

    /// The probe's origin has no slot in the dependency bitset
    UnknownOrigin,

    /// New dependency on the origin; the search must be forwarded
    Confirmed,

    /// The receiver's own probe came back
    Deadlocked,
}

/// A process with a site, a wait set and a per-origin dependency bitset.
#[derive(Debug, Clone)]
pub struct Participant {
    id: ParticipantId,
    site: SiteId,

    /// Participants this one holds a wait edge toward
    waiting_on: BTreeSet<ParticipantId>,

    /// One entry per registry id, indexed by probe origin
    dependent: Vec<bool>,

    blocked: bool,
    deadlocked: bool,

    /// Every probe received, keyed by sender
    received_from: BTreeMap<ParticipantId, Vec<Probe>>,

    sent_count: u64,
    received_count: u64,
}

impl Participant {
    /// Creates an active participant in a registry of `registry_size` ids.
    pub fn new(id: ParticipantId, site: SiteId, registry_size: usize) -> Self {
        Self {
            id,
            site,
            waiting_on: BTreeSet::new(),
            dependent: vec![false; registry_size],
            blocked: false,
            deadlocked: false,
            received_from: BTreeMap::new(),
            sent_count: 0,
            received_count: 0,
        }
    }

    /// Creates a participant from its static descriptor.
    pub fn from_descriptor(descriptor: &ParticipantDescriptor, registry_size: usize) -> Self {
        let mut participant = Self::new(descriptor.id, descriptor.site, registry_size);
        participant.blocked = descriptor.initial_blocked;
        participant.waiting_on.extend(descriptor.initial_waiting_on.iter().copied());
        participant
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_deadlocked(&self) -> bool {
        self.deadlocked
    }

    pub fn status(&self) -> ParticipantStatus {
        if self.deadlocked {
            ParticipantStatus::Deadlocked
        } else if self.blocked {
            ParticipantStatus::Blocked
        } else {
            ParticipantStatus::Active
        }
    }

    /// Participants this one waits on, in id order.
    pub fn waiting_on(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.waiting_on.iter().copied()
    }

    /// True iff `other` is in this participant's wait set.
    pub fn is_waiting_on(&self, other: ParticipantId) -> bool {
        self.waiting_on.contains(&other)
    }

    /// True iff this participant has recorded a dependency on `origin`.
    pub fn is_dependent(&self, origin: ParticipantId) -> bool {
        self.dependent.get(origin.index()).copied().unwrap_or(false)
    }

    /// Ids whose dependency bit is set, in id order.
    pub fn dependent_ids(&self) -> Vec<ParticipantId> {
        self.dependent
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(|(index, _)| ParticipantId(index))
            .collect()
    }

    /// Local transitive dependency: trivially on itself, otherwise only on a
    /// same-site participant that has recorded a dependency on this one.
    pub fn is_locally_dependent_on(&self, other: &Participant) -> bool {
        self.id == other.id || (other.is_dependent(self.id) && other.site == self.site)
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Probes received from `sender`, oldest first.
    pub fn received_from(&self, sender: ParticipantId) -> &[Probe] {
        self.received_from.get(&sender).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns true if any probe from `sender` has been recorded.
    pub fn has_heard_from(&self, sender: ParticipantId) -> bool {
        !self.received_from(sender).is_empty()
    }

    /// Adds a wait edge toward `holder`; a waiting participant is blocked.
    pub fn wait_on(&mut self, holder: ParticipantId) {
        self.waiting_on.insert(holder);
        self.blocked = true;
    }

    /// Blocks this participant on itself.
    ///
    /// Sets `dependent[self]`, so a later probe of its own origin is ignored.
    pub fn make_blocked(&mut self) {
        self.blocked = true;
        self.waiting_on.insert(self.id);
        self.mark_dependent(self.id);
    }

    pub(crate) fn note_sent(&mut self, count: u64) {
        self.sent_count += count;
    }

    fn mark_dependent(&mut self, origin: ParticipantId) {
        if let Some(bit) = self.dependent.get_mut(origin.index()) {
            *bit = true;
        }
    }

    fn declare_deadlock(&mut self) {
        self.blocked = true;
        self.deadlocked = true;
    }

    /// Logs a delivered probe and decides whether it confirms a new dependency.
    ///
    /// The probe is always counted. It confirms a dependency only if the
    /// receiver is blocked, has no dependency on the probe's origin yet, and
    /// the reply guard passes. A confirmed probe of the receiver's own origin
    /// deadlocks the receiver.
    pub fn receive(&mut self, probe: Probe, guard: DuplicateGuard) -> Admission {
        let heard_before = self.has_heard_from(probe.sender);
        self.received_from.entry(probe.sender).or_default().push(probe);
        self.received_count += 1;

        let guard_passes = match guard {
            DuplicateGuard::Permissive => self.has_heard_from(probe.sender),
            DuplicateGuard::FirstPerSender => !heard_before,
        };

        if !self.blocked {
            return Admission::NotBlocked;
        }
        if probe.origin.index() >= self.dependent.len() {
            return Admission::UnknownOrigin;
        }
        if self.is_dependent(probe.origin) {
            return Admission::AlreadyDependent;
        }
        if !guard_passes {
            return Admission::GuardRejected;
        }

        self.mark_dependent(probe.origin);

        if probe.is_homecoming() {
            self.declare_deadlock();
            Admission::Deadlocked
        } else {
            Admission::Confirmed
        }
    }

    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: self.id,
            site: self.site,
            status: self.status(),
            waiting_on: self.waiting_on().collect(),
            dependent_ids: self.dependent_ids(),
            sent_count: self.sent_count,
            received_count: self.received_count,
        }
    }
}

/// Point-in-time view of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub site: SiteId,
    pub status: ParticipantStatus,
    pub waiting_on: Vec<ParticipantId>,
    pub dependent_ids: Vec<ParticipantId>,
    pub sent_count: u64,
    pub received_count: u64,
}

impl std::fmt::Display for ParticipantSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |list: &[ParticipantId]| {
            list.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
        };
        writeln!(f, "Process {} (Site {}): {}", self.id, self.site, self.status)?;
        writeln!(f, "  Waiting on: [{}]", ids(&self.waiting_on))?;
        writeln!(f, "  Dependencies: [{}]", ids(&self.dependent_ids))?;
        write!(f, "  Probes sent: {}, received: {}", self.sent_count, self.received_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: usize) -> ParticipantId {
        ParticipantId(n)
    }

    fn blocked(id: usize, site: u32, waits: &[usize], size: usize) -> Participant {
        Participant::from_descriptor(&ParticipantDescriptor::blocked(id, site, waits), size)
    }

    #[test]
    fn test_participant_initial_state() {
        let p = Participant::new(pid(1), SiteId(0), 3);

        assert_eq!(p.status(), ParticipantStatus::Active);
        assert!(p.dependent_ids().is_empty());
        assert_eq!(p.sent_count(), 0);
        assert_eq!(p.received_count(), 0);
    }

    #[test]
    fn test_wait_on_blocks() {
        let mut p = Participant::new(pid(0), SiteId(0), 2);
        p.wait_on(pid(1));

        assert!(p.is_waiting_on(pid(1)));
        assert!(!p.is_waiting_on(pid(0)));
        assert_eq!(p.status(), ParticipantStatus::Blocked);
    }

    #[test]
    fn test_make_blocked_waits_on_self() {
        let mut p = Participant::new(pid(2), SiteId(0), 3);
        p.make_blocked();

        assert!(p.is_blocked());
        assert!(p.is_waiting_on(pid(2)));
        assert!(p.is_dependent(pid(2)));

        // Own-origin probe is ignored once dependent[self] is set
        let admission = p.receive(Probe::new(pid(2), pid(2), pid(2)), DuplicateGuard::Permissive);
        assert_eq!(admission, Admission::AlreadyDependent);
        assert!(!p.is_deadlocked());
    }

    #[test]
    fn test_locally_dependent_same_site_only() {
        let mut a = blocked(0, 0, &[1], 3);
        let b = blocked(1, 0, &[2], 3);
        let mut c = blocked(2, 1, &[0], 3);

        // Trivially dependent on itself
        assert!(a.is_locally_dependent_on(&a.clone()));
        assert!(!a.is_locally_dependent_on(&b));

        // c records a dependency on a, but lives on another site
        c.receive(Probe::new(pid(0), pid(1), pid(2)), DuplicateGuard::Permissive);
        assert!(c.is_dependent(pid(0)));
        assert!(!a.is_locally_dependent_on(&c));

        // b on a's site records a dependency on a
        let mut b = b;
        b.receive(Probe::new(pid(0), pid(0), pid(1)), DuplicateGuard::Permissive);
        assert!(a.is_locally_dependent_on(&b));
        a.wait_on(pid(2));
        assert!(a.is_locally_dependent_on(&b));
    }

    #[test]
    fn test_receive_confirms_once() {
        let mut p = blocked(1, 0, &[2], 3);
        let probe = Probe::new(pid(0), pid(0), pid(1));

        assert_eq!(p.receive(probe, DuplicateGuard::Permissive), Admission::Confirmed);
        assert_eq!(p.receive(probe, DuplicateGuard::Permissive), Admission::AlreadyDependent);

        assert_eq!(p.received_count(), 2);
        assert_eq!(p.received_from(pid(0)).len(), 2);
        assert_eq!(p.dependent_ids(), vec![pid(0)]);
    }

    #[test]
    fn test_receive_when_active_is_counted_only() {
        let mut p = Participant::new(pid(1), SiteId(0), 2);
        let admission = p.receive(Probe::new(pid(0), pid(0), pid(1)), DuplicateGuard::Permissive);

        assert_eq!(admission, Admission::NotBlocked);
        assert_eq!(p.received_count(), 1);
        assert!(p.dependent_ids().is_empty());
    }

    #[test]
    fn test_own_probe_deadlocks() {
        let mut p = blocked(0, 0, &[1], 2);
        let admission = p.receive(Probe::new(pid(0), pid(1), pid(0)), DuplicateGuard::Permissive);

        assert_eq!(admission, Admission::Deadlocked);
        assert_eq!(p.status(), ParticipantStatus::Deadlocked);
        assert!(p.is_blocked());

        // Terminal: further probes change nothing
        p.receive(Probe::new(pid(1), pid(1), pid(0)), DuplicateGuard::Permissive);
        assert!(p.is_deadlocked());
    }

    #[test]
    fn test_first_per_sender_guard() {
        let mut p = blocked(2, 0, &[0], 3);

        let first = p.receive(Probe::new(pid(0), pid(1), pid(2)), DuplicateGuard::FirstPerSender);
        assert_eq!(first, Admission::Confirmed);

        // Different origin, same sender: refused by the guard
        let second = p.receive(Probe::new(pid(1), pid(1), pid(2)), DuplicateGuard::FirstPerSender);
        assert_eq!(second, Admission::GuardRejected);
        assert!(!p.is_dependent(pid(1)));

        // The permissive guard would have accepted it
        let third = p.receive(Probe::new(pid(1), pid(1), pid(2)), DuplicateGuard::Permissive);
        assert_eq!(third, Admission::Confirmed);
    }

    #[test]
    fn test_out_of_range_origin_is_never_dependent() {
        let p = Participant::new(pid(0), SiteId(0), 1);
        assert!(!p.is_dependent(pid(5)));
    }

    #[test]
    fn test_out_of_range_origin_never_confirms() {
        let mut p = blocked(1, 0, &[0], 2);
        let probe = Probe::new(pid(9), pid(0), pid(1));

        assert_eq!(p.receive(probe, DuplicateGuard::Permissive), Admission::UnknownOrigin);
        assert_eq!(p.receive(probe, DuplicateGuard::Permissive), Admission::UnknownOrigin);
        assert_eq!(p.received_count(), 2);
        assert!(p.dependent_ids().is_empty());
    }

    #[test]
    fn test_snapshot_display() {
        let mut p = blocked(0, 1, &[1, 2], 3);
        p.note_sent(2);
        let text = p.snapshot().to_string();

        assert!(text.contains("Process P0 (Site S1): BLOCKED"));
        assert!(text.contains("Waiting on: [P1, P2]"));
        assert!(text.contains("Probes sent: 2, received: 0"));
    }
}
