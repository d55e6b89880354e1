//! Simulation - the context object owning the registry and the probe channel.
//!
//! All protocol operations go through a `Simulation`:
//!
//! ```text
//!  send_probe ──push──► ProbeChannel ──pop──► receive_probe(receiver)
//!                            ▲                      │
//!                            └──── propagate ◄──────┘ (new dependency)
//! ```
//!
//! Probe creation is synchronous in the caller's context. Delivery happens
//! either on the [`Dispatcher`](crate::Dispatcher) task or, for fully
//! deterministic runs, through [`Simulation::step`] / [`Simulation::drain`].

use crate::channel::ProbeChannel;
use crate::config::{ParticipantDescriptor, ProtocolConfig, SimulationConfig};
use crate::error::ConfigError;
use crate::events::{EventJournal, ProtocolEvent};
use crate::participant::{Admission, Participant};
use crate::probe::Probe;
use crate::registry::Registry;
use crate::snapshot::SystemSnapshot;
use crate::types::ParticipantId;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One detection run: participants, pending probes and the policy in force.
#[derive(Debug)]
pub struct Simulation {
    registry: Registry,
    channel: ProbeChannel,
    protocol: ProtocolConfig,
    journal: EventJournal,

    /// Completed deliveries; watchers wake on every change
    progress: watch::Sender<u64>,

    /// Participants that declared deadlock, in declaration order
    deadlocked: Mutex<Vec<ParticipantId>>,
}

impl Simulation {
    /// Builds a simulation from participant descriptors.
    pub fn new(participants: &[ParticipantDescriptor], protocol: ProtocolConfig) -> Result<Self, ConfigError> {
        let registry = Registry::from_descriptors(participants)?;
        let (progress, _) = watch::channel(0);

        debug!(
            "Simulation created with {} participants ({:?}, {:?})",
            registry.len(),
            protocol.site_policy,
            protocol.duplicate_guard
        );

        Ok(Self {
            registry,
            channel: ProbeChannel::new(),
            protocol,
            journal: EventJournal::new(),
            progress,
            deadlocked: Mutex::new(Vec::new()),
        })
    }

    /// Builds a simulation from a full run configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        Self::new(&config.participants, config.protocol)
    }

    /// Creates an Arc-wrapped simulation for sharing with the dispatcher.
    pub fn shared(config: &SimulationConfig) -> Result<Arc<Self>, ConfigError> {
        Self::from_config(config).map(Arc::new)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn channel(&self) -> &ProbeChannel {
        &self.channel
    }

    pub fn protocol(&self) -> ProtocolConfig {
        self.protocol
    }

    /// Sends a probe for the edge `sender -> receiver` on behalf of `origin`.
    ///
    /// No probe is created unless the sender currently waits on the
    /// receiver and the site policy admits the edge.
    pub fn send_probe(
        &self,
        origin: ParticipantId,
        sender: ParticipantId,
        receiver: ParticipantId,
    ) -> Option<Probe> {
        if !self.registry.contains(origin) || !self.registry.contains(receiver) {
            warn!("Refusing probe {} -> {} for unknown origin or receiver", sender, receiver);
            return None;
        }
        let mut from = self.registry.lock(sender)?;

        if !from.is_waiting_on(receiver) {
            debug!("{} is not waiting on {}; no probe sent", sender, receiver);
            return None;
        }
        if !self.edge_permitted(&from, receiver) {
            debug!("Site policy filters edge {} -> {}", sender, receiver);
            return None;
        }

        let probe = Probe::new(origin, sender, receiver);
        from.note_sent(1);
        self.enqueue(probe);
        Some(probe)
    }

    /// Handles one delivered probe as a single atomic unit of work.
    ///
    /// Returns `None` if the origin or the receiver is not in the registry.
    pub fn receive_probe(&self, probe: Probe) -> Option<Admission> {
        if !self.registry.contains(probe.origin) {
            warn!("Dropping {}: unknown origin", probe);
            return None;
        }
        let Some(mut receiver) = self.registry.lock(probe.receiver) else {
            warn!("Dropping {}: unknown receiver", probe);
            return None;
        };

        self.journal.record(ProtocolEvent::ProbeReceived { probe });
        let admission = receiver.receive(probe, self.protocol.duplicate_guard);

        match admission {
            Admission::Confirmed => {
                self.journal.record(ProtocolEvent::DependencyConfirmed {
                    participant: receiver.id(),
                    origin: probe.origin,
                });
                let forwarded = self.propagate(&mut receiver, probe.origin);
                debug!("{} forwarded {} probe(s) for origin {}", receiver.id(), forwarded, probe.origin);
            }
            Admission::Deadlocked => {
                self.journal.record(ProtocolEvent::DependencyConfirmed {
                    participant: receiver.id(),
                    origin: probe.origin,
                });
                self.journal.record(ProtocolEvent::DeadlockDeclared {
                    participant: receiver.id(),
                });
                self.deadlocked
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(receiver.id());
            }
            Admission::NotBlocked
            | Admission::AlreadyDependent
            | Admission::GuardRejected
            | Admission::UnknownOrigin => {}
        }

        Some(admission)
    }

    /// Forwards the search for `origin` after `receiver` confirmed it.
    ///
    /// Scans the whole registry: every wait edge `M -> N` where the receiver
    /// is locally dependent on `M` gets a probe `(origin, M, N)`, charged to
    /// `M`'s sent counter. Returns the number of probes enqueued.
    fn propagate(&self, receiver: &mut Participant, origin: ParticipantId) -> usize {
        let mut forwarded = 0;

        for m_id in self.registry.ids() {
            let probes = if m_id == receiver.id() {
                let probes = self.outgoing(receiver, origin);
                receiver.note_sent(probes.len() as u64);
                probes
            } else {
                let Some(mut m) = self.registry.lock(m_id) else {
                    continue;
                };
                if !receiver.is_locally_dependent_on(&m) {
                    continue;
                }
                let probes = self.outgoing(&m, origin);
                m.note_sent(probes.len() as u64);
                probes
            };

            forwarded += probes.len();
            for probe in probes {
                self.enqueue(probe);
            }
        }

        forwarded
    }

    /// Probes `(origin, m, n)` for each of `m`'s edges the site policy admits.
    fn outgoing(&self, m: &Participant, origin: ParticipantId) -> Vec<Probe> {
        m.waiting_on()
            .filter(|n| self.edge_permitted(m, *n))
            .map(|n| Probe::new(origin, m.id(), n))
            .collect()
    }

    fn edge_permitted(&self, from: &Participant, to: ParticipantId) -> bool {
        self.registry
            .site_of(to)
            .map(|site| self.protocol.site_policy.permits(from.site(), site))
            .unwrap_or(false)
    }

    fn enqueue(&self, probe: Probe) {
        self.journal.record(ProtocolEvent::ProbeSent { probe });
        self.channel.push(probe);
    }

    /// Delivers a popped probe and marks it complete.
    pub(crate) fn deliver(&self, probe: Probe) {
        self.receive_probe(probe);
        self.channel.complete();
        self.progress.send_modify(|n| *n += 1);
    }

    /// Delivers the head probe in the caller's context.
    ///
    /// Only meaningful while no dispatcher is running.
    pub fn step(&self) -> Option<Probe> {
        let probe = self.channel.try_pop()?;
        self.deliver(probe);
        Some(probe)
    }

    /// Delivers probes until the channel is empty or `max_deliveries` is hit.
    /// Returns the number delivered.
    pub fn drain(&self, max_deliveries: usize) -> usize {
        let mut delivered = 0;
        while delivered < max_deliveries && self.step().is_some() {
            delivered += 1;
        }
        delivered
    }

    /// Adds the wait edge `waiter -> holder`, blocking the waiter.
    pub fn wait_on(&self, waiter: ParticipantId, holder: ParticipantId) -> Result<(), ConfigError> {
        if !self.registry.contains(holder) {
            return Err(ConfigError::UnknownParticipant {
                descriptor: waiter,
                target: holder,
            });
        }
        let mut participant = self
            .registry
            .lock(waiter)
            .ok_or(ConfigError::UnknownWaiter { waiter })?;
        participant.wait_on(holder);
        info!("{} now waits on {}", waiter, holder);
        Ok(())
    }

    /// Blocks a participant on itself. Returns false for an unknown id.
    pub fn block_on_self(&self, id: ParticipantId) -> bool {
        match self.registry.lock(id) {
            Some(mut participant) => {
                participant.make_blocked();
                info!("{} is blocked on itself", id);
                true
            }
            None => false,
        }
    }

    /// Participants that declared deadlock, in declaration order.
    pub fn deadlocked(&self) -> Vec<ParticipantId> {
        self.deadlocked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The first participant to declare deadlock.
    pub fn first_deadlocked(&self) -> Option<ParticipantId> {
        self.deadlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .copied()
    }

    /// Number of probes delivered so far.
    pub fn deliveries(&self) -> u64 {
        *self.progress.borrow()
    }

    /// Watches the delivery counter; wakes after every delivery.
    pub fn subscribe_progress(&self) -> watch::Receiver<u64> {
        self.progress.subscribe()
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.journal.events()
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            participants: self.registry.snapshot(),
            pending_probes: self.channel.pending(),
            deliveries: self.deliveries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DuplicateGuard, SitePolicy};
    use crate::participant::ParticipantStatus;

    fn pid(n: usize) -> ParticipantId {
        ParticipantId(n)
    }

    /// 0 -> 1 -> 2 -> 0 with the given sites.
    fn triangle(sites: [u32; 3], protocol: ProtocolConfig) -> Simulation {
        Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, sites[0], &[1]),
                ParticipantDescriptor::blocked(1, sites[1], &[2]),
                ParticipantDescriptor::blocked(2, sites[2], &[0]),
            ],
            protocol,
        )
        .unwrap()
    }

    #[test]
    fn test_send_probe_requires_wait_edge() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());

        assert!(sim.send_probe(pid(0), pid(0), pid(2)).is_none());
        assert_eq!(sim.channel().pending(), 0);

        let probe = sim.send_probe(pid(0), pid(0), pid(1)).unwrap();
        assert_eq!(probe, Probe::new(pid(0), pid(0), pid(1)));
        assert_eq!(sim.channel().pending(), 1);
        assert_eq!(sim.registry().lock(pid(0)).unwrap().sent_count(), 1);
    }

    #[test]
    fn test_send_probe_unknown_ids() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());

        assert!(sim.send_probe(pid(7), pid(0), pid(1)).is_none());
        assert!(sim.send_probe(pid(0), pid(7), pid(1)).is_none());
        assert!(sim.receive_probe(Probe::new(pid(0), pid(0), pid(9))).is_none());
    }

    #[test]
    fn test_receive_rejects_unknown_origin() {
        let sim = Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::blocked(1, 0, &[0]),
            ],
            ProtocolConfig::default(),
        )
        .unwrap();

        assert!(sim.receive_probe(Probe::new(pid(9), pid(0), pid(1))).is_none());
        assert_eq!(sim.drain(10_000), 0);
        assert!(sim.channel().is_quiescent());

        let p1 = sim.registry().lock(pid(1)).unwrap();
        assert_eq!(p1.received_count(), 0);
        assert!(p1.dependent_ids().is_empty());
        drop(p1);
        assert!(sim.events().is_empty());
        assert!(sim.deadlocked().is_empty());
    }

    #[test]
    fn test_single_site_cycle_detected() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());
        sim.send_probe(pid(0), pid(0), pid(1));
        sim.send_probe(pid(1), pid(1), pid(2));

        sim.drain(1_000);

        assert!(sim.channel().is_quiescent());
        let deadlocked = sim.deadlocked();
        assert_eq!(deadlocked.first(), Some(&pid(0)));
        assert!(deadlocked.contains(&pid(1)));

        let snapshot = sim.snapshot();
        assert_eq!(snapshot.participants[0].status, ParticipantStatus::Deadlocked);
        assert!(snapshot.participants[0].dependent_ids.contains(&pid(0)));
    }

    #[test]
    fn test_cross_site_cycle_detected() {
        let sim = triangle([0, 0, 1], ProtocolConfig::default());
        sim.send_probe(pid(0), pid(0), pid(1));
        sim.send_probe(pid(1), pid(1), pid(2));

        sim.drain(1_000);

        assert_eq!(sim.first_deadlocked(), Some(pid(0)));
        // P2 forwarded P0's probe home across the site boundary
        assert!(sim
            .events()
            .contains(&ProtocolEvent::ProbeSent { probe: Probe::new(pid(0), pid(2), pid(0)) }));
    }

    #[test]
    fn test_chain_never_deadlocks() {
        let sim = Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::blocked(1, 0, &[2]),
                ParticipantDescriptor::blocked(2, 1, &[]),
            ],
            ProtocolConfig::default(),
        )
        .unwrap();
        sim.send_probe(pid(0), pid(0), pid(1));
        sim.send_probe(pid(1), pid(1), pid(2));

        sim.drain(1_000);

        assert!(sim.channel().is_quiescent());
        assert!(sim.deadlocked().is_empty());
        assert!(sim.snapshot().deadlocked().is_empty());
    }

    #[test]
    fn test_propagation_charges_forwarding_participant() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());
        sim.send_probe(pid(0), pid(0), pid(1));

        // P1 confirms origin P0 and forwards along its own edge
        assert_eq!(sim.step(), Some(Probe::new(pid(0), pid(0), pid(1))));
        assert_eq!(sim.registry().lock(pid(1)).unwrap().sent_count(), 1);
        assert_eq!(sim.channel().try_pop(), Some(Probe::new(pid(0), pid(1), pid(2))));
    }

    #[test]
    fn test_propagation_uses_same_site_dependents() {
        let sim = triangle([0, 0, 1], ProtocolConfig::default());

        // P1 learns of P0's search; P0 learns of P1's search
        sim.receive_probe(Probe::new(pid(0), pid(0), pid(1)));
        while sim.channel().try_pop().is_some() {
            sim.channel().complete();
        }
        sim.receive_probe(Probe::new(pid(1), pid(2), pid(0)));

        // P0 is locally dependent on itself and on P1 (same site, P1 depends
        // on P0); P2 also depends on nothing yet, so only two edges fire.
        let mut forwarded = Vec::new();
        while let Some(probe) = sim.channel().try_pop() {
            forwarded.push(probe);
        }
        assert_eq!(
            forwarded,
            vec![Probe::new(pid(1), pid(0), pid(1)), Probe::new(pid(1), pid(1), pid(2))]
        );
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());
        let probe = Probe::new(pid(0), pid(0), pid(1));

        assert_eq!(sim.receive_probe(probe), Some(Admission::Confirmed));
        let dependents = sim.registry().lock(pid(1)).unwrap().dependent_ids();
        let pending = sim.channel().pending();

        assert_eq!(sim.receive_probe(probe), Some(Admission::AlreadyDependent));

        let p1 = sim.registry().lock(pid(1)).unwrap();
        assert_eq!(p1.received_count(), 2);
        assert_eq!(p1.dependent_ids(), dependents);
        assert_eq!(sim.channel().pending(), pending);
    }

    #[test]
    fn test_cross_site_only_filters_local_edges() {
        let protocol = ProtocolConfig {
            site_policy: SitePolicy::CrossSiteOnly,
            ..Default::default()
        };
        let sim = triangle([0, 0, 1], protocol);

        assert!(sim.send_probe(pid(0), pid(0), pid(1)).is_none());
        assert!(sim.send_probe(pid(1), pid(1), pid(2)).is_some());

        sim.drain(1_000);
        // The local hop 0 -> 1 never carries a probe, so the cycle is missed
        assert!(sim.deadlocked().is_empty());
    }

    #[test]
    fn test_cross_site_only_detects_fully_distributed_cycle() {
        let protocol = ProtocolConfig {
            site_policy: SitePolicy::CrossSiteOnly,
            ..Default::default()
        };
        let sim = triangle([0, 1, 2], protocol);
        sim.send_probe(pid(0), pid(0), pid(1));

        sim.drain(1_000);
        assert_eq!(sim.deadlocked(), vec![pid(0)]);
    }

    #[test]
    fn test_first_per_sender_guard_suppresses_forwarding() {
        let protocol = ProtocolConfig {
            duplicate_guard: DuplicateGuard::FirstPerSender,
            ..Default::default()
        };
        let sim = triangle([0, 0, 0], protocol);

        assert_eq!(sim.receive_probe(Probe::new(pid(0), pid(0), pid(1))), Some(Admission::Confirmed));
        assert_eq!(
            sim.receive_probe(Probe::new(pid(2), pid(0), pid(1))),
            Some(Admission::GuardRejected)
        );
        assert!(!sim.registry().lock(pid(1)).unwrap().is_dependent(pid(2)));
    }

    #[test]
    fn test_inactive_receiver_is_counted_not_expanded() {
        let sim = Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::active(1, 0),
            ],
            ProtocolConfig::default(),
        )
        .unwrap();
        sim.send_probe(pid(0), pid(0), pid(1));
        sim.drain(10);

        let p1 = sim.registry().lock(pid(1)).unwrap();
        assert_eq!(p1.received_count(), 1);
        assert!(p1.dependent_ids().is_empty());
        assert_eq!(sim.deliveries(), 1);
    }

    #[test]
    fn test_wait_on_at_runtime_closes_cycle() {
        let sim = Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::active(1, 1),
            ],
            ProtocolConfig::default(),
        )
        .unwrap();

        // No edge yet: no probe
        assert!(sim.send_probe(pid(1), pid(1), pid(0)).is_none());

        sim.wait_on(pid(1), pid(0)).unwrap();
        assert!(sim.registry().lock(pid(1)).unwrap().is_blocked());
        sim.send_probe(pid(1), pid(1), pid(0));
        sim.drain(100);

        assert_eq!(sim.deadlocked(), vec![pid(1)]);
        assert!(matches!(
            sim.wait_on(pid(0), pid(4)),
            Err(ConfigError::UnknownParticipant { .. })
        ));
        assert!(matches!(
            sim.wait_on(pid(4), pid(0)),
            Err(ConfigError::UnknownWaiter { waiter }) if waiter == pid(4)
        ));
    }

    #[test]
    fn test_self_loop_edge_deadlocks_but_block_on_self_does_not() {
        let sim = Simulation::new(
            &[
                ParticipantDescriptor::blocked(0, 0, &[0]),
                ParticipantDescriptor::active(1, 0),
            ],
            ProtocolConfig::default(),
        )
        .unwrap();

        sim.send_probe(pid(0), pid(0), pid(0));
        sim.drain(10);
        assert_eq!(sim.deadlocked(), vec![pid(0)]);

        assert!(sim.block_on_self(pid(1)));
        sim.send_probe(pid(1), pid(1), pid(1));
        sim.drain(10);
        assert_eq!(sim.deadlocked(), vec![pid(0)]);
        assert!(!sim.block_on_self(pid(9)));
    }

    #[test]
    fn test_event_journal_records_protocol_steps() {
        let sim = triangle([0, 0, 0], ProtocolConfig::default());
        sim.send_probe(pid(0), pid(0), pid(1));
        sim.step();

        let events = sim.events();
        assert_eq!(events[0], ProtocolEvent::ProbeSent { probe: Probe::new(pid(0), pid(0), pid(1)) });
        assert_eq!(events[1], ProtocolEvent::ProbeReceived { probe: Probe::new(pid(0), pid(0), pid(1)) });
        assert_eq!(
            events[2],
            ProtocolEvent::DependencyConfirmed {
                participant: pid(1),
                origin: pid(0)
            }
        );
        assert_eq!(events[3], ProtocolEvent::ProbeSent { probe: Probe::new(pid(0), pid(1), pid(2)) });
    }
}
