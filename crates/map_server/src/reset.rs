//! Instance reset scheduling.
//!
//! Two kinds of events share one time-ordered queue:
//!
//! - a **normal dungeon** event resets a single instance once it has been
//!   empty for its template's reset delay;
//! - a **raid** reset walks through warning stages before resetting every
//!   instance of the template, then schedules itself one period later.
//!
//! The scheduler only decides *what* is due. The registry applies the
//! returned [`ResetAction`]s to live maps and persistent states.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResetEventKind {
    NormalDungeon,
    Inform1,
    Inform2,
    Inform3,
    InformLast,
    ForcedInform1,
    ForcedInform2,
    ForcedInform3,
    ForcedInformLast,
}

const INFORM_STAGES: [ResetEventKind; 4] = [
    ResetEventKind::Inform1,
    ResetEventKind::Inform2,
    ResetEventKind::Inform3,
    ResetEventKind::InformLast,
];

impl ResetEventKind {
    /// How long before the reset time this stage fires.
    pub fn lead_time_ms(self) -> u64 {
        let seconds = match self {
            ResetEventKind::NormalDungeon => 0,
            ResetEventKind::Inform1 => 3600,
            ResetEventKind::Inform2 => 900,
            ResetEventKind::Inform3 => 300,
            ResetEventKind::InformLast => 60,
            ResetEventKind::ForcedInform1 => 60,
            ResetEventKind::ForcedInform2 => 30,
            ResetEventKind::ForcedInform3 => 10,
            ResetEventKind::ForcedInformLast => 5,
        };
        seconds * 1000
    }

    /// The last stage performs the reset instead of warning.
    pub fn is_last(self) -> bool {
        matches!(self, ResetEventKind::InformLast | ResetEventKind::ForcedInformLast)
    }

    fn next(self) -> Self {
        match self {
            ResetEventKind::Inform1 => ResetEventKind::Inform2,
            ResetEventKind::Inform2 => ResetEventKind::Inform3,
            ResetEventKind::Inform3 => ResetEventKind::InformLast,
            ResetEventKind::ForcedInform1 => ResetEventKind::ForcedInform2,
            ResetEventKind::ForcedInform2 => ResetEventKind::ForcedInform3,
            ResetEventKind::ForcedInform3 => ResetEventKind::ForcedInformLast,
            other => other,
        }
    }

    /// First warning stage that still fits before `reset_time`.
    fn first_stage(reset_time: u64, now: u64) -> Self {
        INFORM_STAGES
            .into_iter()
            .find(|stage| reset_time > now + stage.lead_time_ms())
            .unwrap_or(ResetEventKind::InformLast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetEvent {
    pub kind: ResetEventKind,
    pub template_id: u32,
    /// 0 for template-wide (raid) events.
    pub instance_id: u32,
}

impl ResetEvent {
    pub fn normal_dungeon(template_id: u32, instance_id: u32) -> Self {
        Self { kind: ResetEventKind::NormalDungeon, template_id, instance_id }
    }
}

/// Work the registry must carry out for a due event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAction {
    /// Reset one dungeon instance.
    ResetInstance { template_id: u32, instance_id: u32 },
    /// Tell every occupant of the template's instances about the reset.
    Warn { template_id: u32, time_left_ms: u64 },
    /// Reset every instance of the template.
    ResetAll { template_id: u32 },
}

#[derive(Debug, Default)]
pub struct ResetScheduler {
    queue: BTreeMap<u64, Vec<ResetEvent>>,
    reset_times: HashMap<u32, u64>,
    periods: HashMap<u32, u64>,
}

impl ResetScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reset_time_for(&self, template_id: u32) -> Option<u64> {
        self.reset_times.get(&template_id).copied()
    }

    pub fn set_reset_time_for(&mut self, template_id: u32, reset_time_ms: u64) {
        self.reset_times.insert(template_id, reset_time_ms);
    }

    /// Adds `event` at `due_ms`, or cancels it.
    ///
    /// Cancelling looks at `due_ms` first and falls back to the whole queue,
    /// in case the due time changed since the event was added.
    pub fn schedule(&mut self, add: bool, due_ms: u64, event: ResetEvent) {
        if add {
            self.queue.entry(due_ms).or_default().push(event);
            return;
        }

        if Self::remove_from_bucket(&mut self.queue, due_ms, &event) {
            return;
        }
        let other_due = self
            .queue
            .iter()
            .find(|(_, events)| events.contains(&event))
            .map(|(due, _)| *due);
        match other_due {
            Some(due) => {
                Self::remove_from_bucket(&mut self.queue, due, &event);
            }
            None => error!(
                "❌ Can not cancel reset: event {:?} for map {} instance {} was not found",
                event.kind, event.template_id, event.instance_id
            ),
        }
    }

    fn remove_from_bucket(queue: &mut BTreeMap<u64, Vec<ResetEvent>>, due_ms: u64, event: &ResetEvent) -> bool {
        let Some(events) = queue.get_mut(&due_ms) else {
            return false;
        };
        let Some(position) = events.iter().position(|e| e == event) else {
            return false;
        };
        events.remove(position);
        if events.is_empty() {
            queue.remove(&due_ms);
        }
        true
    }

    /// Starts the warning cycle of a raid template with the given reset
    /// period. Keeps an already known reset time.
    pub fn schedule_global_reset(&mut self, template_id: u32, period_ms: u64, now_ms: u64) {
        if period_ms == 0 {
            return;
        }
        self.periods.insert(template_id, period_ms);
        let reset_time = *self.reset_times.entry(template_id).or_insert(now_ms + period_ms);
        let kind = ResetEventKind::first_stage(reset_time, now_ms);
        self.schedule(
            true,
            reset_time.saturating_sub(kind.lead_time_ms()),
            ResetEvent { kind, template_id, instance_id: 0 },
        );
        debug!("⏰ Raid {} resets at {}ms (first stage {:?})", template_id, reset_time, kind);
    }

    /// Pops every event due at `now_ms` and returns what has to happen.
    pub fn poll(&mut self, now_ms: u64) -> Vec<ResetAction> {
        let mut actions = Vec::new();

        loop {
            let Some(mut entry) = self.queue.first_entry() else {
                break;
            };
            if *entry.key() > now_ms {
                break;
            }
            let event = entry.get_mut().remove(0);
            if entry.get().is_empty() {
                entry.remove();
            }

            if event.kind == ResetEventKind::NormalDungeon {
                actions.push(ResetAction::ResetInstance {
                    template_id: event.template_id,
                    instance_id: event.instance_id,
                });
                continue;
            }

            let reset_time = self.reset_time_for(event.template_id).unwrap_or(now_ms);
            if !event.kind.is_last() {
                actions.push(ResetAction::Warn {
                    template_id: event.template_id,
                    time_left_ms: reset_time.saturating_sub(now_ms),
                });
                let next = ResetEvent { kind: event.kind.next(), ..event };
                self.schedule(true, reset_time.saturating_sub(next.kind.lead_time_ms()), next);
                continue;
            }

            actions.push(ResetAction::ResetAll { template_id: event.template_id });
            let Some(period) = self.periods.get(&event.template_id).copied() else {
                continue;
            };
            let next_reset = reset_time.max(now_ms) + period;
            self.reset_times.insert(event.template_id, next_reset);
            let kind = ResetEventKind::first_stage(next_reset, now_ms);
            self.schedule(
                true,
                next_reset.saturating_sub(kind.lead_time_ms()),
                ResetEvent { kind, ..event },
            );
        }

        actions
    }

    /// Brings every raid reset forward to the short forced warning cycle.
    pub fn reset_all_raids(&mut self, now_ms: u64) {
        let lead = ResetEventKind::ForcedInform1.lead_time_ms();
        let mut queue: BTreeMap<u64, Vec<ResetEvent>> = BTreeMap::new();

        for (due, events) in std::mem::take(&mut self.queue) {
            for event in events {
                if event.kind == ResetEventKind::NormalDungeon {
                    queue.entry(due).or_default().push(event);
                    continue;
                }
                self.reset_times.insert(event.template_id, now_ms + lead);
                queue.entry(now_ms).or_default().push(ResetEvent {
                    kind: ResetEventKind::ForcedInform1,
                    ..event
                });
            }
        }
        self.queue = queue;
    }
}
