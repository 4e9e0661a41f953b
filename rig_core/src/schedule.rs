//! Read-only, index-ordered valve schedule.
use std::sync::Arc;

use crate::error::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Use,
    Flush,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Use => "Use",
            Self::Flush => "Flush",
        })
    }
}

/// One scheduled actuation at a wall-clock minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEvent {
    index: u64,
    hour: u8,
    minute: u8,
    kind: EventKind,
}

impl ScheduleEvent {
    pub fn new(index: u64, hour: u8, minute: u8, kind: EventKind) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime {
                index,
                hour,
                minute,
            });
        }
        if i64::try_from(index).is_err() {
            return Err(ScheduleError::IndexTooLarge { index });
        }
        Ok(Self {
            index,
            hour,
            minute,
            kind,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }
    pub fn hour(&self) -> u8 {
        self.hour
    }
    pub fn minute(&self) -> u8 {
        self.minute
    }
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Events sorted by strictly increasing index. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStore {
    events: Arc<[ScheduleEvent]>,
}

impl ScheduleStore {
    pub fn new(events: Vec<ScheduleEvent>) -> Result<Self, ScheduleError> {
        for pair in events.windows(2) {
            if pair[1].index <= pair[0].index {
                return Err(ScheduleError::NotIncreasing {
                    index: pair[1].index,
                    previous: pair[0].index,
                });
            }
        }
        Ok(Self {
            events: events.into(),
        })
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events scheduled at `hour:minute`, in index order.
    pub fn due_at(&self, hour: u8, minute: u8) -> impl Iterator<Item = &ScheduleEvent> {
        self.events
            .iter()
            .filter(move |e| e.hour == hour && e.minute == minute)
    }
}
