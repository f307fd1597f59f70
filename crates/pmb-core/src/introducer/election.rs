//! Introducer election state machine
//!
//! Pure and synchronous: every input yields the messages to broadcast, so
//! the rules can be tested without a bus.
//!
//! | input                            | effect  | broadcast                      |
//! |----------------------------------|---------|--------------------------------|
//! | startup                          | active  | `IntroducerPresent`, roll call |
//! | `IntroducerPresent{L}`, L > own  | standby | -                              |
//! | `IntroducerRollCall`             | -       | `IntroducerPresent`            |
//! | local reconnect                  | active  | roll call                      |
//! | silence while standby            | active  | roll call                      |
//!
//! Equal levels never demote anyone, so two introducers with the same level
//! both stay active.

/// What the introducer loop observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElectionEvent {
    Startup,
    PresenceAnnounced { level: f64 },
    RollCall,
    Reconnected,
    Silence,
}

/// Messages the election wants broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElectionOutput {
    AnnouncePresence { level: f64 },
    CallRoll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Election {
    active: bool,
    level: f64,
}

impl Election {
    pub fn new(level: f64) -> Self {
        Self { active: true, level }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn handle(&mut self, event: ElectionEvent) -> Vec<ElectionOutput> {
        match event {
            ElectionEvent::Startup => {
                self.active = true;
                vec![
                    ElectionOutput::AnnouncePresence { level: self.level },
                    ElectionOutput::CallRoll,
                ]
            }
            ElectionEvent::PresenceAnnounced { level } => {
                if level > self.level {
                    self.active = false;
                }
                Vec::new()
            }
            ElectionEvent::RollCall => vec![ElectionOutput::AnnouncePresence { level: self.level }],
            ElectionEvent::Reconnected => {
                self.active = true;
                vec![ElectionOutput::CallRoll]
            }
            ElectionEvent::Silence if !self.active => {
                self.active = true;
                vec![ElectionOutput::CallRoll]
            }
            ElectionEvent::Silence => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_announces_and_calls_roll() {
        let mut e = Election::new(5.0);
        assert_eq!(
            e.handle(ElectionEvent::Startup),
            vec![ElectionOutput::AnnouncePresence { level: 5.0 }, ElectionOutput::CallRoll]
        );
        assert!(e.is_active());
    }

    #[test]
    fn test_higher_level_demotes() {
        let mut e = Election::new(3.0);
        e.handle(ElectionEvent::PresenceAnnounced { level: 5.0 });
        assert!(!e.is_active());
    }

    #[test]
    fn test_lower_or_equal_level_keeps_active() {
        let mut e = Election::new(3.0);
        e.handle(ElectionEvent::PresenceAnnounced { level: 1.0 });
        assert!(e.is_active());
        e.handle(ElectionEvent::PresenceAnnounced { level: 3.0 });
        assert!(e.is_active());
    }

    #[test]
    fn test_roll_call_answered_even_in_standby() {
        let mut e = Election::new(3.0);
        e.handle(ElectionEvent::PresenceAnnounced { level: 9.0 });
        assert_eq!(
            e.handle(ElectionEvent::RollCall),
            vec![ElectionOutput::AnnouncePresence { level: 3.0 }]
        );
        assert!(!e.is_active());
    }

    #[test]
    fn test_reconnect_reactivates() {
        let mut e = Election::new(3.0);
        e.handle(ElectionEvent::PresenceAnnounced { level: 9.0 });
        assert_eq!(e.handle(ElectionEvent::Reconnected), vec![ElectionOutput::CallRoll]);
        assert!(e.is_active());
    }

    #[test]
    fn test_silence_only_matters_in_standby() {
        let mut e = Election::new(3.0);
        assert!(e.handle(ElectionEvent::Silence).is_empty());

        e.handle(ElectionEvent::PresenceAnnounced { level: 9.0 });
        assert_eq!(e.handle(ElectionEvent::Silence), vec![ElectionOutput::CallRoll]);
        assert!(e.is_active());
    }
}
