use crate::domain::models::{Phase, TimerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Running {
        remaining_seconds: u32,
    },
    /// The session stays in `work` with the completion guard raised until
    /// the completion is acknowledged.
    WorkComplete {
        session_index: u32,
        long_break_due: bool,
    },
    /// The session has already moved back to `work`, idle at full duration.
    BreakComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSession {
    phase: Phase,
    remaining_seconds: u32,
    running: bool,
    completed_work_sessions: u32,
    completing: bool,
}

impl TimerSession {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            phase: config.current_phase,
            remaining_seconds: config.duration_seconds(config.current_phase),
            running: false,
            completed_work_sessions: 0,
            completing: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn completed_work_sessions(&self) -> u32 {
        self.completed_work_sessions
    }

    pub fn is_awaiting_acknowledgement(&self) -> bool {
        self.completing
    }

    pub fn start(&mut self) {
        if self.remaining_seconds == 0 {
            return;
        }
        self.running = true;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn toggle(&mut self) {
        if self.running {
            self.running = false;
        } else {
            self.start();
        }
    }

    pub fn reset(&mut self, config: &TimerConfig) {
        self.running = false;
        self.completing = false;
        self.remaining_seconds = config.duration_seconds(self.phase);
    }

    pub fn select_phase(&mut self, phase: Phase, config: &TimerConfig) {
        self.phase = phase;
        self.running = false;
        self.completing = false;
        self.remaining_seconds = config.duration_seconds(phase);
    }

    /// Only decrements while running and above zero, so a late tick after
    /// completion is a no-op.
    pub fn tick(&mut self, config: &TimerConfig) -> TickOutcome {
        if !self.running || self.remaining_seconds == 0 {
            return TickOutcome::Idle;
        }

        self.remaining_seconds -= 1;
        if self.remaining_seconds > 0 {
            return TickOutcome::Running {
                remaining_seconds: self.remaining_seconds,
            };
        }

        self.running = false;
        match self.phase {
            Phase::Work => {
                self.completing = true;
                self.completed_work_sessions = self.completed_work_sessions.saturating_add(1);
                TickOutcome::WorkComplete {
                    session_index: self.completed_work_sessions,
                    long_break_due: self.long_break_due(config),
                }
            }
            Phase::ShortBreak | Phase::LongBreak => {
                self.phase = Phase::Work;
                self.remaining_seconds = config.duration_seconds(Phase::Work);
                TickOutcome::BreakComplete
            }
        }
    }

    /// Valid only while the completion guard is raised, which keeps the
    /// completion path one-shot even if acknowledgement is attempted twice.
    pub fn acknowledge_completion(&mut self, config: &TimerConfig) -> Result<Phase, String> {
        if !self.completing {
            return Err("no completed work session awaiting acknowledgement".to_string());
        }

        let next_phase = if self.long_break_due(config) {
            Phase::LongBreak
        } else {
            Phase::ShortBreak
        };
        self.completing = false;
        self.phase = next_phase;
        self.remaining_seconds = config.duration_seconds(next_phase);
        self.running = false;
        Ok(next_phase)
    }

    fn long_break_due(&self, config: &TimerConfig) -> bool {
        config.long_break_interval > 0
            && self.completed_work_sessions % config.long_break_interval == 0
    }
}
