//! Debounced typing indicator: "start" on the first keystroke after idle,
//! "stop" once keystrokes have paused for the idle window.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::ClientFrame;

pub const TYPING_IDLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    pub fn frame(self) -> ClientFrame {
        ClientFrame::Typing {
            is_typing: self == Self::Start,
        }
    }
}

#[derive(Debug)]
pub struct TypingIndicator {
    idle: Duration,
    /// Set while a "start" is outstanding.
    deadline: Option<Instant>,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(TYPING_IDLE)
    }
}

impl TypingIndicator {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let started = self.deadline.is_none();
        self.deadline = Some(now + self.idle);
        started.then_some(TypingSignal::Start)
    }

    /// Emits "stop" once the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// Ends an outstanding "start" right away, e.g. when the message is sent.
    pub fn cancel(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| TypingSignal::Stop)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_start_per_burst_and_stop_after_idle() {
        let t0 = Instant::now();
        let mut typing = TypingIndicator::default();

        assert_eq!(typing.keystroke(t0), Some(TypingSignal::Start));
        assert_eq!(typing.keystroke(t0 + Duration::from_millis(200)), None);
        assert_eq!(typing.keystroke(t0 + Duration::from_millis(400)), None);

        assert_eq!(typing.poll(t0 + Duration::from_millis(1_300)), None);
        assert_eq!(
            typing.poll(t0 + Duration::from_millis(1_400)),
            Some(TypingSignal::Stop)
        );
        assert_eq!(typing.poll(t0 + Duration::from_millis(2_000)), None);

        assert_eq!(
            typing.keystroke(t0 + Duration::from_millis(3_000)),
            Some(TypingSignal::Start)
        );
    }

    #[test]
    fn cancel_only_stops_an_active_indicator() {
        let mut typing = TypingIndicator::default();
        assert_eq!(typing.cancel(), None);
        typing.keystroke(Instant::now());
        assert_eq!(typing.cancel(), Some(TypingSignal::Stop));
        assert!(!typing.is_active());
    }

    #[test]
    fn signals_map_to_frames() {
        assert_eq!(TypingSignal::Start.frame(), ClientFrame::Typing { is_typing: true });
        assert_eq!(TypingSignal::Stop.frame(), ClientFrame::Typing { is_typing: false });
    }
}
