//! Retransmission timer bookkeeping.
//!
//! Reliable delivery requires that the oldest unacknowledged segment is
//! re-sent if no ACK arrives within a bounded time.  Exactly one timer is
//! logically active per connection, bound to the *current* oldest entry of
//! the [`crate::send_window::SendWindow`].
//!
//! The timer itself is a background task that sleeps for one RTO, then
//! checks whether its [`TimerTicket`] is still current before acting.  Arming
//! or cancelling bumps a generation counter, so a fire holding an old ticket
//! sees it has been superseded and does nothing.  The ticket check and any
//! window access happen under the same lock as ACK processing, which makes a
//! stale fire a no-op rather than a race.
//!
//! The RTO is fixed; there is no RTT estimation or back-off.

use std::time::Duration;

/// Proof that a timer was armed for a particular window entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    generation: u64,
    /// ACK key of the entry this timer guards.
    pub key: u16,
}

/// Generation-counted state of the single retransmission timer.
#[derive(Debug)]
pub struct RetransmitTimer {
    rto: Duration,
    generation: u64,
    armed: Option<u16>,
}

impl RetransmitTimer {
    pub fn new(rto: Duration) -> Self {
        Self {
            rto,
            generation: 0,
            armed: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// ACK key of the entry the timer is currently armed for.
    pub fn armed_for(&self) -> Option<u16> {
        self.armed
    }

    /// Arm the timer for the entry keyed `key`, superseding any earlier arm.
    pub fn arm(&mut self, key: u16) -> TimerTicket {
        self.generation += 1;
        self.armed = Some(key);
        TimerTicket {
            generation: self.generation,
            key,
        }
    }

    /// Cancel the pending timer; any outstanding ticket becomes stale.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.armed = None;
    }

    /// `true` while `ticket` is the most recent arm and not cancelled.
    pub fn is_current(&self, ticket: &TimerTicket) -> bool {
        self.armed.is_some() && ticket.generation == self.generation
    }

    /// The ticket of the running timer, if armed.
    pub fn ticket(&self) -> Option<TimerTicket> {
        self.armed.map(|key| TimerTicket {
            generation: self.generation,
            key,
        })
    }

    /// Re-bind the timer to the window's oldest entry.
    ///
    /// Leaves a running timer alone when the oldest entry is unchanged and
    /// returns `false`.  Otherwise cancels it, arms a fresh timer if the
    /// window is non-empty, and returns `true` so the caller can publish the
    /// new [`ticket`](Self::ticket) to the timer task.
    pub fn follow_oldest(&mut self, oldest: Option<u16>) -> bool {
        if oldest == self.armed {
            return false;
        }
        self.cancel();
        if let Some(key) = oldest {
            self.arm(key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_makes_ticket_current() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        let ticket = t.arm(1000);
        assert!(t.is_current(&ticket));
        assert_eq!(t.armed_for(), Some(1000));
        assert_eq!(ticket.key, 1000);
    }

    #[test]
    fn cancel_makes_ticket_stale() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        let ticket = t.arm(1000);
        t.cancel();
        assert!(!t.is_current(&ticket));
        assert_eq!(t.armed_for(), None);
    }

    #[test]
    fn rearm_supersedes_previous_ticket() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        let old = t.arm(1000);
        let new = t.arm(2000);
        assert!(!t.is_current(&old));
        assert!(t.is_current(&new));
    }

    #[test]
    fn ticket_reflects_latest_arm() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        assert_eq!(t.ticket(), None);
        let armed = t.arm(1000);
        assert_eq!(t.ticket(), Some(armed));
    }

    #[test]
    fn follow_oldest_keeps_timer_when_oldest_unchanged() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        assert!(t.follow_oldest(Some(1000)));
        let ticket = t.ticket().expect("armed from idle");
        assert!(!t.follow_oldest(Some(1000)));
        assert!(t.is_current(&ticket));
    }

    #[test]
    fn follow_oldest_moves_to_new_oldest() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        t.follow_oldest(Some(1000));
        let first = t.ticket().unwrap();
        assert!(t.follow_oldest(Some(2000)));
        let second = t.ticket().unwrap();
        assert!(!t.is_current(&first));
        assert!(t.is_current(&second));
        assert_eq!(second.key, 2000);
    }

    #[test]
    fn follow_oldest_cancels_when_window_empties() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        t.follow_oldest(Some(1000));
        let ticket = t.ticket().unwrap();
        assert!(t.follow_oldest(None));
        assert!(!t.is_current(&ticket));
        assert_eq!(t.ticket(), None);
        assert!(!t.follow_oldest(None));
    }
}
