//! Session timer support (RFC 4028)

use super::MIN_SESSION_EXPIRES;
use sip_core::transaction::TsxResponse;
use sip_core::{IncomingRequest, OutgoingResponse, Request};
use sip_types::header::typed::{MinSe, Refresher, Require, SessionExpires};
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// Session timer preferences of this endpoint
#[derive(Debug, Clone, Copy)]
pub struct SessionTimerConfig {
    pub enabled: bool,
    /// Interval this endpoint offers, seconds
    pub interval_secs: u32,
}

impl Default for SessionTimerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 1800,
        }
    }
}

/// What the timer firing means for this side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRole {
    /// Timers are off for this session
    Off,
    /// This side sends the refresh at `expires / 2`
    Refresher,
    /// The peer refreshes; absence of a refresh ends the session at
    /// `expires * 1.1`
    Observer,
}

impl SessionTimerConfig {
    /// Add the timer headers to an outgoing INVITE or UPDATE
    pub fn populate_request(&self, request: &mut Request) {
        request.headers.insert_named(&SessionExpires {
            delta_secs: self.interval_secs,
            refresher: Refresher::Unspecified,
        });

        request.headers.insert_named(&MinSe(MIN_SESSION_EXPIRES));
    }

    /// UAC: derive the timer from the 2xx of the peer
    pub fn timer_from_response(&self, response: &TsxResponse) -> SessionTimer {
        if !self.enabled {
            return SessionTimer::off();
        }

        let Ok(se) = response.headers.get_named::<SessionExpires>() else {
            return SessionTimer::off();
        };

        if se.delta_secs < MIN_SESSION_EXPIRES {
            return SessionTimer::off();
        }

        let role = match se.refresher {
            // no assignment means the caller refreshes
            Refresher::Uac | Refresher::Unspecified => TimerRole::Refresher,
            Refresher::Uas => TimerRole::Observer,
        };

        SessionTimer::new(role, se.delta_secs)
    }

    /// UAS: derive the timer from the INVITE and stamp the negotiated
    /// interval onto the success response
    pub fn on_responding_success(
        &self,
        response: &mut OutgoingResponse,
        invite: &IncomingRequest,
    ) -> SessionTimer {
        if !self.enabled {
            return SessionTimer::off();
        }

        let Ok(se) = invite.headers.get_named::<SessionExpires>() else {
            return SessionTimer::off();
        };

        if se.delta_secs < MIN_SESSION_EXPIRES {
            return SessionTimer::off();
        }

        let min_se = invite
            .headers
            .get_named::<MinSe>()
            .map(|min_se| min_se.0)
            .unwrap_or(MIN_SESSION_EXPIRES);

        let delta_secs = se.delta_secs.max(min_se);

        // we refresh only when the peer assigned the role to us
        let (role, refresher) = match se.refresher {
            Refresher::Uas => (TimerRole::Refresher, Refresher::Uas),
            Refresher::Uac | Refresher::Unspecified => (TimerRole::Observer, Refresher::Uac),
        };

        response.msg.headers.insert_named(&Require::new("timer"));
        response.msg.headers.insert_named(&SessionExpires {
            delta_secs,
            refresher,
        });

        SessionTimer::new(role, delta_secs)
    }
}

/// Tracks when a session needs to be refreshed or has expired
pub struct SessionTimer {
    pub role: TimerRole,
    pub interval_secs: u32,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTimer")
            .field("role", &self.role)
            .field("interval_secs", &self.interval_secs)
            .finish_non_exhaustive()
    }
}

impl SessionTimer {
    pub fn off() -> Self {
        Self {
            role: TimerRole::Off,
            interval_secs: 0,
            deadline: None,
        }
    }

    pub fn new(role: TimerRole, interval_secs: u32) -> Self {
        let wait = match role {
            TimerRole::Off => None,
            TimerRole::Refresher => Some(refresh_after(interval_secs)),
            TimerRole::Observer => Some(expire_after(interval_secs)),
        };

        Self {
            role,
            interval_secs,
            deadline: wait.map(|d| Box::pin(sleep(d))),
        }
    }

    /// Wait until a refresh is due or the session expired; never
    /// returns with timers off
    pub async fn wait(&mut self) {
        match &mut self.deadline {
            Some(deadline) => deadline.await,
            None => pending().await,
        }
    }

    /// Re-arm after a successful refresh in either direction
    pub fn reset(&mut self) {
        let wait = match self.role {
            TimerRole::Off => return,
            TimerRole::Refresher => refresh_after(self.interval_secs),
            TimerRole::Observer => expire_after(self.interval_secs),
        };

        match &mut self.deadline {
            Some(deadline) => deadline.set(sleep(wait)),
            None => self.deadline = Some(Box::pin(sleep(wait))),
        }
    }
}

fn refresh_after(interval_secs: u32) -> Duration {
    Duration::from_secs(u64::from(interval_secs)) / 2
}

fn expire_after(interval_secs: u32) -> Duration {
    Duration::from_secs(u64::from(interval_secs)).mul_f64(1.1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intervals() {
        assert_eq!(refresh_after(1800), Duration::from_secs(900));
        assert_eq!(expire_after(1800), Duration::from_secs(1980));
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_fires_at_half_interval() {
        let mut timer = SessionTimer::new(TimerRole::Refresher, 90);

        let start = tokio::time::Instant::now();
        timer.wait().await;

        assert_eq!(start.elapsed(), Duration::from_secs(45));

        timer.reset();
        timer.wait().await;

        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_expires_late() {
        let mut timer = SessionTimer::new(TimerRole::Observer, 100);

        let start = tokio::time::Instant::now();
        timer.wait().await;

        assert_eq!(start.elapsed(), Duration::from_secs(110));
    }
}
