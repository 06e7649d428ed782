use crate::error::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use std::fmt;
use tracing::{debug, error, info};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process-wide pause switch shared by workers and the encoder.
#[derive(Clone, Default)]
pub struct PauseFlag {
    paused: Arc<AtomicBool>,
    toggle: Arc<Mutex<()>>,
}

impl PauseFlag {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flips the flag and returns the new state.
    pub fn toggle(&self) -> bool {
        let _guard = self.toggle.lock().unwrap_or_else(|e| e.into_inner());
        let paused = !self.paused.load(Ordering::SeqCst);
        self.paused.store(paused, Ordering::SeqCst);
        if paused {
            info!("Processing paused");
        } else {
            info!("Processing resumed");
        }
        paused
    }

    pub fn set(&self, paused: bool) {
        let _guard = self.toggle.lock().unwrap_or_else(|e| e.into_inner());
        self.paused.store(paused, Ordering::SeqCst);
    }
}

/// Lifecycle of one input file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Init,
    Probing,
    Running,
    Paused,
    Draining,
    Aborting,
    Done,
}

impl State {
    fn allows(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Init, Probing | Running)
                | (Probing, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running | Paused, Draining)
                | (Init | Probing | Running | Paused | Draining, Aborting)
                | (Draining | Aborting, Done)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Init => "INIT",
            State::Probing => "PROBING",
            State::Running => "RUNNING",
            State::Paused => "PAUSED",
            State::Draining => "DRAINING",
            State::Aborting => "ABORTING",
            State::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Shared state every stage consults: pause, cancellation, the run state
/// and the first failure of the run.
#[derive(Clone, Default)]
pub struct Control {
    pub pause: PauseFlag,
    cancelled: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<Error>>>,
    states: Arc<Mutex<Vec<State>>>,
}

impl Control {
    pub fn new(pause: PauseFlag) -> Self {
        Self { pause, ..Self::default() }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records `error` unless an earlier non-cancellation error exists, then
    /// cancels the run.
    pub fn fail(&self, error: Error) {
        if !error.is_cancelled() {
            error!("{}", error);
        }
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        let replace = match failure.as_ref() {
            None => true,
            Some(existing) => existing.is_cancelled() && !error.is_cancelled(),
        };
        if replace {
            *failure = Some(error);
        }
        drop(failure);
        self.cancel();
    }

    pub fn state(&self) -> State {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.last().copied().unwrap_or_default()
    }

    /// Moves to `next` if the current state allows it. Returns whether the
    /// transition happened.
    pub fn enter(&self, next: State) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let current = states.last().copied().unwrap_or_default();
        if !current.allows(next) {
            return false;
        }
        debug!("{} -> {}", current, next);
        states.push(next);
        true
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> Vec<State> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take_failure(&self) -> Option<Error> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Blocks while paused. Returns `false` once the run is cancelled.
    pub fn wait_while_paused(&self) -> bool {
        while self.pause.is_paused() {
            if self.is_cancelled() {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_restores_the_flag() {
        let pause = PauseFlag::default();
        assert!(pause.toggle());
        assert!(!pause.toggle());
        assert!(!pause.is_paused());
    }

    #[test]
    fn first_real_failure_wins() {
        let control = Control::default();
        control.fail(Error::Cancelled);
        control.fail(Error::Algorithm("first".into()));
        control.fail(Error::Algorithm("second".into()));
        assert!(control.is_cancelled());
        match control.take_failure() {
            Some(Error::Algorithm(message)) => assert_eq!(message, "first"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn state_machine_rejects_backward_transitions() {
        let control = Control::default();
        assert!(control.enter(State::Probing));
        assert!(control.enter(State::Running));
        assert!(control.enter(State::Paused));
        assert!(control.enter(State::Running));
        assert!(control.enter(State::Aborting));
        assert!(!control.enter(State::Running));
        assert!(!control.enter(State::Draining));
        assert!(control.enter(State::Done));
        assert!(!control.enter(State::Aborting));
        assert_eq!(control.state(), State::Done);
        assert_eq!(
            control.history(),
            [State::Probing, State::Running, State::Paused, State::Running, State::Aborting, State::Done]
        );
    }

    #[test]
    fn paused_wait_returns_on_cancellation() {
        let control = Control::default();
        control.pause.set(true);
        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(100));
        control.cancel();
        assert!(!waiter.join().unwrap());
    }
}
