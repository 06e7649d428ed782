//! SIGUSR1 toggles pause; SIGINT and SIGTERM request a graceful shutdown.
//!
//! The handlers only bump counters. A watcher thread turns them into
//! [`Control`] transitions.

use crate::error::Error;
use crate::pipeline::control::{Control, POLL_INTERVAL};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

static PAUSE_REQUESTS: AtomicUsize = AtomicUsize::new(0);
static TERMINATE_REQUESTS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_signal(signal: libc::c_int) {
    if signal == libc::SIGUSR1 {
        PAUSE_REQUESTS.fetch_add(1, Ordering::SeqCst);
    } else {
        TERMINATE_REQUESTS.fetch_add(1, Ordering::SeqCst);
    }
}

fn set_handler(signal: libc::c_int, handler: libc::sighandler_t) -> Result<(), Error> {
    let previous = unsafe { libc::signal(signal, handler) };
    if previous == libc::SIG_ERR {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

pub fn install() -> Result<(), Error> {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGUSR1, libc::SIGINT, libc::SIGTERM] {
        set_handler(signal, handler)?;
    }
    Ok(())
}

/// Workers leave shutdown to their parent, which closes their task pipe.
pub fn ignore_interrupts() -> Result<(), Error> {
    set_handler(libc::SIGINT, libc::SIG_IGN)
}

pub struct SignalWatcher {
    stop: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    pub fn start(control: Control) -> Result<Self, Error> {
        PAUSE_REQUESTS.store(0, Ordering::SeqCst);
        TERMINATE_REQUESTS.store(0, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let interrupted = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            let interrupted = interrupted.clone();
            thread::Builder::new()
                .name("signals".to_string())
                .spawn(move || Self::watch(control, stop, interrupted))?
        };
        Ok(Self { stop, interrupted, handle: Some(handle) })
    }

    /// Polls once more after `stop` is raised so a signal that arrived just
    /// before the run ended is still reported.
    fn watch(control: Control, stop: Arc<AtomicBool>, interrupted: Arc<AtomicBool>) {
        loop {
            let stopping = stop.load(Ordering::SeqCst);
            let toggles = PAUSE_REQUESTS.swap(0, Ordering::SeqCst);
            for _ in 0..toggles {
                control.pause.toggle();
            }
            if TERMINATE_REQUESTS.swap(0, Ordering::SeqCst) > 0 && !interrupted.swap(true, Ordering::SeqCst) {
                warn!("Interrupt received, shutting down");
                control.cancel();
            }
            if stopping {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    // The request counters are process-wide.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn usr1_toggles_pause() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        install().unwrap();
        let control = Control::default();
        let mut watcher = SignalWatcher::start(control.clone()).unwrap();

        unsafe { libc::raise(libc::SIGUSR1) };
        assert!(wait_for(|| control.pause.is_paused()));
        unsafe { libc::raise(libc::SIGUSR1) };
        assert!(wait_for(|| !control.pause.is_paused()));

        assert!(!watcher.interrupted());
        assert!(!control.is_cancelled());
        watcher.stop();
    }

    #[test]
    fn interrupt_just_before_stop_is_reported() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        install().unwrap();
        let control = Control::default();
        let mut watcher = SignalWatcher::start(control.clone()).unwrap();

        unsafe { libc::raise(libc::SIGTERM) };
        watcher.stop();
        assert!(watcher.interrupted());
        assert!(control.is_cancelled());
    }
}
