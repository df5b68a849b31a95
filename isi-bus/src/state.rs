use isi_types::Mode;
use parking_lot::Mutex;

/// Result of an attempted mode transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Forbidden transition: state is unchanged, caller should report a
    /// precondition error upstream.
    Forbidden,
}

struct Flags {
    mode: Mode,
    camera_active: bool,
    stimulus_active: bool,
    acquisition_running: bool,
    session_name: Option<String>,
}

/// Holds `mode` plus the boolean activity flags, behind a single lock
/// (C2). Forbidden transitions return [`TransitionOutcome::Forbidden`]
/// without changing state and log a warning; transitioning to `Idle`
/// always succeeds and resets every flag.
pub struct StateCoordinator {
    inner: Mutex<Flags>,
}

impl Default for StateCoordinator {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Flags {
                mode: Mode::Idle,
                camera_active: false,
                stimulus_active: false,
                acquisition_running: false,
                session_name: None,
            }),
        }
    }
}

impl StateCoordinator {
    pub fn mode(&self) -> Mode {
        self.inner.lock().mode
    }

    pub fn camera_active(&self) -> bool {
        self.inner.lock().camera_active
    }

    pub fn stimulus_active(&self) -> bool {
        self.inner.lock().stimulus_active
    }

    pub fn acquisition_running(&self) -> bool {
        self.inner.lock().acquisition_running
    }

    pub fn session_name(&self) -> Option<String> {
        self.inner.lock().session_name.clone()
    }

    pub fn set_camera_active(&self, active: bool) {
        self.inner.lock().camera_active = active;
    }

    pub fn set_stimulus_active(&self, active: bool) {
        self.inner.lock().stimulus_active = active;
    }

    pub fn set_session_name(&self, name: Option<String>) {
        self.inner.lock().session_name = name;
    }

    /// Attempt to move to `target`. Recording blocks transitions to
    /// Preview/Playback until stopped (i.e. until a transition to Idle
    /// first); any mode may transition to Idle.
    pub fn transition_to(&self, target: Mode) -> TransitionOutcome {
        let mut flags = self.inner.lock();
        let allowed = match (flags.mode, target) {
            (_, Mode::Idle) => true,
            (Mode::Recording, Mode::Preview) | (Mode::Recording, Mode::Playback) => false,
            (Mode::Recording, Mode::Recording) => true,
            _ => true,
        };
        if !allowed {
            log::warn!(
                "forbidden mode transition: {} -> {} (cannot transition while recording)",
                flags.mode,
                target
            );
            return TransitionOutcome::Forbidden;
        }
        flags.mode = target;
        if target == Mode::Idle {
            flags.camera_active = false;
            flags.stimulus_active = false;
            flags.acquisition_running = false;
            flags.session_name = None;
        }
        if target == Mode::Recording {
            flags.acquisition_running = true;
        }
        TransitionOutcome::Applied
    }
}
