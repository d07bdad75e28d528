//! Render-session controls shared between the remote UI and the server.

use std::fmt;

use crate::error::PreviewError;
use crate::network::mux::Muxer;
use crate::protocol::channels::names;
use crate::state::shared::{StateBindings, decode_field};

/// Field-of-view default, in radians (about 90.5 degrees).
pub const DEFAULT_FOV_RADIANS: f32 = 1.58;

/// Control values the remote UI can change on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub value: f32,
    pub env_rotation_degrees: f32,
    pub exposure: f32,
    pub gamma: f32,
    /// Stored in radians; the wire carries degrees.
    pub fov_radians: f32,
    pub interactive_samples: u32,
    pub prompt: String,
    /// Path of the scene or model the renderer should load next.
    pub model_path: String,
    pub is_playing: bool,
    pub stop: bool,
    pub detach: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            value: 1.0,
            env_rotation_degrees: 0.0,
            exposure: 0.0,
            gamma: 2.2,
            fov_radians: DEFAULT_FOV_RADIANS,
            interactive_samples: 1,
            prompt: String::new(),
            model_path: String::new(),
            is_playing: true,
            stop: false,
            detach: false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State(value={}, exposure={}, gamma={}, fov={:.1}deg, env_rotation={}, samples={}, playing={}, stop={}, detach={}",
            self.value,
            self.exposure,
            self.gamma,
            self.fov_radians.to_degrees(),
            self.env_rotation_degrees,
            self.interactive_samples,
            self.is_playing,
            self.stop,
            self.detach,
        )?;
        if !self.model_path.is_empty() {
            write!(f, ", model={}", self.model_path)?;
        }
        if !self.prompt.is_empty() {
            write!(f, ", prompt={:?}", self.prompt)?;
        }
        write!(f, ")")
    }
}

// ── Server-side bindings ─────────────────────────────────────────

fn set_stop(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.stop = decode_field(b)?;
    Ok(())
}

fn set_detach(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.detach = decode_field(b)?;
    Ok(())
}

fn set_value(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.value = decode_field(b)?;
    Ok(())
}

fn set_exposure(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.exposure = decode_field(b)?;
    Ok(())
}

fn set_gamma(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.gamma = decode_field(b)?;
    Ok(())
}

fn set_fov(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    let degrees: f32 = decode_field(b)?;
    s.fov_radians = degrees.to_radians();
    Ok(())
}

fn set_env_rotation(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.env_rotation_degrees = decode_field(b)?;
    Ok(())
}

fn set_samples(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.interactive_samples = decode_field(b)?;
    Ok(())
}

fn set_prompt(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.prompt = decode_field(b)?;
    Ok(())
}

fn set_model(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.model_path = decode_field(b)?;
    Ok(())
}

fn set_playing(s: &mut SessionState, b: &[u8]) -> Result<(), PreviewError> {
    s.is_playing = decode_field(b)?;
    Ok(())
}

/// One binding per control channel the server listens on.
pub fn session_bindings() -> StateBindings<SessionState> {
    StateBindings::new()
        .bind(names::STOP, set_stop)
        .bind(names::DETACH, set_detach)
        .bind(names::VALUE, set_value)
        .bind(names::EXPOSURE, set_exposure)
        .bind(names::GAMMA, set_gamma)
        .bind(names::FOV, set_fov)
        .bind(names::ENV_ROTATION, set_env_rotation)
        .bind(names::INTERACTIVE_SAMPLES, set_samples)
        .bind(names::PROMPT, set_prompt)
        .bind(names::LOAD_MODEL, set_model)
        .bind(names::IS_PLAYING, set_playing)
}

// ── RemoteControl ────────────────────────────────────────────────

/// Client-side typed setters for the server's [`SessionState`].
#[derive(Debug, Clone)]
pub struct RemoteControl {
    muxer: Muxer,
}

impl RemoteControl {
    pub fn new(muxer: Muxer) -> Self {
        Self { muxer }
    }

    pub fn set_value(&self, value: f32) -> Result<(), PreviewError> {
        self.muxer.send(names::VALUE, &value)
    }

    pub fn set_exposure(&self, exposure: f32) -> Result<(), PreviewError> {
        self.muxer.send(names::EXPOSURE, &exposure)
    }

    pub fn set_gamma(&self, gamma: f32) -> Result<(), PreviewError> {
        self.muxer.send(names::GAMMA, &gamma)
    }

    pub fn set_fov_degrees(&self, degrees: f32) -> Result<(), PreviewError> {
        self.muxer.send(names::FOV, &degrees)
    }

    pub fn set_env_rotation_degrees(&self, degrees: f32) -> Result<(), PreviewError> {
        self.muxer.send(names::ENV_ROTATION, &degrees)
    }

    pub fn set_samples(&self, samples: u32) -> Result<(), PreviewError> {
        self.muxer.send(names::INTERACTIVE_SAMPLES, &samples)
    }

    pub fn set_prompt(&self, prompt: &str) -> Result<(), PreviewError> {
        self.muxer.send(names::PROMPT, prompt)
    }

    pub fn set_model_path(&self, path: &str) -> Result<(), PreviewError> {
        self.muxer.send(names::LOAD_MODEL, path)
    }

    pub fn set_playing(&self, playing: bool) -> Result<(), PreviewError> {
        self.muxer.send(names::IS_PLAYING, &playing)
    }

    pub fn request_stop(&self) -> Result<(), PreviewError> {
        self.muxer.send(names::STOP, &true)
    }

    pub fn detach(&self) -> Result<(), PreviewError> {
        self.muxer.send(names::DETACH, &true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mux::{Demuxer, Liveness};
    use crate::protocol::channels::ChannelSet;
    use crate::state::shared::SharedState;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Wires a RemoteControl straight into a server-side demuxer.
    fn loopback() -> (RemoteControl, Demuxer, mpsc::UnboundedReceiver<crate::packet::Packet>) {
        let channels = Arc::new(ChannelSet::default_set());
        let (tx, rx) = mpsc::unbounded_channel();
        let control = RemoteControl::new(Muxer::new(Arc::clone(&channels), tx, Liveness::new()));
        let demuxer = Demuxer::new(channels, Liveness::new());
        demuxer.open();
        (control, demuxer, rx)
    }

    #[test]
    fn defaults() {
        let s = SessionState::default();
        assert_eq!(s.value, 1.0);
        assert_eq!(s.gamma, 2.2);
        assert!(s.is_playing);
        assert!(!s.stop && !s.detach);
        assert!(s.to_string().starts_with("State(value=1"));
    }

    #[test]
    fn controls_update_server_state() {
        let (control, demuxer, mut rx) = loopback();
        let state = Arc::new(SharedState::new(SessionState::default()));
        let _subs = session_bindings().install(&demuxer, &state).unwrap();

        control.set_fov_degrees(90.0).unwrap();
        control.set_exposure(-1.5).unwrap();
        control.set_samples(16).unwrap();
        control.set_model_path("/scenes/car.nif").unwrap();
        control.set_playing(false).unwrap();
        control.request_stop().unwrap();
        while let Ok(packet) = rx.try_recv() {
            demuxer.dispatch(packet);
        }

        assert!(state.state_changed());
        let s = state.consume_state();
        assert!((s.fov_radians - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(s.exposure, -1.5);
        assert_eq!(s.interactive_samples, 16);
        assert_eq!(s.model_path, "/scenes/car.nif");
        assert!(!s.is_playing);
        assert!(s.stop);

        // Consuming does not reset the fields themselves.
        assert_eq!(state.consume_state(), s);
        assert!(!state.state_changed());
    }

    #[test]
    fn every_binding_names_a_known_channel() {
        let set = ChannelSet::default_set();
        for channel in session_bindings().channels() {
            assert!(set.id(channel).is_ok(), "{channel}");
        }
    }
}
