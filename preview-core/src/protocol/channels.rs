//! Versioned set of named channels shared by both ends of a link.
//!
//! Channel ids on the wire are indices into [`ChannelSet::names`]. Both
//! peers must be built with the same set; the version is exchanged during
//! the ready handshake.

use std::collections::HashMap;

use crate::error::PreviewError;

/// Well-known channel names.
pub mod names {
    pub const READY: &str = "ready";
    pub const STOP: &str = "stop";
    pub const DETACH: &str = "detach";
    pub const PROGRESS: &str = "progress";
    pub const SAMPLE_RATE: &str = "sample_rate";
    pub const VALUE: &str = "value";
    pub const EXPOSURE: &str = "exposure";
    pub const GAMMA: &str = "gamma";
    pub const FOV: &str = "fov";
    pub const ENV_ROTATION: &str = "env_rotation";
    pub const INTERACTIVE_SAMPLES: &str = "interactive_samples";
    pub const PROMPT: &str = "prompt";
    pub const LOAD_MODEL: &str = "load_model";
    pub const IS_PLAYING: &str = "is_playing";
    pub const RENDER_PREVIEW: &str = "render_preview";
    pub const HDR_HEADER: &str = "hdr_header";
    pub const HDR_PACKET: &str = "hdr_packet";
}

pub const DEFAULT_VERSION: u32 = 1;

const DEFAULT_NAMES: [&str; 17] = [
    names::READY,
    names::STOP,
    names::DETACH,
    names::PROGRESS,
    names::SAMPLE_RATE,
    names::VALUE,
    names::EXPOSURE,
    names::GAMMA,
    names::FOV,
    names::ENV_ROTATION,
    names::INTERACTIVE_SAMPLES,
    names::PROMPT,
    names::LOAD_MODEL,
    names::IS_PLAYING,
    names::RENDER_PREVIEW,
    names::HDR_HEADER,
    names::HDR_PACKET,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    version: u32,
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl ChannelSet {
    /// Build a set from an ordered list of names. Duplicates are rejected.
    pub fn new<I, S>(version: u32, names: I) -> Result<Self, PreviewError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut ids = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if ids.insert(name.clone(), idx as u32).is_some() {
                return Err(PreviewError::Other(format!("duplicate channel name: {name}")));
            }
        }
        Ok(Self { version, names, ids })
    }

    /// The channel set used by the preview server and client.
    pub fn default_set() -> Self {
        let names: Vec<String> = DEFAULT_NAMES.iter().map(|n| n.to_string()).collect();
        let ids = names
            .iter()
            .enumerate()
            .map(|(idx, n)| (n.clone(), idx as u32))
            .collect();
        Self {
            version: DEFAULT_VERSION,
            names,
            ids,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn id(&self, name: &str) -> Result<u32, PreviewError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| PreviewError::UnknownChannel(name.to_string()))
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::default_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_indices() {
        let set = ChannelSet::default_set();
        assert_eq!(set.version(), 1);
        assert_eq!(set.id(names::READY).unwrap(), 0);
        assert_eq!(set.name(set.id(names::HDR_PACKET).unwrap()), Some("hdr_packet"));
        assert_eq!(set.len(), 17);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let set = ChannelSet::default_set();
        assert!(matches!(
            set.id("camera_pose"),
            Err(PreviewError::UnknownChannel(_))
        ));
        assert_eq!(set.name(999), None);
    }

    #[test]
    fn duplicates_rejected() {
        assert!(ChannelSet::new(2, ["a", "b", "a"]).is_err());
        let set = ChannelSet::new(2, ["a", "b"]).unwrap();
        assert_eq!(set.id("b").unwrap(), 1);
    }
}
