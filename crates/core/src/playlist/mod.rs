//! Ordered playlists and the cursor the engine advances on natural end.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FrameSource, LedCtlError, Result, SourceDescriptor};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub source: SourceDescriptor,
    /// Time on screen before advancing. Without it the entry plays until
    /// its source ends, which never happens for static/procedural sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_ms: Option<u64>,
}

impl PlaylistEntry {
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            source,
            hold_ms: None,
        }
    }

    pub fn hold(&self) -> Option<Duration> {
        self.hold_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub entries: Vec<PlaylistEntry>,
    #[serde(rename = "loop", default = "default_true")]
    pub looping: bool,
    /// Crossfade between entries; hard cut when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossfade_ms: Option<u64>,
}

impl Playlist {
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(LedCtlError::config("playlist has no entries"));
        }
        if self.entries.iter().any(|e| e.hold_ms == Some(0)) {
            return Err(LedCtlError::config("playlist hold_ms must be positive"));
        }
        Ok(())
    }
}

/// Position inside a running playlist.
#[derive(Debug, Clone)]
pub(crate) struct PlaylistCursor {
    playlist: Playlist,
    index: usize,
}

impl PlaylistCursor {
    pub(crate) fn new(playlist: Playlist) -> Self {
        Self { playlist, index: 0 }
    }

    pub(crate) fn current(&self) -> &PlaylistEntry {
        &self.playlist.entries[self.index]
    }

    /// Index of the entry after the current one, wrapping when looping.
    pub(crate) fn peek_next(&self) -> Option<usize> {
        let next = self.index + 1;
        if next < self.playlist.entries.len() {
            Some(next)
        } else if self.playlist.looping {
            Some(0)
        } else {
            None
        }
    }

    pub(crate) fn entry(&self, index: usize) -> &PlaylistEntry {
        &self.playlist.entries[index]
    }

    pub(crate) fn move_to(&mut self, index: usize) {
        self.index = index;
    }

    /// Crossfade into `next`, or `None` for a hard cut.
    pub(crate) fn transition_into(
        &self,
        next: &PlaylistEntry,
        source: &FrameSource,
    ) -> Option<Duration> {
        let configured = Duration::from_millis(self.playlist.crossfade_ms?);
        let fade = clamp_crossfade(configured, next.hold().or(source.finite_duration()));
        (!fade.is_zero()).then_some(fade)
    }
}

/// A crossfade never outlasts the entry it fades into.
pub fn clamp_crossfade(configured: Duration, next_playback: Option<Duration>) -> Duration {
    match next_playback {
        Some(limit) => configured.min(limit),
        None => configured,
    }
}
