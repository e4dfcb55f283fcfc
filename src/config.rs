//! Engine, publisher and subscriber configuration

use std::time::Duration;

/// Engine-wide configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between pulse events delivered to pulse-registered subscribers
    pub pulse_interval: Duration,

    /// Capacity of the global state-event bus
    pub event_bus_capacity: usize,

    /// Capacity of each track's access-unit ring
    pub ring_capacity: usize,

    /// Default track-data timeout for streams without a publisher config
    pub publish_timeout: Duration,

    /// Default delay-close timeout for new streams
    pub delay_close_timeout: Duration,

    /// Default idle timeout for new streams
    pub idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_secs(1),
            event_bus_capacity: 64,
            ring_capacity: 256,
            publish_timeout: Duration::from_secs(10),
            delay_close_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    /// Set the pulse interval
    pub fn pulse_interval(mut self, interval: Duration) -> Self {
        self.pulse_interval = interval;
        self
    }

    /// Set the access-unit ring capacity
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the default publish (track data) timeout
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the default delay-close timeout
    pub fn delay_close_timeout(mut self, timeout: Duration) -> Self {
        self.delay_close_timeout = timeout;
        self
    }

    /// Set the default idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Per-publisher configuration
///
/// Carried by the publisher handle; the stream adopts the timeout fields
/// when the publisher is accepted.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Whether the publisher provides audio
    pub pub_audio: bool,

    /// Whether the publisher provides video
    pub pub_video: bool,

    /// Timeout for a track that stops receiving data
    pub publish_timeout: Duration,

    /// Close delay once the last subscriber leaves (requires a prior subscribe)
    pub delay_close_timeout: Duration,

    /// Close delay with no subscribers, active without any prior subscribe
    pub idle_timeout: Duration,

    /// How long the stream waits for this publisher to reconnect after loss
    pub wait_close_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            pub_audio: true,
            pub_video: true,
            publish_timeout: Duration::from_secs(10),
            delay_close_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            wait_close_timeout: Duration::ZERO,
        }
    }
}

impl PublishConfig {
    /// Set the publish (track data) timeout
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the delay-close timeout
    pub fn delay_close_timeout(mut self, timeout: Duration) -> Self {
        self.delay_close_timeout = timeout;
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the publisher reconnect window
    pub fn wait_close_timeout(mut self, timeout: Duration) -> Self {
        self.wait_close_timeout = timeout;
        self
    }

    /// Disable audio publishing
    pub fn no_audio(mut self) -> Self {
        self.pub_audio = false;
        self
    }

    /// Disable video publishing
    pub fn no_video(mut self) -> Self {
        self.pub_video = false;
        self
    }
}

/// Per-subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    /// Whether the subscriber wants audio
    pub sub_audio: bool,

    /// Whether the subscriber wants video
    pub sub_video: bool,

    /// Specific audio track names to wait for (empty = any)
    pub sub_audio_tracks: Vec<String>,

    /// Specific video track names to wait for (empty = any)
    pub sub_video_tracks: Vec<String>,

    /// Request-argument name carrying a comma-separated audio track list
    pub sub_audio_arg: String,

    /// Request-argument name carrying a comma-separated video track list
    pub sub_video_arg: String,

    /// Request-argument name carrying a comma-separated data track list
    pub sub_data_arg: String,

    /// How long the subscriber waits for its tracks before giving up
    pub wait_timeout: Duration,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            sub_audio: true,
            sub_video: true,
            sub_audio_tracks: Vec::new(),
            sub_video_tracks: Vec::new(),
            sub_audio_arg: "ats".to_string(),
            sub_video_arg: "vts".to_string(),
            sub_data_arg: "dts".to_string(),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

impl SubscribeConfig {
    /// Set the track wait timeout
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Subscribe to specific audio tracks
    pub fn audio_tracks(mut self, tracks: Vec<String>) -> Self {
        self.sub_audio_tracks = tracks;
        self
    }

    /// Subscribe to specific video tracks
    pub fn video_tracks(mut self, tracks: Vec<String>) -> Self {
        self.sub_video_tracks = tracks;
        self
    }

    /// Skip audio
    pub fn no_audio(mut self) -> Self {
        self.sub_audio = false;
        self
    }

    /// Skip video
    pub fn no_video(mut self) -> Self {
        self.sub_video = false;
        self
    }
}
