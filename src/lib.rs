//! stream-core: live-media stream lifecycle engine
//!
//! This library provides the core of a live-streaming server:
//! - A per-stream state machine (wait-publish / publishing / wait-close /
//!   closed) driven by a serialized action queue and a single timer
//! - Track bookkeeping with single-writer access-unit rings and
//!   subscriber track waits
//! - An H.265 ingress path: NALU classification, decoder-configuration
//!   build/parse, RTP aggregation-packet and fragmentation-unit handling
//! - A process-wide stream registry with a typed state-event bus
//!
//! Wire protocol servers (RTMP/RTSP/WebRTC/HLS) sit on top as adapters
//! implementing the [`Publisher`] and [`Subscriber`] traits.
//!
//! # Example: publish and subscribe
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stream_core::{EngineConfig, StreamRegistry};
//!
//! # fn adapters() -> (Arc<dyn stream_core::Publisher>, Arc<dyn stream_core::Subscriber>) { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = StreamRegistry::new(EngineConfig::default());
//!     let (publisher, subscriber) = adapters();
//!
//!     let (stream, _created) =
//!         registry.find_or_create("live/cam1", Duration::from_secs(30))?;
//!     stream.publish(publisher).await?;
//!     // Resolves once the subscriber's tracks are available
//!     stream.subscribe(subscriber).await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod peer;
pub mod promise;
pub mod registry;
pub mod stream;
pub mod track;

// Re-export main types for convenience
pub use config::{EngineConfig, PublishConfig, SubscribeConfig};
pub use error::{CodecError, Error, Result};
pub use peer::{Publisher, PublisherInfo, Subscriber, SubscriberInfo};
pub use registry::StreamRegistry;
pub use stream::{StreamEvent, StreamHandle, StreamState, StreamSummary};
pub use track::{AudioTrack, AvFrame, DataTrack, H265Track, TrackHandle, TrackKind};
