//! Event and video outputs.

mod mqtt;
mod video;

use anyhow::Result;

use crate::counter::Event;

pub use mqtt::{MqttPublisher, MqttSettings};
pub use video::{open_video_sink, NullVideoSink, RawVideoSink, VideoSink};

pub const COUNT_TOPIC: &str = "person";
pub const DURATION_TOPIC: &str = "person/duration";

/// Topic-based event delivery.
pub trait PublishSink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Drops every event. Used when publishing is disabled.
#[derive(Debug, Default)]
pub struct DisabledPublisher;

impl PublishSink for DisabledPublisher {
    fn publish(&mut self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Resolved topic names, optionally under a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub count: String,
    pub duration: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("")
    }
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim().trim_end_matches('/');
        if prefix.is_empty() {
            return Self {
                count: COUNT_TOPIC.to_string(),
                duration: DURATION_TOPIC.to_string(),
            };
        }
        Self {
            count: format!("{}/{}", prefix, COUNT_TOPIC),
            duration: format!("{}/{}", prefix, DURATION_TOPIC),
        }
    }

    pub fn topic_for(&self, event: &Event) -> &str {
        match event {
            Event::CountUpdate { .. } => &self.count,
            Event::DurationReport { .. } => &self.duration,
        }
    }
}

/// Serialize and publish one event.
pub fn publish_event(sink: &mut dyn PublishSink, topics: &Topics, event: &Event) -> Result<()> {
    let payload = event.payload()?;
    sink.publish(topics.topic_for(event), payload)
}
