//! MQTT topic layout: `esp-sensor-hub/<device>/<kind>`.

use heapless::String;

pub const TOPIC_PREFIX: &str = "esp-sensor-hub";
pub const TOPIC_BYTES: usize = 96;
const DEVICE_SEGMENT_BYTES: usize = 48;
const FALLBACK_DEVICE: &str = "sensor";

pub type TopicString = String<TOPIC_BYTES>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TopicKind {
    Readings,
    Status,
    Events,
    Command,
}

impl TopicKind {
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Readings => "readings",
            Self::Status => "status",
            Self::Events => "events",
            Self::Command => "command",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topics {
    base: TopicString,
}

impl Topics {
    /// Builds the topic base for a device name.
    ///
    /// Spaces and MQTT wildcard characters become `-`; an empty name falls back
    /// to a generic segment.
    pub fn for_device(device_name: &str) -> Self {
        let mut base = TopicString::new();
        let _ = base.push_str(TOPIC_PREFIX);
        let _ = base.push('/');

        let mut written = 0usize;
        for ch in device_name.trim().chars() {
            if written + ch.len_utf8() > DEVICE_SEGMENT_BYTES {
                break;
            }
            let mapped = match ch {
                ' ' | '/' | '+' | '#' => '-',
                c if c.is_control() => continue,
                c => c,
            };
            if base.push(mapped).is_err() {
                break;
            }
            written += mapped.len_utf8();
        }
        if written == 0 {
            let _ = base.push_str(FALLBACK_DEVICE);
        }

        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn topic(&self, kind: TopicKind) -> TopicString {
        let mut topic = self.base.clone();
        let _ = topic.push('/');
        let _ = topic.push_str(kind.suffix());
        topic
    }

    pub fn is_command_topic(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| rest == TopicKind::Command.suffix())
    }
}
