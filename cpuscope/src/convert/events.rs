//! Decoded JFR records
//!
//! Only the records the converter looks at are modelled. Every other event
//! type deserializes to [`Event::Other`].

use serde::Deserialize;

/// Thread state of an on-CPU execution sample
pub const STATE_RUNNABLE: &str = "STATE_RUNNABLE";

/// One JFR chunk: its events in recording order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Chunk {
    pub events: Vec<Event>,
}

impl Chunk {
    /// Value of the last `event` active setting, which names what the
    /// recording sampled
    pub fn sampled_event(&self) -> Option<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::ActiveSetting { name, value } if name == "event" => Some(value.as_str()),
                _ => None,
            })
            .last()
    }

    pub fn execution_samples(&self) -> impl Iterator<Item = &ExecutionSample> {
        self.events.iter().filter_map(|e| match e {
            Event::ExecutionSample(sample) => Some(sample),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ActiveSetting { name: String, value: String },
    ExecutionSample(ExecutionSample),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionSample {
    pub state: String,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
}

impl ExecutionSample {
    pub fn is_runnable(&self) -> bool {
        self.state == STATE_RUNNABLE
    }
}

/// Frames from the innermost call outwards
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StackTrace {
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub line_number: i32,
}

impl Frame {
    /// `Type.method`, if both names are known
    pub fn function_name(&self) -> Option<String> {
        let method = self.method.as_ref()?;
        match (&method.type_name, &method.name) {
            (Some(type_name), Some(name)) => Some(format!("{type_name}.{name}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Method {
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
