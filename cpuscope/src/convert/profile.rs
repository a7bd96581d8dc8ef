//! Sampled CPU profile and its builder
//!
//! [`Profile`] follows pprof's `profile.proto` message: serialized, its
//! fields carry the proto names (`sample_type`, `sample`, `location`,
//! `function`), so the JSON maps one to one onto a pprof profile.

use serde::Serialize;
use std::collections::HashMap;

use super::events::{Chunk, StackTrace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueType {
    #[serde(rename = "type")]
    pub kind: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub id: u64,
    /// JFR frames have no address; the line number stands in for it
    pub address: u64,
    #[serde(rename = "line")]
    pub lines: Vec<Line>,
}

/// One distinct stack, outermost frame first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    #[serde(rename = "location_id")]
    pub location_ids: Vec<u64>,
    #[serde(rename = "value")]
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    #[serde(rename = "sample_type")]
    pub sample_types: Vec<ValueType>,
    #[serde(rename = "sample")]
    pub samples: Vec<Sample>,
    #[serde(rename = "location")]
    pub locations: Vec<Location>,
    #[serde(rename = "function")]
    pub functions: Vec<Function>,
}

impl Profile {
    pub fn total_samples(&self) -> i64 {
        self.samples.iter().filter_map(|s| s.values.first()).sum()
    }
}

/// Interns functions, locations and samples for one conversion
///
/// IDs are 1-based and assigned in first-seen order.
pub struct ProfileBuilder {
    profile: Profile,
    functions: HashMap<String, u64>,
    locations: HashMap<(u64, i32), u64>,
    samples: HashMap<Vec<u64>, usize>,
}

impl ProfileBuilder {
    pub fn new() -> Self {
        Self {
            profile: Profile {
                sample_types: vec![ValueType { kind: "cpu".to_string(), unit: "samples".to_string() }],
                samples: Vec::new(),
                locations: Vec::new(),
                functions: Vec::new(),
            },
            functions: HashMap::new(),
            locations: HashMap::new(),
            samples: HashMap::new(),
        }
    }

    /// Add the runnable execution samples of `chunk`
    ///
    /// Chunks that did not sample CPU are ignored entirely.
    pub fn add_chunk(&mut self, chunk: &Chunk) {
        if chunk.sampled_event() != Some("cpu") {
            return;
        }

        for sample in chunk.execution_samples().filter(|s| s.is_runnable()) {
            if let Some(stack) = &sample.stack_trace {
                let index = self.sample(stack);
                self.profile.samples[index].values[0] += 1;
            }
        }
    }

    pub fn finish(self) -> Profile {
        self.profile
    }

    fn sample(&mut self, stack: &StackTrace) -> usize {
        let mut location_ids = Vec::with_capacity(stack.frames.len());
        for frame in stack.frames.iter().rev() {
            if let Some(name) = frame.function_name() {
                let function_id = self.function(name);
                location_ids.push(self.location(function_id, frame.line_number));
            }
        }

        if let Some(&index) = self.samples.get(&location_ids) {
            return index;
        }
        let index = self.profile.samples.len();
        self.profile.samples.push(Sample { location_ids: location_ids.clone(), values: vec![0] });
        self.samples.insert(location_ids, index);
        index
    }

    fn function(&mut self, name: String) -> u64 {
        if let Some(&id) = self.functions.get(&name) {
            return id;
        }
        let id = self.profile.functions.len() as u64 + 1;
        self.profile.functions.push(Function { id, name: name.clone() });
        self.functions.insert(name, id);
        id
    }

    #[allow(clippy::cast_sign_loss)]
    fn location(&mut self, function_id: u64, line: i32) -> u64 {
        *self.locations.entry((function_id, line)).or_insert_with(|| {
            let id = self.profile.locations.len() as u64 + 1;
            self.profile.locations.push(Location {
                id,
                address: i64::from(line) as u64,
                lines: vec![Line { function_id, line: i64::from(line) }],
            });
            id
        })
    }
}

impl Default for ProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
