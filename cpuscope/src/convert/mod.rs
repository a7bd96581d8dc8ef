//! JFR to profile conversion
//!
//! Turns decoded Java Flight Recorder chunks into a sampled CPU profile:
//! functions, source locations and samples, each interned once. The output
//! is a pprof profile (`profile.proto`) written as JSON, not as protobuf.
//!
//! - [`events`] - the decoded JFR records accepted as input
//! - [`profile`] - the output profile and its builder

pub mod events;
pub mod profile;

pub use events::{Chunk, Event, ExecutionSample, Frame, Method, StackTrace};
pub use profile::{Function, Line, Location, Profile, ProfileBuilder, Sample, ValueType};

use std::io::Read;

use crate::domain::ConvertError;

/// Build a CPU profile from JSON-encoded JFR chunks
///
/// # Errors
/// Returns [`ConvertError::Json`] if the input is not a list of chunks
pub fn profile_from_reader<R: Read>(reader: R) -> Result<Profile, ConvertError> {
    let chunks: Vec<Chunk> = serde_json::from_reader(reader)?;

    let mut builder = ProfileBuilder::new();
    for chunk in &chunks {
        builder.add_chunk(chunk);
    }
    Ok(builder.finish())
}
