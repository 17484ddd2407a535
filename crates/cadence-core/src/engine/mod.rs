//! Real-time engine: command queue, telemetry, and the mixing core

mod command;
mod mixer;
mod telemetry;

pub use command::{command_channel, EngineCommand, COMMAND_QUEUE_CAPACITY};
pub use mixer::{PlaybackEngine, MAX_BUFFER_SIZE};
pub use telemetry::{
    retired_channel, telemetry_channel, EngineEvent, LevelFrame, RETIRED_QUEUE_CAPACITY,
    TELEMETRY_QUEUE_CAPACITY,
};
