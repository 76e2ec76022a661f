//! Test doubles for the script runner boundary

pub mod loopback;

pub use loopback::{LoopbackRunner, McReply, RecordedResult, ScriptedReply};
