//! Response synthesis for matched expectations.

mod full;
mod synthesize;
mod types;

pub use synthesize::{synthesize, ResponseSource, Synthesis, SynthesizedReply};
pub use types::{
    AsyncBodyFn, AsyncFullFn, BodyCallback, BodyStream, FullReplyCallback, Reply, ReplyBody,
    StaticBody, StreamFactory, SyncBodyFn, SyncFullFn,
};
