mod client;
pub mod framer;
mod reader;

pub use client::{
    ClosedHandler, FrameGate, FrameHandler, LiveviewClient, LiveviewListener, RenderGuard,
};
pub use framer::{Frame, FramingError, StreamFramer};
pub use reader::{ByteSource, ChunkReader, HttpStreamOpener, StreamOpener};

#[cfg(test)]
pub(crate) use reader::testing;
