//! Consumers of streamed sandbox output.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::sandbox::{OutputChunk, StreamKind};

/// Receives output chunks in emission order as the runner drains them.
pub trait OutputObserver: Send + Sync {
    fn on_chunk(&self, chunk: &OutputChunk);
}

/// Prints stdout as-is and stderr in red.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver;

impl OutputObserver for ConsoleObserver {
    fn on_chunk(&self, chunk: &OutputChunk) {
        match chunk.stream {
            StreamKind::Stdout => {
                print!("{}", chunk.text);
                io::stdout().flush().ok();
            }
            StreamKind::Stderr => {
                eprint!("{}", chunk.text.red());
                io::stderr().flush().ok();
            }
        }
    }
}

/// Quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl OutputObserver for SilentObserver {
    fn on_chunk(&self, _chunk: &OutputChunk) {}
}
