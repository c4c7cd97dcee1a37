//! Test doubles shared by the unit tests.

use crate::instrument_link::{InstrumentLink, LinkError};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read, Write};

/// Marker recorded in [`ScriptedLink::log`] for every `read_raw` call.
pub const READ_RAW: &str = "<read_raw>";

/// An [`InstrumentLink`] replaying canned replies.
///
/// Replies are consumed in order; the last reply of a queue is repeated
/// forever. A query without any scripted reply times out.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    replies: HashMap<String, VecDeque<String>>,
    raw: VecDeque<Vec<u8>>,
    pub log: Vec<String>,
    pub closed: bool,
    fail_close: bool,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, command: &str, reply: &str) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }

    pub fn raw_block(mut self, block: Vec<u8>) -> Self {
        self.raw.push_back(block);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl InstrumentLink for ScriptedLink {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        self.log.push(command.to_string());
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.log.push(command.to_string());
        self.replies
            .get_mut(command)
            .and_then(Self::next)
            .ok_or_else(|| LinkError::Timeout {
                command: command.to_string(),
            })
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        self.log.push(READ_RAW.to_string());
        Self::next(&mut self.raw).ok_or_else(|| LinkError::Timeout {
            command: READ_RAW.to_string(),
        })
    }

    fn close(&mut self) -> Result<(), LinkError> {
        if self.fail_close {
            return Err(LinkError::Io(std::io::Error::other("bus already gone")));
        }
        self.closed = true;
        Ok(())
    }
}

/// Wrap a payload in an IEEE 488.2 definite-length block (`#9` header).
pub fn ieee_block(payload: &[u8]) -> Vec<u8> {
    let mut block = format!("#9{:09}", payload.len()).into_bytes();
    block.extend_from_slice(payload);
    block.push(b'\n');
    block
}

/// A byte stream whose reads come from a fixed script and whose writes are
/// captured.
#[derive(Debug)]
pub struct Duplex {
    input: Cursor<Vec<u8>>,
    pub output: Vec<u8>,
}

impl Duplex {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
        }
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
