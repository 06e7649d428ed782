//! Messages exchanged with a worker process.
//!
//! Tasks travel to the worker and replies come back as bincode records,
//! one after another. The parent ends the stream by closing the worker's
//! stdin, so an empty stream between two records is the only clean end.

use crate::error::Error;
use crate::frame::Frame;
use crate::transform::{Output, Slot, Task};

use std::io::{BufRead, Read, Write};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Largest record accepted in either direction.
const MAX_MESSAGE: u64 = 1 << 30;
const MAX_DIMENSION: u32 = 1 << 16;

#[derive(Debug, Serialize, Deserialize)]
enum Reply {
    Done(Vec<Output>),
    Failed(String),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE)
}

fn wire(error: bincode::Error) -> Error {
    match *error {
        bincode::ErrorKind::Io(e) => Error::Io(e),
        other => Error::Invariant(format!("malformed worker message: {}", other)),
    }
}

fn check(frame: &Frame) -> Result<(), Error> {
    let sized = frame.width <= MAX_DIMENSION
        && frame.height <= MAX_DIMENSION
        && frame.data.len() == Frame::byte_len(frame.width, frame.height);
    if !sized {
        return Err(Error::Invariant(format!(
            "malformed {}x{} frame of {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }
    Ok(())
}

pub fn write_task(writer: &mut impl Write, task: &Task) -> Result<(), Error> {
    options().serialize_into(&mut *writer, task).map_err(wire)?;
    writer.flush()?;
    Ok(())
}

/// Reads the next task, or `None` once the parent has closed the stream.
/// A stream that ends inside a record is an error.
pub fn read_task(reader: &mut impl BufRead) -> Result<Option<Task>, Error> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let task: Task = options().deserialize_from(&mut *reader).map_err(wire)?;
    if let Some(previous) = &task.previous {
        check(previous)?;
    }
    check(&task.current)?;
    Ok(Some(task))
}

pub fn write_reply(writer: &mut impl Write, reply: &Result<Vec<Output>, Error>) -> Result<(), Error> {
    let reply = match reply {
        Ok(outputs) => Reply::Done(outputs.clone()),
        Err(Error::Algorithm(message)) => Reply::Failed(message.clone()),
        Err(other) => Reply::Failed(other.to_string()),
    };
    options().serialize_into(&mut *writer, &reply).map_err(wire)?;
    writer.flush()?;
    Ok(())
}

/// Reads a worker's reply. A failure reported by the worker comes back as
/// [`Error::Algorithm`].
pub fn read_reply(reader: &mut impl Read) -> Result<Vec<Output>, Error> {
    let reply: Reply = options().deserialize_from(&mut *reader).map_err(wire)?;
    match reply {
        Reply::Done(outputs) => {
            for (_, slot) in &outputs {
                if let Slot::Frame(frame) = slot {
                    check(frame)?;
                }
            }
            Ok(outputs)
        }
        Reply::Failed(message) => Err(Error::Algorithm(message)),
    }
}
