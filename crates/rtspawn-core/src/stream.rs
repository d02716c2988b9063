//! Buffered streams over the parent-side ends of child pipes.

use crate::error::{Result, SpawnError};
use crate::flags::StdStream;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::str::FromStr;

/// Which end of a pipe the child inherits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// Child writes, parent reads: only the write end is inheritable
    Inbound,
    /// Parent writes, child reads: only the read end is inheritable
    Outbound,
    /// Both ends are inheritable
    Both,
}

impl PipeDirection {
    /// Map the classic signed selector (`< 0`, `> 0`, `0`)
    pub fn from_sign(sign: i32) -> Self {
        match sign {
            s if s < 0 => PipeDirection::Inbound,
            s if s > 0 => PipeDirection::Outbound,
            _ => PipeDirection::Both,
        }
    }

    /// Direction of the pipe backing a piped standard stream
    pub fn for_stream(stream: StdStream) -> Self {
        if stream.child_writes() {
            PipeDirection::Inbound
        } else {
            PipeDirection::Outbound
        }
    }

    pub fn read_inheritable(self) -> bool {
        !matches!(self, PipeDirection::Inbound)
    }

    pub fn write_inheritable(self) -> bool {
        !matches!(self, PipeDirection::Outbound)
    }
}

/// Access mode of a stream, parsed from `"r"`, `"w"`, `"r,nonblock"` or
/// `"w,nonblock"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMode {
    pub write: bool,
    pub nonblock: bool,
}

impl StreamMode {
    pub const READ: StreamMode = StreamMode {
        write: false,
        nonblock: false,
    };
    pub const WRITE: StreamMode = StreamMode {
        write: true,
        nonblock: false,
    };

    pub fn parse(mode: &str) -> Result<Self> {
        let mut parts = mode.split(',');
        let write = match parts.next().map(str::trim) {
            Some("r") => false,
            Some("w") => true,
            _ => {
                return Err(SpawnError::InvalidValue(format!(
                    "stream mode '{mode}' must start with 'r' or 'w'"
                )));
            }
        };

        let mut nonblock = false;
        for option in parts {
            match option.trim() {
                "nonblock" => nonblock = true,
                other => {
                    return Err(SpawnError::InvalidValue(format!(
                        "unknown stream option '{other}'"
                    )));
                }
            }
        }
        Ok(Self { write, nonblock })
    }

    pub fn with_nonblock(mut self, nonblock: bool) -> Self {
        self.nonblock = nonblock;
        self
    }

    /// Mode used for the parent's end of a piped standard stream
    pub fn for_stream(stream: StdStream, nonblock: bool) -> Self {
        let mode = if stream.child_writes() {
            StreamMode::READ
        } else {
            StreamMode::WRITE
        };
        mode.with_nonblock(nonblock)
    }
}

impl FromStr for StreamMode {
    type Err = SpawnError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.write { "w" } else { "r" })?;
        if self.nonblock {
            f.write_str(",nonblock")?;
        }
        Ok(())
    }
}

/// A buffered, single-direction stream over one pipe end.
///
/// The platform crates set non-blocking mode on the descriptor or handle
/// before wrapping it; the stream itself does not care.
pub enum PipeStream {
    Read(BufReader<File>),
    Write(BufWriter<File>),
}

impl PipeStream {
    pub fn new(file: File, mode: StreamMode) -> Self {
        if mode.write {
            PipeStream::Write(BufWriter::new(file))
        } else {
            PipeStream::Read(BufReader::new(file))
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, PipeStream::Write(_))
    }

    /// Flush pending output and hand back the underlying file
    pub fn into_file(self) -> io::Result<File> {
        match self {
            PipeStream::Read(reader) => Ok(reader.into_inner()),
            PipeStream::Write(writer) => writer.into_inner().map_err(|e| e.into_error()),
        }
    }
}

impl fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeStream::Read(reader) => f.debug_tuple("Read").field(reader.get_ref()).finish(),
            PipeStream::Write(writer) => f.debug_tuple("Write").field(writer.get_ref()).finish(),
        }
    }
}

fn wrong_direction(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot {op} on this pipe stream"),
    )
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PipeStream::Read(reader) => reader.read(buf),
            PipeStream::Write(_) => Err(wrong_direction("read")),
        }
    }
}

impl BufRead for PipeStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            PipeStream::Read(reader) => reader.fill_buf(),
            PipeStream::Write(_) => Err(wrong_direction("read")),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let PipeStream::Read(reader) = self {
            reader.consume(amt);
        }
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PipeStream::Write(writer) => writer.write(buf),
            PipeStream::Read(_) => Err(wrong_direction("write")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PipeStream::Write(writer) => writer.flush(),
            PipeStream::Read(_) => Ok(()),
        }
    }
}

/// The parent-side streams of a child, in stdin/stdout/stderr order
#[derive(Debug, Default)]
pub struct ProcessStreams {
    pub stdin: Option<PipeStream>,
    pub stdout: Option<PipeStream>,
    pub stderr: Option<PipeStream>,
}

impl ProcessStreams {
    pub fn from_array(streams: [Option<PipeStream>; 3]) -> Self {
        let [stdin, stdout, stderr] = streams;
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}
