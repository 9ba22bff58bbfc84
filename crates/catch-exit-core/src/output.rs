//! Output channel with stackable capture frames.
//!
//! An [`OutputChannel`] is the explicit stand-in for "the default output
//! channel". Code that wants its output to be capturable writes through a
//! channel handle instead of straight to stdout. While a frame is open,
//! writes accumulate in the innermost frame; with no frame open they reach
//! the channel's sink.

use std::io::{self, Write};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// Identifies a capture frame on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Final destination of uncaptured output.
#[derive(Debug, Clone)]
pub enum Sink {
    Stdout,
    Stderr,
    /// In-memory sink, readable through [`OutputChannel::emitted`].
    Memory(Arc<Mutex<Vec<u8>>>),
}

impl Sink {
    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().lock().write_all(bytes),
            Self::Stderr => io::stderr().lock().write_all(bytes),
            Self::Memory(buf) => {
                buf.lock().extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().lock().flush(),
            Self::Stderr => io::stderr().lock().flush(),
            Self::Memory(_) => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Frame {
    id: FrameId,
    buf: Vec<u8>,
}

#[derive(Debug)]
struct ChannelState {
    sink: Sink,
    frames: Vec<Frame>,
    next_frame: u64,
}

impl ChannelState {
    fn position(&self, frame: FrameId) -> Option<usize> {
        self.frames.iter().rposition(|f| f.id == frame)
    }
}

/// Cloneable handle to an output channel. Clones share frames and sink.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl OutputChannel {
    #[must_use]
    pub fn new(sink: Sink) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                sink,
                frames: Vec::new(),
                next_frame: 1,
            })),
        }
    }

    /// A fresh channel over an in-memory sink.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Sink::Memory(Arc::new(Mutex::new(Vec::new()))))
    }

    /// The process-wide channel over stdout.
    #[must_use]
    pub fn stdout() -> Self {
        static STDOUT: OnceLock<OutputChannel> = OnceLock::new();
        STDOUT
            .get_or_init(|| OutputChannel::new(Sink::Stdout))
            .clone()
    }

    /// Open a new innermost capture frame.
    pub fn begin(&self) -> FrameId {
        let mut state = self.state.lock();
        let id = FrameId(state.next_frame);
        state.next_frame += 1;
        state.frames.push(Frame {
            id,
            buf: Vec::new(),
        });
        id
    }

    /// Text captured by `frame` so far, without closing it. `None` if the
    /// frame is not open.
    #[must_use]
    pub fn contents(&self, frame: FrameId) -> Option<String> {
        let state = self.state.lock();
        let pos = state.position(frame)?;
        Some(String::from_utf8_lossy(&state.frames[pos].buf).into_owned())
    }

    /// Close `frame` and return what it captured. `None` if the frame is not
    /// open. Frames opened after it stay open.
    pub fn drain(&self, frame: FrameId) -> Option<String> {
        let mut state = self.state.lock();
        let pos = state.position(frame)?;
        let closed = state.frames.remove(pos);
        Some(String::from_utf8_lossy(&closed.buf).into_owned())
    }

    /// Close `frame` and drop what it captured. Returns the number of bytes
    /// dropped, or `None` if the frame is not open.
    pub fn discard(&self, frame: FrameId) -> Option<usize> {
        let mut state = self.state.lock();
        let pos = state.position(frame)?;
        Some(state.frames.remove(pos).buf.len())
    }

    /// Whether `frame` is still open.
    #[must_use]
    pub fn is_open(&self, frame: FrameId) -> bool {
        self.state.lock().position(frame).is_some()
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Everything that reached an in-memory sink. Empty for stdout/stderr sinks.
    #[must_use]
    pub fn emitted(&self) -> String {
        match &self.state.lock().sink {
            Sink::Memory(buf) => String::from_utf8_lossy(&buf.lock()).into_owned(),
            Sink::Stdout | Sink::Stderr => String::new(),
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.frames.last_mut() {
            Some(top) => {
                top.buf.extend_from_slice(bytes);
                Ok(())
            }
            None => state.sink.write_all(bytes),
        }
    }

    fn flush_sink(&self) -> io::Result<()> {
        let sink = self.state.lock().sink.clone();
        sink.flush()
    }
}

impl Write for &OutputChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_sink()
    }
}

impl Write for OutputChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}
