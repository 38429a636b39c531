//! Syslog TCP Framing
//!
//! Reassembles syslog frames from a raw TCP byte stream. TCP has no message
//! boundaries, so the decoder keeps exact state across reads and can be fed
//! chunks of any size.
//!
//! # Disciplines
//!
//! The discipline is chosen per frame, by looking at the first byte:
//!
//! - **Octet-counting** (RFC 6587) - `<len> <payload>`, selected when the frame
//!   starts with an ASCII digit and counting is enabled for the server
//! - **Octet-stuffing** - the frame ends at LF or at the configured additional
//!   delimiter; everything else. In multi-line mode a delimiter only ends the
//!   frame when the next byte is `<`, the start of a new syslog header.
//!
//! # Tolerance
//!
//! Malformed input never aborts the connection. Irregularities are reported as
//! [`FramingIssue`]s next to the frames, and the caller decides how to log them.
//!
//! # Example
//!
//! ```
//! use ptcp_server::framing::{FrameDecoder, FrameEvent, FramingConfig};
//!
//! let mut decoder = FrameDecoder::new(FramingConfig::default());
//! let mut frames = Vec::new();
//! decoder.feed(b"5 hello<13>hi\n", |event| {
//!     if let FrameEvent::Frame(frame) = event {
//!         frames.push(frame);
//!     }
//! });
//! assert_eq!(frames, vec![&b"hello"[..], &b"<13>hi"[..]]);
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Default maximum size of a single message (bytes)
pub const DEFAULT_MAX_LINE_SIZE: usize = 8096;

/// Default upper bound for a declared octet count before the frame is
/// reinterpreted as octet-stuffed
pub const DEFAULT_MAX_FRAME_SIZE: usize = 200_000_000;

/// Octet counts stop growing once they pass this value
const OCTET_COUNT_CAP: usize = 200_000_000;

/// Initial buffer allocation; grows on demand up to `max_line_size`
const INITIAL_BUFFER_CAPACITY: usize = 1024;

const LF: u8 = b'\n';
const SP: u8 = b' ';

/// Framing discipline of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Delimiter-terminated (LF or additional delimiter)
    Stuffing,
    /// Length-prefixed (RFC 6587 octet-counting)
    Counting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AtFrameStart,
    InOctetCount,
    InMessage(Framing),
    /// Oversize stuffed frame already emitted; skip to the next delimiter
    Truncating,
    /// Multi-line stuffed frame saw this delimiter as the last byte of a chunk
    DelimiterPending(u8),
}

/// Framing configuration for one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingConfig {
    /// Maximum bytes kept for a single frame
    pub max_line_size: usize,

    /// Accept RFC 6587 octet-counted frames
    pub octet_counting: bool,

    /// Extra frame delimiter for octet-stuffing (e.g. NUL for some appliances)
    pub additional_delimiter: Option<u8>,

    /// Treat LF as a frame delimiter
    pub lf_delimiter: bool,

    /// Drop the remainder of an oversize stuffed frame instead of splitting it
    pub discard_truncated: bool,

    /// Ignore a single space at the start of a frame
    pub sp_framing_fix: bool,

    /// Declared octet counts above this fall back to octet-stuffing
    pub max_frame_size: usize,

    /// A delimiter not followed by `<` is part of the stuffed frame
    pub multi_line: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            octet_counting: true,
            additional_delimiter: None,
            lf_delimiter: true,
            discard_truncated: false,
            sp_framing_fix: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            multi_line: false,
        }
    }
}

impl FramingConfig {
    /// Config with a custom maximum line size
    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self {
            max_line_size,
            ..Default::default()
        }
    }

    #[inline]
    fn is_delimiter(&self, b: u8) -> bool {
        (b == LF && self.lf_delimiter) || self.additional_delimiter == Some(b)
    }
}

/// Irregularity observed while framing
///
/// None of these are fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingIssue {
    /// Octet count was not terminated by SP
    BadDelimiter(u8),

    /// Octet count below 1; frame read as octet-stuffed
    InvalidOctetCount(usize),

    /// Declared count exceeds `max_frame_size`; frame read as octet-stuffed
    FrameTooLarge { declared: usize, limit: usize },

    /// Declared count exceeds `max_line_size`; overflow bytes are discarded
    OversizeFrame { declared: usize, limit: usize },

    /// Stuffed frame reached `max_line_size` and was emitted early
    ForcedSplit { limit: usize },

    /// Stuffed frame reached `max_line_size`; the rest is discarded
    Truncated { limit: usize },

    /// Connection closed in the middle of an octet-counted frame
    IncompleteFrame { buffered: usize },
}

impl FramingIssue {
    /// Whether this issue indicates malformed or lost data
    ///
    /// Forced splits are routine and only worth a debug record.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::ForcedSplit { .. })
    }
}

impl fmt::Display for FramingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDelimiter(c) => {
                write!(f, "framing error: delimiter is not SP but has ASCII value {c}")
            }
            Self::InvalidOctetCount(n) => write!(f, "framing error: invalid octet count {n}"),
            Self::FrameTooLarge { declared, limit } => write!(
                f,
                "framing error: frame too large ({declared} > {limit}), changing to octet stuffing"
            ),
            Self::OversizeFrame { declared, limit } => write!(
                f,
                "oversize message: size is {declared} bytes, max msg size is {limit}, truncating"
            ),
            Self::ForcedSplit { limit } => {
                write!(f, "message larger than max msg size {limit}, splitting")
            }
            Self::Truncated { limit } => {
                write!(f, "message larger than max msg size {limit}, truncating")
            }
            Self::IncompleteFrame { buffered } => write!(
                f,
                "incomplete frame at end of stream, discarding {buffered} buffered bytes"
            ),
        }
    }
}

/// Output of the decoder, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete, non-empty frame (delimiter/length prefix removed)
    Frame(Bytes),
    /// An irregularity; framing continues
    Issue(FramingIssue),
}

/// Per-connection framing state machine
///
/// Single-threaded: owned by exactly one session. Stopping between two
/// `feed` calls always leaves a valid, resumable state.
#[derive(Debug)]
pub struct FrameDecoder {
    config: FramingConfig,
    state: State,
    /// Count being parsed (InOctetCount) or octets left (InMessage(Counting))
    octets: usize,
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder
    ///
    /// A `max_line_size` of 0 is treated as 1.
    pub fn new(mut config: FramingConfig) -> Self {
        config.max_line_size = config.max_line_size.max(1);
        let capacity = config.max_line_size.min(INITIAL_BUFFER_CAPACITY);
        Self {
            config,
            state: State::AtFrameStart,
            octets: 0,
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Framing configuration
    pub fn config(&self) -> &FramingConfig {
        &self.config
    }

    /// True when no partial frame is pending
    pub fn is_at_frame_start(&self) -> bool {
        self.state == State::AtFrameStart
    }

    /// Discipline of the frame in progress, if any
    pub fn current_framing(&self) -> Option<Framing> {
        match self.state {
            State::AtFrameStart => None,
            State::InOctetCount => Some(Framing::Counting),
            State::InMessage(framing) => Some(framing),
            State::Truncating | State::DelimiterPending(_) => Some(Framing::Stuffing),
        }
    }

    /// Bytes buffered for the frame in progress
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed received bytes, emitting every completed frame in arrival order
    pub fn feed<F>(&mut self, mut data: &[u8], mut emit: F)
    where
        F: FnMut(FrameEvent),
    {
        while let Some(&c) = data.first() {
            let consumed = match self.state {
                State::AtFrameStart => self.begin_frame(c),
                State::InOctetCount => self.octet_count(c, &mut emit),
                State::InMessage(Framing::Stuffing) => self.stuffed(data, &mut emit),
                State::InMessage(Framing::Counting) => self.counted(data, &mut emit),
                State::Truncating => self.truncating(data),
                State::DelimiterPending(delimiter) => {
                    self.continue_or_end(delimiter, c, &mut emit)
                }
            };
            data = &data[consumed..];
        }
    }

    /// End of stream
    ///
    /// A pending stuffed frame is emitted (peers may omit the trailing LF);
    /// a pending counted frame is reported and discarded.
    pub fn finish<F>(&mut self, mut emit: F)
    where
        F: FnMut(FrameEvent),
    {
        match self.state {
            State::AtFrameStart | State::Truncating => {}
            State::InOctetCount | State::InMessage(Framing::Counting) => {
                emit(FrameEvent::Issue(FramingIssue::IncompleteFrame {
                    buffered: self.buf.len(),
                }));
            }
            State::InMessage(Framing::Stuffing) | State::DelimiterPending(_) => {
                self.emit_frame(&mut emit)
            }
        }
        self.reset();
    }

    /// Drop any partial frame and free the buffer
    pub fn release(&mut self) {
        self.reset();
        self.buf = BytesMut::new();
    }

    /// Returns the number of bytes consumed (0 = re-process `c` in the new state)
    fn begin_frame(&mut self, c: u8) -> usize {
        if self.config.sp_framing_fix && c == SP {
            return 1;
        }
        if self.config.octet_counting && c.is_ascii_digit() {
            self.state = State::InOctetCount;
            self.octets = 0;
        } else {
            self.state = State::InMessage(Framing::Stuffing);
        }
        0
    }

    fn octet_count<F: FnMut(FrameEvent)>(&mut self, c: u8, emit: &mut F) -> usize {
        if c.is_ascii_digit() {
            if self.octets <= OCTET_COUNT_CAP {
                self.octets = self.octets * 10 + usize::from(c - b'0');
            }
            // kept in case the frame falls back to octet-stuffing
            if self.buf.len() < self.config.max_line_size {
                self.buf.put_u8(c);
            }
            return 1;
        }

        if c != SP {
            emit(FrameEvent::Issue(FramingIssue::BadDelimiter(c)));
        }

        // Unusable counts keep the digits and read the frame as octet-stuffed
        let declared = self.octets;
        if declared < 1 || declared > self.config.max_frame_size {
            let issue = if declared < 1 {
                FramingIssue::InvalidOctetCount(declared)
            } else {
                FramingIssue::FrameTooLarge {
                    declared,
                    limit: self.config.max_frame_size,
                }
            };
            emit(FrameEvent::Issue(issue));
            self.octets = 0;
            self.state = State::InMessage(Framing::Stuffing);
        } else {
            if declared > self.config.max_line_size {
                emit(FrameEvent::Issue(FramingIssue::OversizeFrame {
                    declared,
                    limit: self.config.max_line_size,
                }));
            }
            self.buf.clear();
            self.state = State::InMessage(Framing::Counting);
        }
        1
    }

    fn stuffed<F: FnMut(FrameEvent)>(&mut self, data: &[u8], emit: &mut F) -> usize {
        let limit = self.config.max_line_size;
        let end = data.iter().position(|&b| self.config.is_delimiter(b));
        let content = &data[..end.unwrap_or(data.len())];

        let mut taken = 0;
        while taken < content.len() {
            let room = limit.saturating_sub(self.buf.len());
            if room == 0 {
                if self.config.discard_truncated {
                    emit(FrameEvent::Issue(FramingIssue::Truncated { limit }));
                    self.emit_frame(emit);
                    self.state = State::Truncating;
                    return taken;
                }
                emit(FrameEvent::Issue(FramingIssue::ForcedSplit { limit }));
                self.emit_frame(emit);
                continue;
            }
            let n = room.min(content.len() - taken);
            self.buf.extend_from_slice(&content[taken..taken + n]);
            taken += n;
        }

        match end {
            Some(pos) if self.config.multi_line => match data.get(pos + 1) {
                Some(&next) => {
                    self.continue_or_end(data[pos], next, emit);
                    pos + 1
                }
                None => {
                    self.state = State::DelimiterPending(data[pos]);
                    pos + 1
                }
            },
            Some(pos) => {
                self.emit_frame(emit);
                self.state = State::AtFrameStart;
                pos + 1
            }
            None => content.len(),
        }
    }

    /// Multi-line: `next` follows `delimiter`; a `<` starts a new frame,
    /// anything else keeps the delimiter as frame content
    ///
    /// Consumes nothing; `next` is processed in the resulting state.
    fn continue_or_end<F: FnMut(FrameEvent)>(
        &mut self,
        delimiter: u8,
        next: u8,
        emit: &mut F,
    ) -> usize {
        if next == b'<' {
            self.emit_frame(emit);
            self.state = State::AtFrameStart;
        } else {
            if self.buf.len() < self.config.max_line_size {
                self.buf.put_u8(delimiter);
            }
            self.state = State::InMessage(Framing::Stuffing);
        }
        0
    }

    fn counted<F: FnMut(FrameEvent)>(&mut self, data: &[u8], emit: &mut F) -> usize {
        let n = self.octets.min(data.len());
        let room = self.config.max_line_size.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..n.min(room)]);
        self.octets -= n;
        if self.octets == 0 {
            self.emit_frame(emit);
            self.state = State::AtFrameStart;
        }
        n
    }

    fn truncating(&mut self, data: &[u8]) -> usize {
        match data.iter().position(|&b| self.config.is_delimiter(b)) {
            Some(pos) => {
                self.state = State::AtFrameStart;
                pos + 1
            }
            None => data.len(),
        }
    }

    /// Emit the buffer as a frame; zero-length frames are silently discarded
    fn emit_frame<F: FnMut(FrameEvent)>(&mut self, emit: &mut F) {
        if !self.buf.is_empty() {
            emit(FrameEvent::Frame(self.buf.split().freeze()));
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.octets = 0;
        self.state = State::AtFrameStart;
    }
}

#[cfg(test)]
#[path = "framing_test.rs"]
mod framing_test;
