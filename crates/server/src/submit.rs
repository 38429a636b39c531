//! Message hand-off
//!
//! Sessions hand every completed frame to a [`MessageSubmitter`]. The engine
//! never retains a message after submission.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SubmitError;

/// Default capacity of the channel behind [`ChannelSubmitter`]
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// How a submitter may treat a full downstream queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// Never wait; drop when the queue is full
    NoDelay,
    /// May block briefly until the queue has room
    #[default]
    LightDelay,
}

/// One received syslog frame plus its origin
#[derive(Clone)]
pub struct Message {
    /// Raw frame bytes (no delimiter, no length prefix)
    pub data: Bytes,

    /// Peer hostname, or the IP if not resolved
    pub hostname: Arc<str>,

    /// Peer IP address as text
    pub ip: Arc<str>,

    /// Ruleset the receiving server is bound to
    pub ruleset: Arc<str>,

    /// Name of the receiving input
    pub input_name: Arc<str>,

    /// Flow-control hint for the submitter
    pub flow_control: FlowControl,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("data", &String::from_utf8_lossy(&self.data))
            .field("hostname", &self.hostname)
            .field("ip", &self.ip)
            .field("ruleset", &self.ruleset)
            .field("input_name", &self.input_name)
            .finish()
    }
}

/// Downstream consumer of received messages
///
/// Called from the dispatcher and worker threads concurrently; implementations
/// must be internally synchronized.
pub trait MessageSubmitter: Send + Sync {
    /// Submit one message
    fn submit(&self, message: Message) -> Result<(), SubmitError>;

    /// Submit messages in order
    ///
    /// Stops at the first failure.
    fn submit_batch(&self, messages: Vec<Message>) -> Result<(), SubmitError> {
        for message in messages {
            self.submit(message)?;
        }
        Ok(())
    }
}

/// Submitter feeding a bounded tokio channel
///
/// Runs on plain threads, so a full channel is waited on with
/// `blocking_send` when the message allows light delay.
#[derive(Debug, Clone)]
pub struct ChannelSubmitter {
    tx: mpsc::Sender<Message>,
}

impl ChannelSubmitter {
    /// Create a submitter and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Wrap an existing sender
    pub fn from_sender(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }
}

impl MessageSubmitter for ChannelSubmitter {
    fn submit(&self, message: Message) -> Result<(), SubmitError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => match message.flow_control {
                FlowControl::NoDelay => Err(SubmitError::QueueFull),
                FlowControl::LightDelay => self
                    .tx
                    .blocking_send(message)
                    .map_err(|_| SubmitError::ChannelClosed),
            },
            Err(TrySendError::Closed(_)) => Err(SubmitError::ChannelClosed),
        }
    }
}
