//! Stdout writer for received messages
//!
//! One line per message:
//!
//! ```text
//! imptcp default host.example.com 10.0.0.7 <13>Oct 16 10:00:00 host app: started
//! ```

use std::io::{self, Write};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ptcp_server::Message;

/// Write messages to stdout until the channel closes or `cancel` fires
///
/// On cancel the channel is closed and whatever is already queued is still
/// written. Returns the number of messages written.
pub async fn write_messages(
    mut receiver: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> io::Result<u64> {
    let stdout = io::stdout();
    let mut written = 0u64;

    loop {
        let message = tokio::select! {
            message = receiver.recv() => message,
            _ = cancel.cancelled() => {
                receiver.close();
                receiver.recv().await
            }
        };
        let Some(message) = message else {
            break;
        };

        let mut out = stdout.lock();
        write_line(&mut out, &message)?;
        written += 1;

        // Drain whatever is queued before flushing
        while let Ok(message) = receiver.try_recv() {
            write_line(&mut out, &message)?;
            written += 1;
        }
        out.flush()?;
    }

    Ok(written)
}

fn write_line(out: &mut impl Write, message: &Message) -> io::Result<()> {
    write!(
        out,
        "{} {} {} {} ",
        message.input_name, message.ruleset, message.hostname, message.ip
    )?;
    out.write_all(&message.data)?;
    out.write_all(b"\n")
}
