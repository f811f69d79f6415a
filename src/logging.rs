use std::sync::OnceLock;

use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Formatted log lines kept for late `/api/logs` subscribers to lag behind.
pub(crate) const LOG_CHANNEL_CAPACITY: usize = 500;

/// Tees every formatted line to stdout and a broadcast channel that the
/// HTTP surface streams as Server-Sent Events.
#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).trim_end().to_string();
        let _ = self.sender.send(msg); // no receivers is fine
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

static LOG_TX: OnceLock<broadcast::Sender<String>> = OnceLock::new();

/// Install the global INFO subscriber on first call. Every call returns the
/// sender that subscriber writes to.
pub(crate) fn init() -> broadcast::Sender<String> {
    LOG_TX
        .get_or_init(|| {
            let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
            let make_writer = SseMakeWriter {
                sender: log_tx.clone(),
                suppress_stdout: false,
            };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(Level::INFO)
                .with_writer(make_writer)
                .finish();
            tracing::subscriber::set_global_default(subscriber).ok();
            log_tx
        })
        .clone()
}
