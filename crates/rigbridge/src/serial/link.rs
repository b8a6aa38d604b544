//! SerialLink - the one connection to the motor controller.
//!
//! A background task decodes inbound lines into a bounded in-process buffer so
//! that receives never block. When the device is missing or fails, the link
//! degrades to `Disconnected` instead of erroring: sends become no-ops and
//! receives report [`LinkError::Absent`], which renders as the operator-facing
//! diagnostic.
//!
//! Every state change is published on a watch channel, including a device that
//! disappears while no command is in flight.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::codec::{LineCodec, SerialLine};
use super::inbox::{INBOX_CAPACITY, Inbox, Received};
use crate::bridge::protocol::NO_CONNECTION;
use crate::config::SerialConfig;

/// Upper bound on a single line write; a stalled device is treated as lost.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the link is not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFault {
    /// The device could not be opened at all.
    NeverOpened { reason: String },
    /// The device was open and then failed (unplugged, I/O error, EOF).
    Lost { reason: String },
}

impl LinkFault {
    pub fn reason(&self) -> &str {
        match self {
            LinkFault::NeverOpened { reason } | LinkFault::Lost { reason } => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected(LinkFault),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Both fault kinds map to the same operator-facing message.
    #[error("{msg}", msg = NO_CONNECTION)]
    Absent(LinkFault),
}

type BoxedWriter = WriteHalf<Box<dyn DeviceStream>>;

/// Byte stream a link can run over.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type Opener = Box<dyn FnMut() -> io::Result<Box<dyn DeviceStream>> + Send>;

/// How to (re)open the device behind a link.
struct Origin {
    device: String,
    open: Opener,
}

struct LinkIo {
    writer: FramedWrite<BoxedWriter, LineCodec>,
    inbox: Inbox,
    reader: JoinHandle<()>,
}

impl Drop for LinkIo {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct SerialLink {
    state: LinkState,
    state_tx: Arc<watch::Sender<LinkState>>,
    io: Option<LinkIo>,
    /// Present when the link can be reopened.
    origin: Option<Origin>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("state", &self.state)
            .field("device", &self.origin.as_ref().map(|o| o.device.as_str()))
            .finish()
    }
}

impl SerialLink {
    /// Open the controller's serial device. Never fails: an unopenable device
    /// yields a `Disconnected(NeverOpened)` link.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &SerialConfig) -> Self {
        debug!(device = %config.device, baud = config.baud_rate, "Opening serial device");
        let config = config.clone();
        Self::with_opener(config.device.clone(), move || {
            let stream = open_device(&config)?;
            Ok(Box::new(stream) as Box<dyn DeviceStream>)
        })
    }

    /// Open through `open`, which is called again on every [`reopen`](Self::reopen).
    pub fn with_opener<F>(device: impl Into<String>, open: F) -> Self
    where
        F: FnMut() -> io::Result<Box<dyn DeviceStream>> + Send + 'static,
    {
        let mut link = Self::disconnected(LinkFault::NeverOpened {
            reason: "not yet opened".to_string(),
        });
        let mut origin = Origin {
            device: device.into(),
            open: Box::new(open),
        };
        match (origin.open)() {
            Ok(stream) => {
                info!(device = %origin.device, "Serial link opened");
                link.attach(stream);
            }
            Err(e) => {
                warn!(
                    device = %origin.device,
                    error = %e,
                    "Serial device unavailable; running without motor controller"
                );
                link.set_state(LinkState::Disconnected(LinkFault::NeverOpened {
                    reason: e.to_string(),
                }));
            }
        }
        link.origin = Some(origin);
        link
    }

    /// Run the link over an arbitrary byte stream.
    pub fn from_stream<S: DeviceStream>(stream: S) -> Self {
        let mut link = Self::disconnected(LinkFault::NeverOpened {
            reason: "not yet attached".to_string(),
        });
        link.attach(Box::new(stream));
        link
    }

    pub fn disconnected(fault: LinkFault) -> Self {
        let state = LinkState::Disconnected(fault);
        let (state_tx, _) = watch::channel(state.clone());
        Self {
            state,
            state_tx: Arc::new(state_tx),
            io: None,
            origin: None,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Follow state changes without holding the link.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Write `line` plus a newline. No acknowledgement is awaited.
    ///
    /// Disconnected: no I/O is attempted.
    pub async fn send(&mut self, line: &str) -> Result<(), LinkError> {
        let Some(io) = self.io.as_mut() else {
            return Err(self.absent());
        };
        if let Some(reason) = io.inbox.closed_reason() {
            self.detach(reason);
            return Err(self.absent());
        }

        let failure = match tokio::time::timeout(WRITE_TIMEOUT, io.writer.send(line)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("write failed: {e}")),
            Err(_) => Some(format!("write stalled for {WRITE_TIMEOUT:?}")),
        };

        match failure {
            None => {
                debug!(line, "Sent to controller");
                Ok(())
            }
            Some(reason) => {
                if self.is_connected() {
                    warn!(reason = %reason, "Serial link lost");
                }
                self.detach(reason);
                Err(self.absent())
            }
        }
    }

    /// Next buffered line, if any. Never waits.
    pub fn receive_one(&mut self) -> Result<Option<SerialLine>, LinkError> {
        let Some(io) = self.io.as_mut() else {
            return Err(self.absent());
        };

        let closed = match io.inbox.pop() {
            Received::Line(line) => return Ok(Some(line)),
            Received::Empty if !io.reader.is_finished() => return Ok(None),
            Received::Empty => "serial reader stopped".to_string(),
            Received::Closed(reason) => reason,
        };
        self.detach(closed);
        Err(self.absent())
    }

    /// Drain every buffered line in arrival order.
    ///
    /// Lines that arrived before the device failed are still returned; the
    /// failure surfaces on the following call.
    pub fn receive_all(&mut self) -> Result<Vec<SerialLine>, LinkError> {
        let mut lines = Vec::new();
        loop {
            match self.receive_one() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => return Ok(lines),
                Err(e) if lines.is_empty() => return Err(e),
                Err(_) => return Ok(lines),
            }
        }
    }

    /// Try to open the device again after it was never opened or lost.
    ///
    /// Returns whether the link is connected afterwards. Links built from a
    /// stream have nothing to reopen.
    pub fn reopen(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        let Some(origin) = self.origin.as_mut() else {
            return false;
        };
        match (origin.open)() {
            Ok(stream) => {
                info!(device = %origin.device, "Serial link reopened");
                self.attach(stream);
                true
            }
            Err(e) => {
                debug!(device = %origin.device, error = %e, "Serial reopen failed");
                false
            }
        }
    }

    fn attach(&mut self, stream: Box<dyn DeviceStream>) {
        let (read, write) = tokio::io::split(stream);
        let inbox = Inbox::new(INBOX_CAPACITY);

        let reader = {
            let inbox = inbox.clone();
            let state_tx = Arc::clone(&self.state_tx);
            tokio::spawn(async move {
                let mut lines = FramedRead::new(read, LineCodec::new());
                let reason = loop {
                    match lines.next().await {
                        Some(Ok(line)) => {
                            debug!(line = %line, "Incoming from controller");
                            inbox.push(line);
                        }
                        Some(Err(e)) => break format!("read failed: {e}"),
                        None => break "device closed the stream".to_string(),
                    }
                };
                warn!(reason = %reason, "Serial link lost");
                inbox.close(reason.clone());
                state_tx.send_replace(LinkState::Disconnected(LinkFault::Lost { reason }));
            })
        };

        self.io = Some(LinkIo {
            writer: FramedWrite::new(write, LineCodec::new()),
            inbox,
            reader,
        });
        self.set_state(LinkState::Connected);
    }

    fn detach(&mut self, reason: String) {
        self.io = None;
        self.set_state(LinkState::Disconnected(LinkFault::Lost { reason }));
    }

    fn set_state(&mut self, state: LinkState) {
        self.state_tx.send_replace(state.clone());
        self.state = state;
    }

    fn absent(&self) -> LinkError {
        match &self.state {
            LinkState::Disconnected(fault) => LinkError::Absent(fault.clone()),
            LinkState::Connected => LinkError::Absent(LinkFault::Lost {
                reason: "link connected without I/O".to_string(),
            }),
        }
    }
}

fn open_device(config: &SerialConfig) -> Result<tokio_serial::SerialStream, tokio_serial::Error> {
    tokio_serial::new(&config.device, config.baud_rate).open_native_async()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn missing_device_is_never_opened() {
        let config = SerialConfig {
            device: "/dev/rigbridge-does-not-exist".to_string(),
            baud_rate: 9600,
        };
        let mut link = SerialLink::open(&config);

        assert!(matches!(
            link.state(),
            LinkState::Disconnected(LinkFault::NeverOpened { .. })
        ));
        assert!(!link.reopen());
        assert!(matches!(link.send("on_h").await, Err(LinkError::Absent(_))));
    }

    #[tokio::test]
    async fn disconnected_receive_reports_no_connection() {
        let mut link = SerialLink::disconnected(LinkFault::NeverOpened {
            reason: "unplugged".to_string(),
        });

        let err = link.receive_one().unwrap_err();
        assert_eq!(
            err.to_string(),
            "No connection to ClearCore and motors, try powering horse off and on again"
        );
        assert!(link.receive_all().is_err());
    }

    #[tokio::test]
    async fn send_writes_line_with_newline() {
        let (link_side, mut device) = tokio::io::duplex(256);
        let mut link = SerialLink::from_stream(link_side);

        link.send("on_h").await.unwrap();

        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"on_h\n");
    }

    #[tokio::test]
    async fn receive_all_preserves_arrival_order() {
        let (link_side, mut device) = tokio::io::duplex(256);
        let mut link = SerialLink::from_stream(link_side);

        assert_eq!(link.receive_one().unwrap(), None);
        assert!(link.receive_all().unwrap().is_empty());

        device.write_all(b"OK\r\nTEMP=40\nLAST\n").await.unwrap();
        wait_for_lines(&mut link, 3).await;
    }

    #[tokio::test]
    async fn eof_degrades_to_lost_after_buffered_lines() {
        let (link_side, mut device) = tokio::io::duplex(256);
        let mut link = SerialLink::from_stream(link_side);

        device.write_all(b"BYE\n").await.unwrap();
        drop(device);

        let mut seen = Vec::new();
        let err = loop {
            match link.receive_one() {
                Ok(Some(line)) => seen.push(line),
                Ok(None) => tokio::task::yield_now().await,
                Err(e) => break e,
            }
        };

        assert_eq!(seen, vec![SerialLine::from("BYE")]);
        assert!(matches!(err, LinkError::Absent(LinkFault::Lost { .. })));
        assert!(!link.is_connected());
        assert!(link.send("off_h").await.is_err());
    }

    #[tokio::test]
    async fn write_to_closed_device_marks_lost() {
        let (link_side, device) = tokio::io::duplex(256);
        let mut link = SerialLink::from_stream(link_side);
        drop(device);

        let err = link.send("on_h").await.unwrap_err();
        assert!(matches!(err, LinkError::Absent(LinkFault::Lost { .. })));
        assert!(matches!(
            link.state(),
            LinkState::Disconnected(LinkFault::Lost { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_line_keeps_link_connected() {
        let (link_side, mut device) = tokio::io::duplex(256);
        let mut link = SerialLink::from_stream(link_side);

        device.write_all(b"\xff\xfe garbage\n").await.unwrap();
        link.send("ping").await.unwrap();
        device.write_all(b"HORSE_ON\n").await.unwrap();

        let mut lines = Vec::new();
        while lines.len() < 2 {
            lines.extend(link.receive_all().unwrap());
            tokio::task::yield_now().await;
        }
        assert_eq!(lines[1].as_str(), "HORSE_ON");
        assert!(link.is_connected());

        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");
    }

    #[tokio::test]
    async fn undrained_output_is_capped_to_newest_lines() {
        let (link_side, mut device) = tokio::io::duplex(64 * 1024);
        let mut link = SerialLink::from_stream(link_side);
        let mut state = link.subscribe();
        let total = INBOX_CAPACITY * 4;

        for n in 0..total {
            device.write_all(format!("L{n}\n").as_bytes()).await.unwrap();
        }
        // EOF marks the point where every line has been through the reader.
        drop(device);
        while state.borrow_and_update().is_connected() {
            state.changed().await.unwrap();
        }

        let lines = link.receive_all().unwrap();
        assert_eq!(lines.len(), INBOX_CAPACITY);
        assert_eq!(lines[0].as_str(), format!("L{}", total - INBOX_CAPACITY));
        assert_eq!(lines.last().unwrap().as_str(), format!("L{}", total - 1));
    }

    #[tokio::test]
    async fn device_loss_is_published_without_polling() {
        let (link_side, device) = tokio::io::duplex(256);
        let link = SerialLink::from_stream(link_side);
        let mut state = link.subscribe();
        assert!(state.borrow().is_connected());

        drop(device);
        state.changed().await.unwrap();

        assert!(matches!(
            *state.borrow(),
            LinkState::Disconnected(LinkFault::Lost { .. })
        ));
    }

    #[tokio::test]
    async fn reopen_uses_opener_until_device_returns() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let slot = Arc::new(std::sync::Mutex::new(None::<tokio::io::DuplexStream>));
        let mut link = {
            let attempts = Arc::clone(&attempts);
            let slot = Arc::clone(&slot);
            SerialLink::with_opener("/dev/clearCore", move || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                match slot.lock().unwrap().take() {
                    Some(stream) => Ok(Box::new(stream) as Box<dyn DeviceStream>),
                    None => Err(io::Error::new(io::ErrorKind::NotFound, "unplugged")),
                }
            })
        };
        assert!(matches!(
            link.state(),
            LinkState::Disconnected(LinkFault::NeverOpened { .. })
        ));
        assert!(!link.reopen());

        let (link_side, _device) = tokio::io::duplex(256);
        *slot.lock().unwrap() = Some(link_side);

        assert!(link.reopen());
        assert!(link.is_connected());
        assert!(*link.subscribe().borrow() == LinkState::Connected);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    async fn wait_for_lines(link: &mut SerialLink, expected: usize) {
        let mut lines = Vec::new();
        while lines.len() < expected {
            lines.extend(link.receive_all().unwrap());
            tokio::task::yield_now().await;
        }
        let lines: Vec<&str> = lines.iter().map(|l| l.as_str()).collect();
        assert_eq!(lines, vec!["OK", "TEMP=40", "LAST"]);
    }
}
