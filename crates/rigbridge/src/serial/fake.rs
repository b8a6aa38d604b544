//! Scripted stand-in for the motor controller, used by unit tests.
//!
//! Sits on the far end of an in-memory pipe, records every line the link sends
//! along with the (tokio) time it arrived, and answers with whatever the
//! responder returns.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::SerialLink;

#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub at: Instant,
    pub line: String,
}

pub(crate) struct FakeController {
    received: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl FakeController {
    /// Attach a controller that answers each received line with `respond(line)`.
    pub fn spawn<F>(respond: F) -> (SerialLink, Self)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (link_side, controller) = Self::plug_in(respond);
        (SerialLink::from_stream(link_side), controller)
    }

    /// Like [`spawn`](Self::spawn), but hand back the link end of the pipe so
    /// it can be served through an opener.
    pub fn plug_in<F>(mut respond: F) -> (DuplexStream, Self)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (link_side, device_side) = tokio::io::duplex(4096);

        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let task = tokio::spawn(async move {
            let (read, write) = tokio::io::split(device_side);
            let mut lines = FramedRead::new(read, LinesCodec::new());
            let mut writer = FramedWrite::new(write, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                log.lock().unwrap().push(Received {
                    at: Instant::now(),
                    line: line.clone(),
                });
                for reply in respond(&line) {
                    if writer.send(reply).await.is_err() {
                        return;
                    }
                }
            }
        });

        (link_side, Self { received, task })
    }

    /// Controller that never answers.
    pub fn silent() -> (SerialLink, Self) {
        Self::spawn(|_| Vec::new())
    }

    /// Controller that answers every line with the given fixed replies.
    pub fn replying(replies: &[&str]) -> (SerialLink, Self) {
        let replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
        Self::spawn(move |_| replies.clone())
    }

    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.line.clone())
            .collect()
    }

    pub fn received_with_times(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.received().iter().filter(|l| l.as_str() == line).count()
    }

    /// Pull the plug: the device end of the pipe is gone once this returns.
    pub async fn unplug(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
