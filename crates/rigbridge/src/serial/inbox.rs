//! Bounded buffer between the serial reader task and the link.
//!
//! Holds at most `max_len` lines. When full, the oldest line is dropped so the
//! most recent controller output always survives until the next drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::codec::SerialLine;

/// Lines kept between drains before the oldest are dropped.
pub const INBOX_CAPACITY: usize = 256;

pub(crate) enum Received {
    Line(SerialLine),
    Empty,
    Closed(String),
}

struct BoundedQueue {
    queue: VecDeque<SerialLine>,
    max_len: usize,
    /// Lines dropped since the buffer last overflowed.
    dropped: u64,
    closed: Option<String>,
}

#[derive(Clone)]
pub(crate) struct Inbox {
    inner: Arc<Mutex<BoundedQueue>>,
}

impl Inbox {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoundedQueue {
                queue: VecDeque::with_capacity(max_len.min(INBOX_CAPACITY)),
                max_len: max_len.max(1),
                dropped: 0,
                closed: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoundedQueue> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn push(&self, line: SerialLine) {
        let mut q = self.lock();
        if q.queue.len() >= q.max_len {
            q.queue.pop_front();
            if q.dropped == 0 {
                warn!(
                    capacity = q.max_len,
                    "Controller output not drained, dropping oldest lines"
                );
            }
            q.dropped += 1;
        }
        q.queue.push_back(line);
    }

    /// Record the end of the stream; lines already queued are still delivered.
    pub(crate) fn close(&self, reason: String) {
        let mut q = self.lock();
        if q.closed.is_none() {
            q.closed = Some(reason);
        }
    }

    pub(crate) fn pop(&self) -> Received {
        let mut q = self.lock();
        match q.queue.pop_front() {
            Some(line) => Received::Line(line),
            None => {
                q.dropped = 0;
                match &q.closed {
                    Some(reason) => Received::Closed(reason.clone()),
                    None => Received::Empty,
                }
            }
        }
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.lock().closed.clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> SerialLine {
        SerialLine::new(format!("L{n}"))
    }

    #[test]
    fn full_inbox_drops_oldest() {
        let inbox = Inbox::new(3);
        for n in 0..5 {
            inbox.push(line(n));
        }
        assert_eq!(inbox.len(), 3);

        let mut kept = Vec::new();
        while let Received::Line(l) = inbox.pop() {
            kept.push(l.as_str().to_string());
        }
        assert_eq!(kept, vec!["L2", "L3", "L4"]);
    }

    #[test]
    fn close_is_reported_after_queued_lines() {
        let inbox = Inbox::new(4);
        inbox.push(line(1));
        inbox.close("device closed the stream".to_string());
        inbox.close("second reason ignored".to_string());

        assert!(matches!(inbox.pop(), Received::Line(_)));
        match inbox.pop() {
            Received::Closed(reason) => assert_eq!(reason, "device closed the stream"),
            _ => panic!("expected closed"),
        }
    }

    #[test]
    fn empty_open_inbox_reports_empty() {
        let inbox = Inbox::new(4);
        assert!(matches!(inbox.pop(), Received::Empty));
    }
}
