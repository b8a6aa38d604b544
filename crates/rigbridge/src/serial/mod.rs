//! Serial side of the bridge: the line codec and the single controller link.
//!
//! - **codec**: newline framing for controller lines
//! - **inbox**: bounded buffer between the reader task and the link
//! - **link**: SerialLink with its typed degraded mode
//! - **backoff**: reopen pacing for an absent device

mod backoff;
mod codec;
#[cfg(test)]
pub(crate) mod fake;
mod inbox;
mod link;

pub use backoff::ReconnectBackoff;
pub use codec::{LineCodec, MAX_LINE_LENGTH, SerialLine};
pub use inbox::INBOX_CAPACITY;
pub use link::{DeviceStream, LinkError, LinkFault, LinkState, SerialLink};
