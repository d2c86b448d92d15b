//! Transport link abstraction.
//!
//! The engine does not own a socket. A [`Connector`] opens a [`Link`]: a
//! command handle the engine writes to, plus an ordered stream of
//! [`TransportEvent`]s it reads from. The other end, a [`LinkDriver`], is run
//! by whoever owns the real socket (the WebSocket connector, or a test).
//!
//! ```text
//! Engine ── LinkHandle ──▶ LinkCommand ──▶ LinkDriver ──▶ socket
//! Engine ◀── events ◀── TransportEvent ◀── LinkEvents ◀── socket
//! ```

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close code for a normal closure. Never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code for a protocol error. Never triggers a reconnect.
pub const PROTOCOL_ERROR: u16 = 1002;
/// Close code reported when the socket went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Start opening a transport to `url`.
    ///
    /// Must not block; progress is reported through the link's events.
    fn open(&self, url: &str) -> Link;
}

/// Command sent to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Send one binary frame.
    Send(Vec<u8>),
    /// Close with the given code.
    Close(u16),
}

/// A frame as the socket delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Binary frame.
    Binary(Vec<u8>),
    /// Binary message delivered in parts.
    Fragments(Vec<Vec<u8>>),
    /// Text frame. The protocol does not use these.
    Text(String),
}

impl InboundFrame {
    /// Normalize to one buffer. `None` for text frames.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            InboundFrame::Binary(bytes) => Some(bytes),
            InboundFrame::Fragments(parts) => Some(parts.concat()),
            InboundFrame::Text(_) => None,
        }
    }
}

/// Event reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport is open.
    Open,
    /// Inbound frame.
    Frame(InboundFrame),
    /// Transport error. A `Closed` event follows if the socket went down.
    Error(String),
    /// Transport closed with a code.
    Closed(u16),
}

/// Engine side of a transport.
#[derive(Debug)]
pub struct Link {
    /// Command handle.
    pub handle: LinkHandle,
    /// Ordered events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Cloneable command handle.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
    open: Arc<AtomicBool>,
}

impl LinkHandle {
    /// Queue a binary frame.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` if the transport is not open
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(LinkCommand::Send(frame))
            .map_err(|_| Error::NotConnected)
    }

    /// Close the transport with `code`.
    pub fn close(&self, code: u16) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.commands.send(LinkCommand::Close(code));
    }

    /// Whether the transport reports itself open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.commands.is_closed()
    }
}

/// Socket side of a transport.
#[derive(Debug)]
pub struct LinkDriver {
    /// Commands from the engine.
    pub commands: mpsc::UnboundedReceiver<LinkCommand>,
    /// Event reporter.
    pub events: LinkEvents,
}

/// Reports socket activity to the engine.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl LinkEvents {
    /// The socket is open.
    pub fn opened(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Open);
    }

    /// A frame arrived.
    pub fn deliver(&self, frame: InboundFrame) {
        self.emit(TransportEvent::Frame(frame));
    }

    /// The socket reported an error.
    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    /// The socket closed.
    pub fn closed(&self, code: u16) {
        self.open.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Closed(code));
    }

    fn emit(&self, event: TransportEvent) {
        // The engine dropped this link; nothing left to tell.
        let _ = self.events.send(event);
    }
}

/// Create a connected link and driver.
pub fn link() -> (Link, LinkDriver) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));

    let link = Link {
        handle: LinkHandle {
            commands: command_tx,
            open: Arc::clone(&open),
        },
        events: event_rx,
    };
    let driver = LinkDriver {
        commands: command_rx,
        events: LinkEvents {
            events: event_tx,
            open,
        },
    };
    (link, driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_are_concatenated() {
        let frame = InboundFrame::Fragments(vec![vec![1, 2], vec![], vec![3]]);
        assert_eq!(frame.into_bytes(), Some(vec![1, 2, 3]));
        assert_eq!(InboundFrame::Text("hi".into()).into_bytes(), None);
    }

    #[test]
    fn test_send_requires_open() {
        let (link, mut driver) = link();
        assert!(matches!(link.handle.send(vec![1]), Err(Error::NotConnected)));

        driver.events.opened();
        assert!(link.handle.is_open());
        link.handle.send(vec![1]).unwrap();
        assert_eq!(driver.commands.try_recv().unwrap(), LinkCommand::Send(vec![1]));
    }

    #[test]
    fn test_close_marks_closed() {
        let (link, mut driver) = link();
        driver.events.opened();

        link.handle.close(NORMAL_CLOSURE);
        assert!(!link.handle.is_open());
        assert_eq!(
            driver.commands.try_recv().unwrap(),
            LinkCommand::Close(NORMAL_CLOSURE)
        );
    }

    #[test]
    fn test_events_are_ordered() {
        let (mut link, driver) = link();
        driver.events.opened();
        driver.events.deliver(InboundFrame::Binary(vec![7]));
        driver.events.closed(ABNORMAL_CLOSURE);

        assert_eq!(link.events.try_recv().unwrap(), TransportEvent::Open);
        assert_eq!(
            link.events.try_recv().unwrap(),
            TransportEvent::Frame(InboundFrame::Binary(vec![7]))
        );
        assert_eq!(
            link.events.try_recv().unwrap(),
            TransportEvent::Closed(ABNORMAL_CLOSURE)
        );
    }
}
