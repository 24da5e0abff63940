/// An I/O event reported by the poller.
///
/// An `Event` carries the readiness observed for one registered file
/// descriptor. It is produced by the poller and consumed by the
/// dispatcher, which hands it to the registration's handler.
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// This token is the registration's index in the dispatcher slab.
    pub(crate) token: usize,

    /// Readiness reported by the kernel.
    pub(crate) ready: Ready,
}

/// Readiness observed for a connection when its handler is invoked.
///
/// Hang-ups and socket errors are reported as both readable and writable
/// so the handler discovers them on its next read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ready {
    /// Data (or end of stream) is available.
    pub readable: bool,

    /// The send buffer has room.
    pub writable: bool,
}
