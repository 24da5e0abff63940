/// A resizable byte buffer with explicit read and write cursors.
///
/// Bytes are appended at the write cursor and consumed from the read
/// cursor. Growth never happens implicitly: callers decide when to
/// [`grow_to`](Self::grow_to) or [`reserve`](Self::reserve), which keeps
/// the resize policy visible where it matters (TLS record sizing,
/// request accumulation).
///
/// ```text
/// 0          start            end            capacity
/// |  consumed  |    filled     |     spare      |
/// ```
pub struct ByteBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
    resizes: usize,
}

impl ByteBuffer {
    /// Creates an empty buffer holding exactly `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            start: 0,
            end: 0,
            resizes: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Writable space after the write cursor.
    pub fn spare(&self) -> usize {
        self.data.len() - self.end
    }

    /// How many times the backing storage has been reallocated.
    pub fn resizes(&self) -> usize {
        self.resizes
    }

    /// The readable bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// The writable region; call [`advance`](Self::advance) after filling it.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Marks `n` bytes of the spare region as filled.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the spare capacity.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.spare(), "advance past buffer capacity");
        self.end += n;
    }

    /// Drops `n` readable bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the readable length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume past filled region");
        self.start += n;

        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Discards all readable bytes.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Moves the readable bytes to the front of the storage.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }

        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Rebuilds the storage at `capacity` bytes, preserving unread bytes.
    ///
    /// Does nothing if the buffer is already at least that large.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity <= self.data.len() {
            return;
        }

        let mut data = vec![0; capacity];
        let len = self.len();
        data[..len].copy_from_slice(self.filled());

        self.data = data;
        self.start = 0;
        self.end = len;
        self.resizes += 1;
    }

    /// Ensures at least `min_spare` writable bytes, doubling the capacity
    /// as many times as needed after compacting.
    pub fn reserve(&mut self, min_spare: usize) {
        if self.spare() >= min_spare {
            return;
        }

        self.compact();

        if self.spare() >= min_spare {
            return;
        }

        let mut capacity = self.data.len().max(1);
        while capacity - self.len() < min_spare {
            capacity *= 2;
        }

        self.grow_to(capacity);
    }

    /// Appends `bytes`, growing by doubling when they do not fit.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        self.advance(bytes.len());
    }
}

/// Appending sink, used to collect TLS records.
impl std::io::Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
