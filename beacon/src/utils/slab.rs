use std::mem::MaybeUninit;

/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and
/// returns stable indices that can be reused after removal.
///
/// The dispatcher uses these indices as poller tokens, so an index
/// stays valid for exactly as long as its value is stored.
///
/// Internally, it keeps track of:
/// - initialized slots,
/// - free indices,
/// - and uninitialized memory using [`MaybeUninit`].
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with a fixed initial capacity.
    ///
    /// All slots are initially free and uninitialized. Free indices are
    /// handed out lowest first.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        let free = (0..size).rev().collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    /// Inserts the value built by `f` and returns its index.
    ///
    /// The index is passed to `f` before insertion so the stored value
    /// can carry its own key.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab grows exponentially.
    pub(crate) fn insert_with(&mut self, f: impl FnOnce(usize) -> T) -> usize {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.items
                    .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
                self.free.extend(((len + 1)..new_len).rev());
                self.used.resize(new_len, false);

                len
            }
        };

        self.items[index] = MaybeUninit::new(f(index));
        self.used[index] = true;
        self.len += 1;

        index
    }

    /// Inserts a value into the slab and returns its index.
    #[cfg(test)]
    pub(crate) fn insert(&mut self, item: T) -> usize {
        self.insert_with(|_| item)
    }

    /// Removes and returns the value stored at `index`.
    ///
    /// Returns `None` if the slot is out of range or not in use, so a
    /// stale index can never read freed memory.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !self.contains(index) {
            return None;
        }

        self.free.push(index);
        self.used[index] = false;
        self.len -= 1;

        let slot = std::mem::replace(&mut self.items[index], MaybeUninit::uninit());

        // SAFETY: `used[index]` was true, so the slot was initialized.
        Some(unsafe { slot.assume_init() })
    }

    /// Returns a reference to the value at `index`, if any.
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.contains(index) {
            return None;
        }

        // SAFETY: `used[index]` is true, so the slot is initialized.
        Some(unsafe { self.items[index].assume_init_ref() })
    }

    /// Returns whether `index` currently holds a value.
    fn contains(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    /// Number of stored values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Removes every stored value, dropping them in index order.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);

        for index in 0..self.items.len() {
            if let Some(item) = self.remove(index) {
                out.push(item);
            }
        }

        out
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    ///
    /// Uninitialized slots are ignored.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}
