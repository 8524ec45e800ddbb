//! Registry of the large float buffers used by the correction pipeline.
//!
//! Every sinogram, image and scratch array is created through a
//! [`BufferArena`], which hands out an owning [`Buffer`] tagged with a unique
//! [`BufferHandle`]. Dropping the `Buffer` releases the handle, so buffers
//! are released on every exit path, including early returns via `?`.
//!
//! The arena is cheap to clone and safe to use from several worker threads at
//! once: concurrent `create` calls always return distinct handles.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ArenaError;

type ArenaResult<T> = std::result::Result<T, ArenaError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

#[derive(Debug)]
struct Entry {
    tag: String,
    len: usize,
}

#[derive(Debug, Default)]
struct Registry {
    next: u64,
    live: HashMap<BufferHandle, Entry>,
    allocated: usize,
    capacity: Option<usize>,
}

impl Registry {
    fn register(&mut self, len: usize, tag: &str) -> ArenaResult<BufferHandle> {
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(self.allocated);
            if len > available {
                return Err(ArenaError::Exhausted { requested: len, available, tag: tag.into() })
            }
        }
        let handle = BufferHandle(self.next);
        self.next += 1;
        self.allocated += len;
        self.live.insert(handle, Entry { tag: tag.into(), len });
        Ok(handle)
    }

    fn release(&mut self, handle: BufferHandle) -> ArenaResult<()> {
        let entry = self.live.remove(&handle).ok_or(ArenaError::UnknownHandle(handle))?;
        self.allocated -= entry.len;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct BufferArena {
    registry: Arc<Mutex<Registry>>,
}

impl BufferArena {

    pub fn new() -> Self { Self::default() }

    /// Arena which refuses to hold more than `capacity` floats at once
    pub fn with_capacity(capacity: usize) -> Self {
        let registry = Registry { capacity: Some(capacity), ..Registry::default() };
        Self { registry: Arc::new(Mutex::new(registry)) }
    }

    fn lock(&self) -> ArenaResult<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| ArenaError::Poisoned)
    }

    /// Zero-filled buffer of `len` floats
    pub fn create(&self, len: usize, tag: &str) -> ArenaResult<Buffer> {
        self.adopt(vec![0.0; len], tag)
    }

    /// Buffer holding a copy of `data`
    pub fn copy_of(&self, data: &[f32], tag: &str) -> ArenaResult<Buffer> {
        self.adopt(data.to_vec(), tag)
    }

    /// Register already-allocated `data` with the arena
    pub fn adopt(&self, data: Vec<f32>, tag: &str) -> ArenaResult<Buffer> {
        let handle = self.lock()?.register(data.len(), tag)?;
        log::trace!("arena: created {handle:?} `{tag}` ({} floats)", data.len());
        Ok(Buffer { handle, data, registry: Arc::clone(&self.registry), detached: false })
    }

    /// Release a handle whose `Buffer` has been leaked with [`Buffer::into_raw`]
    pub fn free(&self, handle: BufferHandle) -> ArenaResult<()> {
        self.lock()?.release(handle)
    }

    /// Tag with which the live buffer `handle` was created
    pub fn tag(&self, handle: BufferHandle) -> ArenaResult<String> {
        self.lock()?.live.get(&handle)
            .map(|entry| entry.tag.clone())
            .ok_or(ArenaError::UnknownHandle(handle))
    }

    /// Number of buffers which have been created but not yet released
    pub fn live_buffers(&self) -> usize {
        self.lock().map_or(0, |r| r.live.len())
    }

    /// Total number of floats held by live buffers
    pub fn allocated(&self) -> usize {
        self.lock().map_or(0, |r| r.allocated)
    }
}

/// Exclusively-owned arena buffer. Released when dropped.
#[derive(Debug)]
pub struct Buffer {
    handle: BufferHandle,
    data: Vec<f32>,
    registry: Arc<Mutex<Registry>>,
    detached: bool,
}

impl Buffer {
    pub fn handle(&self) -> BufferHandle { self.handle }

    /// Release the buffer now, reporting any bookkeeping failure
    pub fn free(mut self) -> ArenaResult<()> {
        self.detached = true;
        let handle = self.handle;
        let released = self.registry.lock()
            .map_err(|_| ArenaError::Poisoned)
            .and_then(|mut r| r.release(handle));
        released
    }

    /// Give up RAII release: the caller becomes responsible for calling
    /// [`BufferArena::free`] with the returned handle.
    pub fn into_raw(mut self) -> (BufferHandle, Vec<f32>) {
        self.detached = true;
        (self.handle, std::mem::take(&mut self.data))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.detached { return }
        if let Ok(mut registry) = self.registry.lock() {
            // Cannot fail: only `free` and `into_raw` give up the handle, and
            // both detach first
            let _ = registry.release(self.handle);
        }
    }
}

impl Deref for Buffer {
    type Target = [f32];
    fn deref(&self) -> &[f32] { &self.data }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [f32] { &mut self.data }
}
