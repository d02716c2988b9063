use rtspawn_core::SpawnActions;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::os::fd::BorrowedFd;

type AtFork<'a> = Box<dyn FnMut() + 'a>;

/// POSIX spawn actions: the portable settings plus a post-fork callback
#[derive(Default)]
pub struct UnixSpawnActions<'a> {
    common: SpawnActions<'a, BorrowedFd<'a>>,
    atfork: Option<AtFork<'a>>,
}

impl<'a> UnixSpawnActions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback that runs in the child after its standard
    /// streams are connected and other descriptors are closed, right before
    /// `exec`.
    ///
    /// # Safety
    ///
    /// The callback runs in a forked copy of a possibly multithreaded
    /// process. It must only do async-signal-safe work: no allocation, no
    /// locks, no logging.
    pub unsafe fn set_atfork<F>(&mut self, callback: F)
    where
        F: FnMut() + 'a,
    {
        self.atfork = Some(Box::new(callback));
    }

    pub fn has_atfork(&self) -> bool {
        self.atfork.is_some()
    }

    pub(crate) fn atfork_mut(&mut self) -> Option<&mut AtFork<'a>> {
        self.atfork.as_mut()
    }
}

impl<'a> Deref for UnixSpawnActions<'a> {
    type Target = SpawnActions<'a, BorrowedFd<'a>>;

    fn deref(&self) -> &Self::Target {
        &self.common
    }
}

impl DerefMut for UnixSpawnActions<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.common
    }
}

impl fmt::Debug for UnixSpawnActions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixSpawnActions")
            .field("common", &self.common)
            .field("atfork", &self.atfork.is_some())
            .finish()
    }
}
