//! Thin stream binding with completion callbacks.
//!
//! Work issued to one stream runs in issue order. Launches on a stream do not
//! report failures at issue time: the first failure is kept and delivered to
//! every registered callback, and returned, at the next [`Stream::synchronize`].

use std::fmt;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::launch::{Function, KernelArgs, LaunchConfig, StreamId};

/// Completion callback: receives the stream and the deferred failure, if any.
pub type StreamCallback = Box<dyn FnOnce(&Stream, Option<&Error>) + Send>;

pub struct Stream {
    context: Context,
    id: StreamId,
    deferred: Mutex<Option<Error>>,
    callbacks: Mutex<Vec<StreamCallback>>,
}

impl Stream {
    pub fn new(context: &Context) -> Result<Self> {
        let id = context.create_stream()?;
        tracing::debug!(context = context.id(), stream = id.0, "stream created");
        Ok(Self { context: context.clone(), id, deferred: Mutex::new(None), callbacks: Mutex::new(Vec::new()) })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Enqueue a kernel. A failure is kept for the next [`Stream::synchronize`].
    pub fn launch(&self, function: &Function, config: &LaunchConfig, args: &KernelArgs) {
        if let Err(error) = self.context.launch_on(self.id, function, config, args) {
            tracing::debug!(stream = self.id.0, kernel.name = function.name(), %error, "deferred launch failure");
            let mut deferred = self.deferred.lock();
            if deferred.is_none() {
                *deferred = Some(error);
            }
        }
    }

    /// Run `callback` once all work issued so far completed.
    pub fn add_callback(&self, callback: impl FnOnce(&Stream, Option<&Error>) + Send + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Wait for the stream, fire pending callbacks and report the first failure.
    pub fn synchronize(&self) -> Result<()> {
        let synced = self.context.synchronize_stream(self.id);
        let deferred = self.deferred.lock().take();
        let error = match (deferred, synced) {
            (Some(error), _) | (None, Err(error)) => Some(error),
            (None, Ok(())) => None,
        };

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(self, error.as_ref());
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.context.is_active() {
            return;
        }
        if let Err(error) = self.context.destroy_stream(self.id) {
            tracing::warn!(stream = self.id.0, %error, "failed to destroy stream");
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("context", &self.context.id())
            .field("pending_callbacks", &self.callbacks.lock().len())
            .finish()
    }
}
