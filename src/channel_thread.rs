//! Worker threads for super-threaded mode.
//!
//! A [`ChannelThread`] is bound to one channel and one sound scope. It sleeps
//! on its command channel until the audio loop dispatches a RUN sub-stage,
//! runs the channel's instances of that scope and reports back on its done
//! channel. The loop holds the tree's read lock for the whole traversal; the
//! worker takes a recursive read lock so a queued writer cannot wedge it.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::engine::EngineShared;
use crate::error::{EngineError, Result};
use crate::playback::SoundScope;
use crate::recall::RunStage;
use crate::traversal;
use crate::tree::ChannelId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Run(RunStage),
    Wake,
    Stop,
}

pub struct ChannelThread {
    channel: ChannelId,
    scope: SoundScope,
    commands: Sender<Command>,
    done: Receiver<usize>,
    pending: AtomicBool,
    cycles: Arc<AtomicU64>,
    worker: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ChannelThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelThread")
            .field("channel", &self.channel)
            .field("scope", &self.scope)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("stages_run", &self.cycles.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChannelThread {
    pub(crate) fn spawn(shared: &Arc<EngineShared>, channel: ChannelId, scope: SoundScope) -> Result<Arc<Self>> {
        let (commands, command_rx) = bounded(4);
        let (done_tx, done) = bounded(1);
        let cycles = Arc::new(AtomicU64::new(0));

        let name = format!("ags-channel-{}-{:?}", channel.index(), scope).to_lowercase();
        let weak = Arc::downgrade(shared);
        let counter = cycles.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker(weak, channel, scope, command_rx, done_tx, counter))
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;

        tracing::info!(channel = %channel, ?scope, "channel thread started");
        Ok(Arc::new(Self {
            channel,
            scope,
            commands,
            done,
            pending: AtomicBool::new(false),
            cycles,
            worker: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn scope(&self) -> SoundScope {
        self.scope
    }

    /// RUN sub-stages this worker executed.
    pub fn stages_run(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Hand one sub-stage to the worker. Returns false if the worker is gone,
    /// in which case the caller runs the channel itself.
    pub(crate) fn dispatch(&self, stage: RunStage) -> bool {
        if self.pending.load(Ordering::Acquire) {
            self.wait();
        }
        match self.commands.try_send(Command::Run(stage)) {
            Ok(()) => {
                self.pending.store(true, Ordering::Release);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(channel = %self.channel, scope = ?self.scope, "channel thread command queue full");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Block until the dispatched sub-stage is done; returns the number of
    /// instances it ran.
    pub(crate) fn wait(&self) -> usize {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return 0;
        }
        self.done.recv().unwrap_or(0)
    }

    /// Nudge a sleeping worker, used after cancellation.
    pub fn wake(&self) {
        let _ = self.commands.try_send(Command::Wake);
    }

    /// Ask the worker to exit and join it.
    pub fn stop(&self) {
        if thread::current().id() == self.worker {
            // Dropped from inside the worker: it exits on its own.
            return;
        }
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(channel = %self.channel, scope = ?self.scope, "channel thread panicked");
            }
        }
    }
}

impl Drop for ChannelThread {
    fn drop(&mut self) {
        self.stop();
        tracing::info!(channel = %self.channel, scope = ?self.scope, "channel thread stopped");
    }
}

fn worker(
    shared: Weak<EngineShared>,
    channel: ChannelId,
    scope: SoundScope,
    commands: Receiver<Command>,
    done: Sender<usize>,
    cycles: Arc<AtomicU64>,
) {
    while let Ok(command) = commands.recv() {
        let stage = match command {
            Command::Run(stage) => stage,
            Command::Wake => continue,
            Command::Stop => break,
        };
        let count = match shared.upgrade() {
            Some(shared) => {
                let tree = shared.tree.read_recursive();
                let cycle = shared.cycle.read_recursive();
                traversal::run_channel(&tree, channel, scope, stage, &cycle, Some(&shared.output))
            }
            None => 0,
        };
        cycles.fetch_add(1, Ordering::Relaxed);
        if done.send(count).is_err() {
            break;
        }
    }
    tracing::trace!(channel = %channel, ?scope, "channel thread exiting");
}
