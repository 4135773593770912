//! Deferred structural edits.
//!
//! Callers that must not block on the tree's write lock (UI threads, MIDI
//! handlers, the audio thread itself) wrap the edit in a [`Task`] and queue
//! it. The [`TaskThread`] applies each task exactly once under the write
//! lock, between cycles, and sends the outcome back through the returned
//! [`TaskTicket`].

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::audio_signal::AudioSignal;
use crate::engine::EngineShared;
use crate::error::{EngineError, Result};
use crate::playback::SoundScope;
use crate::recall::{ChannelSelector, Placement, RecallFactory};
use crate::tree::{AudioFlags, AudioId, ChannelId, ContainerId, Direction, RecallId, RecyclingId, Tree};

/// What a task produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutput {
    None,
    Audio(AudioId),
    Container(ContainerId),
    Voice(RecallId),
    Voices(Vec<RecallId>),
}

/// One structural edit, applied under the tree's write lock.
pub trait Task: Send {
    fn name(&self) -> &str;

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput>;
}

/// Create an audio.
#[derive(Clone, Debug)]
pub struct AddAudio {
    pub name: String,
    pub flags: AudioFlags,
    pub audio_channels: usize,
    pub output_pads: usize,
    pub input_pads: usize,
}

impl Task for AddAudio {
    fn name(&self) -> &str {
        "add-audio"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.add_audio(&self.name, self.flags, self.audio_channels, self.output_pads, self.input_pads)
            .map(TaskOutput::Audio)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RemoveAudio(pub AudioId);

impl Task for RemoveAudio {
    fn name(&self) -> &str {
        "remove-audio"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.remove_audio(self.0).map(|_| TaskOutput::None)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ResizePads {
    pub audio: AudioId,
    pub direction: Direction,
    pub pads: usize,
}

impl Task for ResizePads {
    fn name(&self) -> &str {
        "resize-pads"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.resize_pads(self.audio, self.direction, self.pads)
            .map(|_| TaskOutput::None)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ResizeAudioChannels {
    pub audio: AudioId,
    pub audio_channels: usize,
}

impl Task for ResizeAudioChannels {
    fn name(&self) -> &str {
        "resize-audio-channels"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.resize_audio_channels(self.audio, self.audio_channels)
            .map(|_| TaskOutput::None)
    }
}

/// Link `channel` to `target`, or unlink it with `None`.
#[derive(Clone, Copy, Debug)]
pub struct Link {
    pub channel: ChannelId,
    pub target: Option<ChannelId>,
}

impl Task for Link {
    fn name(&self) -> &str {
        "link"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.set_link(self.channel, self.target).map(|_| TaskOutput::None)
    }
}

/// Bind an effect built by `factory` to an audio.
#[derive(Clone, Debug)]
pub struct AddRecall {
    pub factory: Arc<RecallFactory>,
    pub audio: AudioId,
    pub recall: String,
    pub placement: Placement,
    pub selector: ChannelSelector,
}

impl Task for AddRecall {
    fn name(&self) -> &str {
        "add-recall"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        let this = *self;
        this.factory
            .create(tree, this.audio, &this.recall, this.placement, this.selector)
            .map(TaskOutput::Container)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RemoveRecall(pub ContainerId);

impl Task for RemoveRecall {
    fn name(&self) -> &str {
        "remove-recall"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.remove_container(self.0).map(|_| TaskOutput::None)
    }
}

/// Start a voice on one channel.
#[derive(Clone, Copy, Debug)]
pub struct StartVoice {
    pub channel: ChannelId,
    pub scope: SoundScope,
}

impl Task for StartVoice {
    fn name(&self) -> &str {
        "start-voice"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.start_voice(self.channel, self.scope).map(TaskOutput::Voice)
    }
}

/// Start one voice per output of an audio.
#[derive(Clone, Copy, Debug)]
pub struct StartAudio {
    pub audio: AudioId,
    pub scope: SoundScope,
}

impl Task for StartAudio {
    fn name(&self) -> &str {
        "start-audio"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        tree.start_audio(self.audio, self.scope).map(TaskOutput::Voices)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CancelVoice {
    pub id: RecallId,
    pub recursive: bool,
}

impl Task for CancelVoice {
    fn name(&self) -> &str {
        "cancel-voice"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        if self.recursive {
            tree.recursive_cancel(self.id)?;
        } else {
            tree.cancel(self.id)?;
        }
        Ok(TaskOutput::None)
    }
}

/// Replace the template signal of a recycling.
#[derive(Debug)]
pub struct SetTemplate {
    pub recycling: RecyclingId,
    pub template: AudioSignal,
}

impl Task for SetTemplate {
    fn name(&self) -> &str {
        "set-template"
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        let this = *self;
        tree.set_template(this.recycling, this.template)
            .map(|_| TaskOutput::None)
    }
}

/// Any closure over the tree.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnOnce(&mut Tree) -> Result<TaskOutput> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

impl<F> Task for FnTask<F>
where
    F: FnOnce(&mut Tree) -> Result<TaskOutput> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(self: Box<Self>, tree: &mut Tree) -> Result<TaskOutput> {
        (self.f)(tree)
    }
}

/// Reply handle for one queued task.
#[derive(Debug)]
pub struct TaskTicket {
    name: String,
    reply: Receiver<Result<TaskOutput>>,
}

impl TaskTicket {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the task ran.
    pub fn wait(self) -> Result<TaskOutput> {
        self.reply
            .recv()
            .unwrap_or_else(|_| Err(EngineError::TaskCancelled(self.name)))
    }

    /// Wait at most `timeout`; hands the ticket back if the task has not run yet.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<TaskOutput>, Self> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(EngineError::TaskCancelled(self.name))),
        }
    }
}

struct Envelope {
    task: Box<dyn Task>,
    reply: Sender<Result<TaskOutput>>,
}

/// Consumer of the deferred task queue.
pub struct TaskThread {
    queue: Option<Sender<Envelope>>,
    handle: Option<JoinHandle<()>>,
    launched: Arc<AtomicU64>,
}

impl fmt::Debug for TaskThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskThread")
            .field("queued", &self.queue.as_ref().map_or(0, Sender::len))
            .field("launched", &self.launched())
            .finish()
    }
}

impl TaskThread {
    pub(crate) fn spawn(shared: Weak<EngineShared>, capacity: usize) -> Result<Self> {
        let (queue, rx) = bounded::<Envelope>(capacity);
        let launched = Arc::new(AtomicU64::new(0));
        let counter = launched.clone();
        let name = "ags-tasks".to_owned();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::info!("task thread started");
                for Envelope { task, reply } in rx.iter() {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let name = task.name().to_owned();
                    let result = {
                        let mut tree = shared.tree.write();
                        task.launch(&mut tree)
                    };
                    if let Err(err) = &result {
                        tracing::warn!(task = %name, %err, "task failed");
                    } else {
                        tracing::debug!(task = %name, "task applied");
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                    let _ = reply.send(result);
                }
                tracing::info!("task thread stopped");
            })
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;

        Ok(Self {
            queue: Some(queue),
            handle: Some(handle),
            launched,
        })
    }

    /// Queue a task without blocking. A full queue drops the task.
    pub fn queue(&self, task: Box<dyn Task>) -> Result<TaskTicket> {
        let name = task.name().to_owned();
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| EngineError::TaskCancelled(name.clone()))?;
        let (reply, reply_rx) = bounded(1);
        match queue.try_send(Envelope { task, reply }) {
            Ok(()) => Ok(TaskTicket { name, reply: reply_rx }),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(task = %name, capacity = ?queue.capacity(), "task queue full, task dropped");
                Err(EngineError::TaskCancelled(name))
            }
            Err(TrySendError::Disconnected(_)) => Err(EngineError::TaskCancelled(name)),
        }
    }

    /// Tasks applied so far, failed ones included.
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    /// Close the queue, let the thread drain it and join.
    pub fn stop(&mut self) {
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("task thread panicked");
            }
        }
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        self.stop();
    }
}
