//! Engine - the context object tying the tree, the audio loop, the task
//! thread and the recall factory together.
//!
//! ```no_run
//! use ags_engine::{AudioFlags, Engine, EngineConfig, NullSoundcard, Placement, SoundScope};
//! use ags_engine::recall::ChannelSelector;
//!
//! let config = EngineConfig::default();
//! let soundcard = NullSoundcard::new(config.presets);
//! let engine = Engine::new(config, Box::new(soundcard)).unwrap();
//!
//! let synth = engine.add_audio("synth", AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING, 2, 1, 1).unwrap();
//! engine.add_recall(synth, "ags-stream", Placement::all(), ChannelSelector::all()).unwrap();
//! engine.add_recall(synth, "ags-play", Placement::OUTPUT | Placement::PLAY, ChannelSelector::all()).unwrap();
//! engine.start_audio(synth, SoundScope::Playback).unwrap();
//!
//! let report = engine.run_cycle();
//! assert!(report.instances_run > 0);
//! ```

use core::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audio_loop::{AudioLoop, CycleInfo, CycleReport};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::handshake::{handshake, CycleRequester};
use crate::playback::SoundScope;
use crate::recall::{ChannelSelector, Placement, RecallFactory};
use crate::recycling::RecyclingChanged;
use crate::soundcard::Soundcard;
use crate::task::{CancelVoice, Task, TaskOutput, TaskThread, TaskTicket};
use crate::tree::{AudioFlags, AudioId, ChannelId, ContainerId, RecallId, Tree};

const OWNER: &str = "ags-engine";

/// State reachable from every engine thread.
pub(crate) struct EngineShared {
    pub(crate) tree: RwLock<Tree>,
    pub(crate) cycle: RwLock<CycleInfo>,
    pub(crate) output: Mutex<Vec<f32>>,
}

struct LoopThread {
    handle: JoinHandle<()>,
    requester: CycleRequester,
}

pub struct Engine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    audio_loop: Arc<Mutex<AudioLoop>>,
    factory: Arc<RecallFactory>,
    tasks: TaskThread,
    loop_thread: Option<LoopThread>,
    running: bool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("tree", &*self.shared.tree.read_recursive())
            .field("factory", &self.factory)
            .field("tasks", &self.tasks)
            .field("running", &self.running)
            .finish()
    }
}

impl Engine {
    /// Engine with the built-in recall kinds.
    pub fn new(config: EngineConfig, soundcard: Box<dyn Soundcard>) -> Result<Self> {
        Self::with_factory(config, soundcard, RecallFactory::with_defaults())
    }

    pub fn with_factory(config: EngineConfig, mut soundcard: Box<dyn Soundcard>, factory: RecallFactory) -> Result<Self> {
        config.validate()?;
        soundcard.claim(OWNER)?;
        soundcard.set_presets(config.presets)?;
        soundcard.set_bpm(config.bpm);

        let shared = Arc::new(EngineShared {
            tree: RwLock::new(Tree::new(config.presets)),
            cycle: RwLock::new(CycleInfo::idle(config.presets)),
            output: Mutex::new(vec![0.0; config.presets.interleaved_len()]),
        });
        let tasks = TaskThread::spawn(Arc::downgrade(&shared), config.task_queue_capacity)?;
        let audio_loop = AudioLoop::new(shared.clone(), soundcard, &config);

        tracing::info!(
            soundcard = audio_loop.soundcard().name(),
            samplerate = config.presets.samplerate,
            buffer_size = config.presets.buffer_size,
            bpm = config.bpm,
            "engine created"
        );

        Ok(Self {
            config,
            shared,
            audio_loop: Arc::new(Mutex::new(audio_loop)),
            factory: Arc::new(factory),
            tasks,
            loop_thread: None,
            running: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &Arc<RecallFactory> {
        &self.factory
    }

    /// Read access to the graph. Blocks while a task or an edit holds the
    /// write lock.
    pub fn tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.shared.tree.read()
    }

    /// Write access to the graph. Blocks until the cycle in flight is done.
    pub fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
        self.shared.tree.write()
    }

    /// The audio loop, for clock queries and soundcard access.
    pub fn audio_loop(&self) -> parking_lot::MutexGuard<'_, AudioLoop> {
        self.audio_loop.lock()
    }

    /// The last rendered interleaved buffer.
    pub fn output(&self) -> Vec<f32> {
        self.shared.output.lock().clone()
    }

    pub fn subscribe(&self) -> Receiver<RecyclingChanged> {
        self.tree_mut().subscribe()
    }

    // structure

    pub fn add_audio(
        &self,
        name: impl Into<String>,
        flags: AudioFlags,
        audio_channels: usize,
        output_pads: usize,
        input_pads: usize,
    ) -> Result<AudioId> {
        self.tree_mut().add_audio(name, flags, audio_channels, output_pads, input_pads)
    }

    pub fn link(&self, channel: ChannelId, target: Option<ChannelId>) -> Result<()> {
        self.tree_mut().set_link(channel, target)
    }

    /// Bind the effect `name` from the engine's factory to `audio`.
    pub fn add_recall(
        &self,
        audio: AudioId,
        name: &str,
        placement: Placement,
        selector: ChannelSelector,
    ) -> Result<ContainerId> {
        self.factory
            .create(&mut self.tree_mut(), audio, name, placement, selector)
    }

    pub fn start_voice(&self, channel: ChannelId, scope: SoundScope) -> Result<RecallId> {
        self.tree_mut().start_voice(channel, scope)
    }

    pub fn start_audio(&self, audio: AudioId, scope: SoundScope) -> Result<Vec<RecallId>> {
        self.tree_mut().start_audio(audio, scope)
    }

    /// Cancel one voice. Never blocks: if the tree is being edited the
    /// cancellation is queued instead.
    pub fn cancel(&self, id: RecallId) -> Result<()> {
        self.cancel_voice(id, false)
    }

    /// Cancel a voice and its subtree without blocking.
    pub fn recursive_cancel(&self, id: RecallId) -> Result<()> {
        self.cancel_voice(id, true)
    }

    fn cancel_voice(&self, id: RecallId, recursive: bool) -> Result<()> {
        let Some(tree) = self.shared.tree.try_read_recursive() else {
            self.queue(Box::new(CancelVoice { id, recursive }))?;
            return Ok(());
        };
        if recursive {
            tree.recursive_cancel(id)?;
        } else {
            tree.cancel(id)?;
        }
        for v in tree.voice_tree(id) {
            let Ok(voice) = tree.voice(v) else {
                continue;
            };
            for c in voice.channels() {
                if let Ok(channel) = tree.channel(*c) {
                    channel.playback().channel_threads().for_each(|t| t.wake());
                }
            }
        }
        Ok(())
    }

    // tasks

    /// Queue a task for the task thread.
    pub fn queue(&self, task: Box<dyn Task>) -> Result<TaskTicket> {
        self.tasks.queue(task)
    }

    /// Apply a task right away on the calling thread.
    pub fn apply(&self, task: Box<dyn Task>) -> Result<TaskOutput> {
        let name = task.name().to_owned();
        let result = task.launch(&mut self.tree_mut());
        tracing::debug!(task = %name, ok = result.is_ok(), "task applied inline");
        result
    }

    pub fn tasks_launched(&self) -> u64 {
        self.tasks.launched()
    }

    // clock

    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(EngineError::InvalidConfig(format!("bpm must be positive, got {bpm}")));
        }
        self.audio_loop.lock().set_bpm(bpm);
        Ok(())
    }

    pub fn bpm(&self) -> f64 {
        self.audio_loop.lock().bpm()
    }

    pub fn set_loop(&self, left: u64, right: u64, enabled: bool) -> Result<()> {
        if enabled && left >= right {
            return Err(EngineError::InvalidConfig(format!(
                "loop left ({left}) must be before loop right ({right})"
            )));
        }
        self.audio_loop.lock().set_loop(left, right, enabled);
        Ok(())
    }

    pub fn seek(&self, note_offset: u64) {
        self.audio_loop.lock().seek(note_offset);
    }

    pub fn set_super_threaded(&self, enabled: bool) {
        self.audio_loop.lock().set_super_threaded(enabled);
    }

    // driving

    /// Render one cycle on the calling thread.
    pub fn run_cycle(&self) -> CycleReport {
        self.audio_loop.lock().run_cycle()
    }

    /// Render `cycles` cycles back to back.
    pub fn render(&self, cycles: usize) -> Vec<CycleReport> {
        let mut audio_loop = self.audio_loop.lock();
        (0..cycles).map(|_| audio_loop.run_cycle()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the soundcard. In pass-through mode the caller drives cycles
    /// with [`run_cycle`](Self::run_cycle); otherwise an audio loop thread
    /// serves the soundcard's cycle requests.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        if self.config.pass_through {
            self.audio_loop.lock().soundcard_mut().start(None)?;
            self.running = true;
            return Ok(());
        }

        let period = self.config.presets.buffer_seconds() * self.config.overrun_tolerance;
        let (requester, responder) = handshake(Duration::from_secs_f64(period.max(0.001)));
        let audio_loop = self.audio_loop.clone();
        let name = "ags-audio-loop".to_owned();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || AudioLoop::serve(audio_loop, responder))
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;

        if let Err(err) = self.audio_loop.lock().soundcard_mut().start(Some(requester.clone())) {
            requester.stop();
            let _ = handle.join();
            return Err(err);
        }
        self.loop_thread = Some(LoopThread { handle, requester });
        self.running = true;
        Ok(())
    }

    /// Stop the audio loop thread and the soundcard.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(LoopThread { handle, requester }) = self.loop_thread.take() {
            requester.stop();
            if handle.join().is_err() {
                tracing::warn!("audio loop thread panicked");
            }
        }
        self.audio_loop.lock().soundcard_mut().stop();
        self.running = false;
        tracing::info!("engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.tasks.stop();
        self.audio_loop.lock().soundcard_mut().release(OWNER);
    }
}
