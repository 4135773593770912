//! The cycle driver.
//!
//! One call to [`AudioLoop::run_cycle`] renders one soundcard buffer:
//!
//! 1. advance the [`Clock`] and publish the cycle's [`CycleInfo`]
//! 2. clear the interleaved output
//! 3. under the tree's read lock, run RUN `Pre`, `Inter` and `Post` over the
//!    schedule, scope by scope, batch by batch
//! 4. flag finished voice trees, then sweep them if the write lock is free
//! 5. hand the output to the soundcard
//!
//! In super-threaded mode channels that own a [`ChannelThread`] for the
//! running scope are dispatched to it and the loop waits for the whole
//! batch before moving on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use delegate::delegate;
use parking_lot::Mutex;

use crate::channel_thread::ChannelThread;
use crate::config::EngineConfig;
use crate::engine::EngineShared;
use crate::handshake::{CycleResponder, Wake};
use crate::playback::SoundScope;
use crate::recall::RunStage;
use crate::schedule::{Schedule, ScheduleNode};
use crate::soundcard::{Presets, Soundcard};
use crate::timing::{Clock, TicEvent};
use crate::traversal;
use crate::tree::Tree;

/// Timing facts every instance sees during one cycle.
#[derive(Clone, Debug)]
pub struct CycleInfo {
    /// Cycles completed before this one
    pub cycle: u64,
    pub presets: Presets,
    /// First frame of the cycle buffer
    pub frame: u64,
    /// Tics landing in this cycle, in order
    pub tics: Vec<TicEvent>,
    /// Cycles per tic
    pub delay: f64,
    pub frames_per_tic: f64,
    pub bpm: f64,
    /// Sequencer position of the last fired tic
    pub note_offset: u64,
    pub loop_enabled: bool,
}

impl CycleInfo {
    /// A cycle with no tics, used outside the audio loop (INIT, tests).
    pub fn idle(presets: Presets) -> Self {
        let clock = Clock::new(presets.samplerate, presets.buffer_size, 120.0, 4);
        Self {
            cycle: 0,
            presets,
            frame: 0,
            tics: Vec::new(),
            delay: clock.delay(),
            frames_per_tic: clock.frames_per_tic(),
            bpm: clock.bpm(),
            note_offset: 0,
            loop_enabled: false,
        }
    }

    fn update(&mut self, cycle: u64, presets: Presets, clock: &mut Clock) {
        self.cycle = cycle;
        self.presets = presets;
        self.frame = clock.frames_elapsed();
        clock.advance(&mut self.tics);
        self.delay = clock.delay();
        self.frames_per_tic = clock.frames_per_tic();
        self.bpm = clock.bpm();
        self.note_offset = clock.note_offset();
        self.loop_enabled = clock.loop_region().2;
    }
}

/// What one cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub tics: usize,
    pub instances_run: usize,
    pub voices_finished: usize,
    pub voices_removed: usize,
    pub duration: Duration,
    pub overrun: bool,
}

pub struct AudioLoop {
    shared: Arc<EngineShared>,
    soundcard: Box<dyn Soundcard>,
    clock: Clock,
    schedule: Schedule,
    presets: Presets,
    super_threaded: bool,
    overrun_tolerance: f64,
    dispatched: Vec<Arc<ChannelThread>>,

    cycles: u64,
    overruns: u64,
}

impl core::fmt::Debug for AudioLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioLoop")
            .field("soundcard", &self.soundcard.name())
            .field("clock", &self.clock)
            .field("super_threaded", &self.super_threaded)
            .field("cycles", &self.cycles)
            .field("overruns", &self.overruns)
            .finish()
    }
}

impl AudioLoop {
    pub(crate) fn new(shared: Arc<EngineShared>, soundcard: Box<dyn Soundcard>, config: &EngineConfig) -> Self {
        let presets = config.presets;
        let mut clock = Clock::new(presets.samplerate, presets.buffer_size, config.bpm, config.subdivisions);
        let lp = config.loop_region;
        clock.set_loop(lp.left, lp.right, lp.enabled);

        Self {
            shared,
            soundcard,
            clock,
            schedule: Schedule::new(),
            presets,
            super_threaded: config.super_threaded,
            overrun_tolerance: config.overrun_tolerance,
            dispatched: Vec::new(),
            cycles: 0,
            overruns: 0,
        }
    }

    delegate! {
        to self.clock {
            pub fn bpm(&self) -> f64;
            pub fn note_offset(&self) -> u64;
            pub fn note_offset_absolute(&self) -> u64;
            pub fn tic_counter(&self) -> u64;
            pub fn delay_counter(&self) -> f64;
            pub fn tact_counter(&self) -> f64;
            pub fn frames_elapsed(&self) -> u64;
            pub fn loop_region(&self) -> (u64, u64, bool);
            pub fn seek(&mut self, note_offset: u64);
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn presets(&self) -> Presets {
        self.presets
    }

    pub fn soundcard(&self) -> &dyn Soundcard {
        self.soundcard.as_ref()
    }

    pub fn soundcard_mut(&mut self) -> &mut dyn Soundcard {
        self.soundcard.as_mut()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn is_super_threaded(&self) -> bool {
        self.super_threaded
    }

    /// Takes effect at the end of the next cycle, when channel threads are
    /// spawned or retired.
    pub fn set_super_threaded(&mut self, enabled: bool) {
        self.super_threaded = enabled;
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.clock.set_bpm(bpm);
        self.soundcard.set_bpm(bpm);
    }

    pub fn set_loop(&mut self, left: u64, right: u64, enabled: bool) {
        self.clock.set_loop(left, right, enabled);
    }

    /// Render one cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let shared = &self.shared;

        let tics = {
            let mut info = shared.cycle.write();
            info.update(self.cycles, self.presets, &mut self.clock);
            info.tics.len()
        };

        {
            let mut output = shared.output.lock();
            output.clear();
            output.resize(self.presets.interleaved_len(), 0.0);
        }

        let mut instances_run = 0;
        let voices_finished = {
            let tree = shared.tree.read();
            let cycle = shared.cycle.read();
            self.schedule.refresh(&tree);

            for stage in RunStage::ALL {
                for scope in SoundScope::ALL {
                    for batch in self.schedule.batches() {
                        for node in batch {
                            if let Some(thread) = self.super_threaded.then(|| worker_for(&tree, *node, scope)).flatten() {
                                if thread.dispatch(stage) {
                                    self.dispatched.push(thread);
                                    continue;
                                }
                            }
                            instances_run += traversal::run_node(&tree, *node, scope, stage, &cycle, Some(&shared.output));
                        }
                        for thread in self.dispatched.drain(..) {
                            instances_run += thread.wait();
                        }
                    }
                }
            }
            tree.mark_done()
        };

        let voices_removed = match shared.tree.try_write() {
            Some(mut tree) => {
                let removed = tree.sweep();
                self.sync_channel_threads(&mut tree);
                removed
            }
            None => {
                tracing::trace!(cycle = self.cycles, "tree busy, sweep deferred");
                0
            }
        };

        self.soundcard.play(&shared.output.lock());

        let duration = started.elapsed();
        let budget = self.presets.buffer_seconds() * self.overrun_tolerance;
        let overrun = duration.as_secs_f64() > budget;
        if overrun {
            self.overruns += 1;
            tracing::warn!(
                cycle = self.cycles,
                took_us = duration.as_micros() as u64,
                budget_us = (budget * 1e6) as u64,
                "cycle overrun"
            );
        }

        let report = CycleReport {
            cycle: self.cycles,
            tics,
            instances_run,
            voices_finished,
            voices_removed,
            duration,
            overrun,
        };
        tracing::trace!(?report, "cycle");
        self.cycles += 1;
        report
    }

    /// Give every channel with a running voice of a scope a worker for that
    /// scope, and retire the workers nobody needs.
    fn sync_channel_threads(&self, tree: &mut Tree) {
        let channels: Vec<_> = tree.channel_ids().collect();
        for id in channels {
            for scope in SoundScope::ALL {
                let wanted = self.super_threaded && has_running_voice(tree, id, scope);
                let Ok(channel) = tree.channel_mut(id) else {
                    continue;
                };
                match (wanted, channel.playback().channel_thread(scope).is_some()) {
                    (true, false) => match ChannelThread::spawn(&self.shared, id, scope) {
                        Ok(thread) => {
                            channel.playback_mut().set_channel_thread(scope, Some(thread));
                        }
                        Err(err) => tracing::warn!(channel = %id, ?scope, %err, "no channel thread, running inline"),
                    },
                    (false, true) => {
                        channel.playback_mut().set_channel_thread(scope, None);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Serve cycle requests until the backend asks to stop.
    pub(crate) fn serve(audio_loop: Arc<Mutex<AudioLoop>>, responder: CycleResponder) {
        tracing::info!("audio loop started");
        loop {
            match responder.wait() {
                Wake::Cycle => {
                    audio_loop.lock().run_cycle();
                    responder.done();
                }
                Wake::Stop => break,
            }
        }
        tracing::info!("audio loop stopped");
    }
}

fn worker_for(tree: &Tree, node: ScheduleNode, scope: SoundScope) -> Option<Arc<ChannelThread>> {
    let ScheduleNode::Channel(id) = node else {
        return None;
    };
    tree.channel(id).ok()?.playback().channel_thread(scope).cloned()
}

fn has_running_voice(tree: &Tree, channel: crate::tree::ChannelId, scope: SoundScope) -> bool {
    tree.channel(channel).is_ok_and(|c| {
        c.recall_ids()
            .iter()
            .filter_map(|id| tree.voice(*id).ok())
            .any(|v| v.scope() == scope && v.is_running())
    })
}
