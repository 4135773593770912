mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ags_engine::recall::ChannelSelector;
use ags_engine::recalls::{
    PluginAbi, PluginDescriptor, PluginInstance, PluginLoader, PluginPort, PluginPortKind,
};
use ags_engine::{
    Engine, EngineConfig, EngineError, NullSoundcard, Placement, RecallFactory, SoundScope, Tree,
};

use common::*;

/// Holds the next plugin run until the test lets it go.
struct Gate {
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            armed: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl Gate {
    fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
    }
}

#[derive(Default)]
struct Counters {
    activated: AtomicUsize,
    deactivated: AtomicUsize,
    gate: Gate,
}

struct Gain {
    ports: Vec<PluginPort>,
    counters: Arc<Counters>,
}

struct GainInstance {
    gain: f32,
    peak: f32,
    counters: Arc<Counters>,
}

impl PluginDescriptor for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn ports(&self) -> &[PluginPort] {
        &self.ports
    }

    fn instantiate(&self, _samplerate: u32) -> ags_engine::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(GainInstance {
            gain: 1.0,
            peak: 0.0,
            counters: self.counters.clone(),
        }))
    }
}

impl PluginInstance for GainInstance {
    fn connect_port(&mut self, index: usize, value: f32) {
        if index == 0 {
            self.gain = value;
        }
    }

    fn activate(&mut self) {
        self.counters.activated.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&mut self, buffer: &mut [f32]) {
        self.counters.gate.pass();
        self.peak = 0.0;
        for s in buffer.iter_mut() {
            *s *= self.gain;
            self.peak = self.peak.max(s.abs());
        }
    }

    fn deactivate(&mut self) {
        self.counters.deactivated.fetch_add(1, Ordering::SeqCst);
    }

    fn control_output(&self, index: usize) -> Option<f32> {
        (index == 1).then_some(self.peak)
    }
}

struct Loader {
    counters: Arc<Counters>,
}

impl PluginLoader for Loader {
    fn abi(&self) -> PluginAbi {
        PluginAbi::Ladspa
    }

    fn load(&self, id: &str) -> ags_engine::Result<Arc<dyn PluginDescriptor>> {
        if id != "gain" {
            return Err(EngineError::Plugin(format!("no plugin `{id}`")));
        }
        Ok(Arc::new(Gain {
            ports: vec![
                PluginPort::control("gain", 0.5),
                PluginPort {
                    name: "peak".into(),
                    kind: PluginPortKind::ControlOutput,
                    default: 0.0,
                },
                PluginPort {
                    name: "in".into(),
                    kind: PluginPortKind::AudioInput,
                    default: 0.0,
                },
            ],
            counters: self.counters.clone(),
        }))
    }
}

fn plugin_engine() -> (Engine, ags_engine::soundcard::Capture, Arc<Counters>) {
    init_tracing();
    let counters = Arc::new(Counters::default());
    let mut factory = RecallFactory::with_defaults();
    factory.register_loader(Arc::new(Loader {
        counters: counters.clone(),
    }));

    let config = EngineConfig::default().with_presets(presets(64));
    let soundcard = NullSoundcard::new(config.presets);
    let capture = soundcard.capture();
    let engine = Engine::with_factory(config, Box::new(soundcard), factory).unwrap();
    (engine, capture, counters)
}

#[test]
fn plugin_processes_the_channel_and_follows_its_ports() {
    let (engine, capture, counters) = plugin_engine();
    let s = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.8, 64 * 3);
        set_input_templates(&mut tree, s, &template);
        s
    };
    let container = engine
        .add_recall(s, "ladspa:gain", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();
    let s_out = output(&engine.tree(), s, 0);
    let (gain, peak) = {
        let tree = engine.tree();
        let c = tree.container(container).unwrap();
        (c.port(s_out, "gain").unwrap(), c.port(s_out, "peak").unwrap())
    };
    assert_eq!(gain.get(), 0.5);

    engine.start_voice(s_out, SoundScope::Playback).unwrap();
    assert_eq!(counters.activated.load(Ordering::SeqCst), 1);

    engine.run_cycle();
    gain.set(0.25);
    engine.run_cycle();
    assert!((peak.get() - 0.2).abs() < 1e-6);

    let buffers = capture.take();
    assert!(buffers[0].chunks(2).all(|f| (f[0] - 0.4).abs() < 1e-6));
    assert!(buffers[1].chunks(2).all(|f| (f[0] - 0.2).abs() < 1e-6));

    // the voice finishes with its template and gives the instance back
    engine.run_cycle();
    assert_eq!(engine.tree().recall_ids().count(), 0);
    assert_eq!(counters.deactivated.load(Ordering::SeqCst), 1);
}

#[test]
fn plugins_are_resolved_through_their_loader() {
    let (engine, _, _) = plugin_engine();
    let s = engine
        .add_audio("synth", ags_engine::AudioFlags::OUTPUT_HAS_RECYCLING, 1, 1, 1)
        .unwrap();

    assert!(engine.factory().contains("ladspa:gain"));
    assert!(!engine.factory().contains("lv2:gain"));

    let missing = engine.add_recall(s, "ladspa:reverb", Placement::all(), ChannelSelector::all());
    assert!(matches!(missing, Err(EngineError::Plugin(_))));

    let no_loader = engine.add_recall(s, "lv2:gain", Placement::all(), ChannelSelector::all());
    assert!(matches!(no_loader, Err(EngineError::UnknownRecall(_))));

    assert!(engine.tree().audio(s).unwrap().containers().is_empty());
}

#[test]
fn removing_the_container_releases_live_plugins() {
    let (engine, _, counters) = plugin_engine();
    let s = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 2);
        wire_playback(engine.factory(), &mut tree, s);
        s
    };
    engine.start_audio(s, SoundScope::Playback).unwrap();

    // added while voices run: every voice gets its own instance
    let container = engine
        .add_recall(s, "ladspa:gain", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();
    assert_eq!(counters.activated.load(Ordering::SeqCst), 2);

    engine.tree_mut().remove_container(container).unwrap();
    assert_eq!(counters.deactivated.load(Ordering::SeqCst), 2);
}

#[test]
fn cancel_during_a_cycle_returns_at_once() {
    let (engine, _, counters) = plugin_engine();
    let (s, s_out) = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.8, 64 * 32);
        set_input_templates(&mut tree, s, &template);
        (s, output(&tree, s, 0))
    };
    engine
        .add_recall(s, "ladspa:gain", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();
    let id = engine.start_voice(s_out, SoundScope::Playback).unwrap();
    let full = engine.run_cycle().instances_run;

    let runs = |tree: &Tree| -> u64 {
        tree.voice(id)
            .unwrap()
            .instances()
            .iter()
            .map(|l| l.run_count())
            .sum()
    };

    let engine = &engine;
    counters.gate.armed.store(true, Ordering::SeqCst);
    let (in_flight, at_cancel, after) = thread::scope(|scope| {
        let cycle = scope.spawn(move || engine.run_cycle());
        // the cycle holds the read lock and sits inside the plugin
        counters.gate.entered.wait();

        let (tx, rx) = crossbeam_channel::bounded(1);
        scope.spawn(move || {
            let _ = tx.send(engine.recursive_cancel(id));
        });
        let cancelled = rx.recv_timeout(Duration::from_secs(5));

        // a reader keeps the loop from sweeping at the end of this cycle
        let tree = engine.tree();
        let at_cancel = runs(&tree);
        counters.gate.release.wait();
        let in_flight = cycle.join().unwrap();
        let after = runs(&tree);

        assert!(matches!(cancelled, Ok(Ok(()))), "cancel waited for the cycle");
        let voice = tree.voice(id).unwrap();
        assert!(voice.is_cancelled());
        assert!(voice.instances().iter().all(|l| l.is_cancelled()));
        (in_flight, at_cancel, after)
    });

    // the plugin finishes its run, nothing of the voice starts after the cancel
    assert_eq!(after - at_cancel, 1);
    assert!(in_flight.instances_run < full);
    assert_eq!(in_flight.voices_removed, 0);

    let next = engine.run_cycle();
    assert_eq!(next.instances_run, 0);
    assert_eq!(next.voices_removed, 1);
    assert_eq!(counters.deactivated.load(Ordering::SeqCst), 1);
}
