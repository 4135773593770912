//! Plugin effects.
//!
//! Native plugin ABIs are reached through [`PluginLoader`] implementations
//! registered on the [`RecallFactory`](crate::recall::RecallFactory). The
//! engine itself only sees the three traits below; loading shared objects is
//! the loader's business.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::recall::{InitStage, Port, RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Plugin standards a loader can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginAbi {
    Ladspa,
    Dssi,
    Lv2,
}

impl PluginAbi {
    pub const ALL: [PluginAbi; 3] = [PluginAbi::Ladspa, PluginAbi::Dssi, PluginAbi::Lv2];

    /// Factory name prefix, e.g. `ladspa:`.
    pub fn prefix(self) -> &'static str {
        match self {
            PluginAbi::Ladspa => "ladspa:",
            PluginAbi::Dssi => "dssi:",
            PluginAbi::Lv2 => "lv2:",
        }
    }

    /// Split `lv2:http://example.org/amp` into the ABI and the plugin id.
    pub fn parse(name: &str) -> Option<(PluginAbi, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|abi| name.strip_prefix(abi.prefix()).map(|id| (abi, id)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginPortKind {
    ControlInput,
    ControlOutput,
    AudioInput,
    AudioOutput,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PluginPort {
    pub name: String,
    pub kind: PluginPortKind,
    pub default: f32,
}

impl PluginPort {
    pub fn control(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            kind: PluginPortKind::ControlInput,
            default,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self.kind,
            PluginPortKind::ControlInput | PluginPortKind::ControlOutput
        )
    }
}

/// Finds plugins of one ABI by id.
pub trait PluginLoader: Send + Sync {
    fn abi(&self) -> PluginAbi;

    fn load(&self, id: &str) -> Result<Arc<dyn PluginDescriptor>>;
}

/// A loaded plugin type.
pub trait PluginDescriptor: Send + Sync {
    fn name(&self) -> &str;

    fn ports(&self) -> &[PluginPort];

    fn instantiate(&self, samplerate: u32) -> Result<Box<dyn PluginInstance>>;
}

/// One running plugin.
pub trait PluginInstance: Send {
    fn connect_port(&mut self, index: usize, value: f32);

    fn activate(&mut self);

    /// Process one mono buffer in place.
    fn run(&mut self, buffer: &mut [f32]);

    fn deactivate(&mut self);

    /// Value of an output control port after the last run.
    fn control_output(&self, _index: usize) -> Option<f32> {
        None
    }
}

/// Wraps a plugin instance per voice and channel.
///
/// Control ports are shared [`Port`]s. Their values are pushed into the
/// instance before every run, and output controls are read back after it.
/// A template never holds an instance; cloning one yields a fresh, not yet
/// instantiated copy.
pub struct PluginRecall {
    descriptor: Arc<dyn PluginDescriptor>,
    /// Plugin port index and the engine port bridged to it
    controls: Vec<(usize, PluginPortKind, Arc<Port>)>,
    instance: Mutex<Option<Box<dyn PluginInstance>>>,
    active: bool,
}

impl PluginRecall {
    pub fn new(descriptor: Arc<dyn PluginDescriptor>) -> Self {
        let controls = descriptor
            .ports()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_control())
            .map(|(i, p)| (i, p.kind, Port::new(p.name.clone(), p.default)))
            .collect();
        Self {
            descriptor,
            controls,
            instance: Mutex::new(None),
            active: false,
        }
    }

    pub fn descriptor(&self) -> &Arc<dyn PluginDescriptor> {
        &self.descriptor
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn push_controls(&mut self) {
        let Some(instance) = self.instance.get_mut().as_mut() else {
            return;
        };
        for (index, kind, port) in &self.controls {
            if *kind == PluginPortKind::ControlInput {
                instance.connect_port(*index, port.get());
            }
        }
    }

    fn pull_controls(&self) {
        let instance = self.instance.lock();
        let Some(instance) = instance.as_ref() else {
            return;
        };
        for (index, kind, port) in &self.controls {
            if *kind == PluginPortKind::ControlOutput {
                if let Some(value) = instance.control_output(*index) {
                    port.set(value);
                }
            }
        }
    }
}

impl Clone for PluginRecall {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            controls: self.controls.clone(),
            instance: Mutex::new(None),
            active: false,
        }
    }
}

impl fmt::Debug for PluginRecall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecall")
            .field("plugin", &self.descriptor.name())
            .field("controls", &self.controls.len())
            .field("instantiated", &self.instance.lock().is_some())
            .field("active", &self.active)
            .finish()
    }
}

impl RecallBehavior for PluginRecall {
    fn name(&self) -> &'static str {
        "ags-plugin"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        self.controls.iter().map(|(_, _, p)| p.clone()).collect()
    }

    fn init(&mut self, stage: InitStage, ctx: &RecallContext<'_>) -> Result<()> {
        match stage {
            InitStage::Allocate => {
                let instance = self
                    .descriptor
                    .instantiate(ctx.presets().samplerate)
                    .map_err(|e| EngineError::Plugin(format!("{}: {e}", self.descriptor.name())))?;
                *self.instance.get_mut() = Some(instance);
            }
            InitStage::Wire => self.push_controls(),
            InitStage::Prime => {
                if let Some(instance) = self.instance.get_mut().as_mut() {
                    instance.activate();
                    self.active = true;
                    tracing::debug!(plugin = self.descriptor.name(), recall_id = %ctx.recall_id(), "plugin activated");
                }
            }
        }
        Ok(())
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Inter || !self.active {
            return;
        }
        let Some(channel) = ctx.binding().channel() else {
            return;
        };
        self.push_controls();
        if let Some(instance) = self.instance.get_mut().as_mut() {
            ctx.for_each_signal(channel, |signal| {
                if let Some(buffer) = signal.current_buffer_mut() {
                    instance.run(buffer);
                }
            });
        }
        self.pull_controls();
    }

    fn release(&mut self) {
        if let Some(mut instance) = self.instance.get_mut().take() {
            if self.active {
                instance.deactivate();
            }
            tracing::debug!(plugin = self.descriptor.name(), "plugin released");
        }
        self.active = false;
    }
}
