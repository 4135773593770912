use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A named control value shared between a template and its live copies.
///
/// Ports are written from control threads and read on the audio thread, so
/// the value is an `f32` stored in an atomic.
#[derive(Debug)]
pub struct Port {
    name: Cow<'static, str>,
    value: AtomicU32,
}

impl Port {
    pub fn new(name: impl Into<Cow<'static, str>>, value: f32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            value: AtomicU32::new(value.to_bits()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }
}
