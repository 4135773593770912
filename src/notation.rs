//! Notes and step patterns read by the sequencing recalls.

/// One note: from tic `x0` up to (excluding) tic `x1` on input pad `y`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    pub x0: u64,
    pub x1: u64,
    pub y: usize,
    pub velocity: f32,
}

impl Note {
    pub fn new(x0: u64, x1: u64, y: usize) -> Self {
        Self {
            x0,
            x1: x1.max(x0 + 1),
            y,
            velocity: 1.0,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    /// Length in tics.
    pub fn length(&self) -> u64 {
        self.x1 - self.x0
    }
}

/// Notes of one audio, kept sorted by start tic then pad.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Notation {
    notes: Vec<Note>,
}

impl Notation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_note(&mut self, note: Note) {
        let at = self
            .notes
            .partition_point(|n| (n.x0, n.y) <= (note.x0, note.y));
        self.notes.insert(at, note);
    }

    /// Remove the note starting at `x0` on pad `y`.
    pub fn remove_note(&mut self, x0: u64, y: usize) -> Option<Note> {
        let i = self.notes.iter().position(|n| n.x0 == x0 && n.y == y)?;
        Some(self.notes.remove(i))
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes starting on tic `x0`.
    pub fn starting_at(&self, x0: u64) -> &[Note] {
        let from = self.notes.partition_point(|n| n.x0 < x0);
        let to = self.notes.partition_point(|n| n.x0 <= x0);
        &self.notes[from..to]
    }

    /// Tic after the last note ends.
    pub fn end(&self) -> u64 {
        self.notes.iter().map(|n| n.x1).max().unwrap_or(0)
    }
}

/// On/off steps of one pad.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<bool>,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Pattern {
    pub fn new(length: usize) -> Self {
        Self {
            steps: vec![false; length.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(|s| !s)
    }

    pub fn is_set(&self, step: usize) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }

    pub fn set(&mut self, step: usize, on: bool) {
        if let Some(s) = self.steps.get_mut(step) {
            *s = on;
        }
    }

    pub fn toggle(&mut self, step: usize) {
        if let Some(s) = self.steps.get_mut(step) {
            *s = !*s;
        }
    }

    /// Grow or shrink, keeping existing steps.
    pub fn resize(&mut self, length: usize) {
        self.steps.resize(length.max(1), false);
    }

    /// Step played at sequencer position `note_offset`.
    pub fn step_at(&self, note_offset: u64) -> usize {
        (note_offset % self.steps.len() as u64) as usize
    }
}
