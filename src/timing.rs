//! Sample-accurate musical clock.
//!
//! The tempo is stored as an exact rational number of frames per tic, so the
//! frame of tic `k` is computed directly from `k` rather than accumulated
//! cycle by cycle. Fractional remainders carry forward losslessly: over any
//! number of cycles, tic `k` lands within one frame of `k · 60 / bpm /
//! subdivisions` seconds.

/// Cycles per tic: `samplerate · 60 / (bpm · subdivisions · buffer_size)`.
pub fn delay_per_tic(samplerate: u32, buffer_size: usize, bpm: f64, subdivisions: u32) -> f64 {
    samplerate as f64 * 60.0 / (bpm * subdivisions as f64 * buffer_size as f64)
}

/// Tables longer than this are not materialized; lookups compute directly.
const MAX_TABLE_LEN: u128 = 16384;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Exact frames-per-tic as a reduced fraction. Tempo is quantized to 1/1000 bpm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tempo {
    num: u128,
    den: u128,
}

impl Tempo {
    pub fn new(samplerate: u32, bpm: f64, subdivisions: u32) -> Self {
        let bpm_milli = (bpm * 1000.0).round().max(1.0) as u128;
        let num = samplerate as u128 * 60 * 1000;
        let den = bpm_milli * subdivisions.max(1) as u128;
        let g = gcd(num, den);
        Self {
            num: num / g,
            den: den / g,
        }
    }

    #[inline]
    pub fn frames_per_tic(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Frame of tic `k` relative to tic 0.
    #[inline]
    pub fn offset(&self, k: u64) -> u64 {
        (k as u128 * self.num / self.den) as u64
    }

    /// `frames` at this tempo, rescaled to the same fraction of a tic at `to`.
    pub fn rescale(&self, frames: u64, to: &Tempo) -> u64 {
        (frames as u128 * to.num * self.den / (to.den * self.num)) as u64
    }

    /// Number of tics after which tic phases within a buffer repeat.
    pub fn period(&self, buffer_size: usize) -> u128 {
        let span = self.den * buffer_size as u128;
        span / gcd(self.num, span)
    }
}

/// One tic landing inside the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicEvent {
    /// Sequencer position, wrapped by the loop region
    pub note_offset: u64,
    /// Tics since the clock started
    pub note_offset_absolute: u64,
    /// Frame offset of the tic inside the cycle buffer
    pub attack: usize,
}

/// Per-phase `attack` (frame in buffer) and `delay` (cycles to the next tic)
/// for one period of tics starting at the tempo origin.
#[derive(Clone, Debug, Default)]
struct TimingTable {
    attack: Vec<u32>,
    delay: Vec<u32>,
    complete: bool,
}

impl TimingTable {
    fn build(tempo: &Tempo, origin_frame: u64, buffer_size: usize) -> Self {
        let period = tempo.period(buffer_size);
        let len = period.min(MAX_TABLE_LEN) as usize;
        let bs = buffer_size as u64;

        let mut attack = Vec::with_capacity(len);
        let mut delay = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let frame = origin_frame + tempo.offset(i);
            let next = origin_frame + tempo.offset(i + 1);
            attack.push((frame % bs) as u32);
            delay.push((next / bs - frame / bs) as u32);
        }

        Self {
            attack,
            delay,
            complete: period <= MAX_TABLE_LEN,
        }
    }
}

/// The engine's master clock.
#[derive(Clone, Debug)]
pub struct Clock {
    samplerate: u32,
    buffer_size: usize,
    subdivisions: u32,
    bpm: f64,
    tempo: Tempo,

    origin_frame: u64,
    origin_tic: u64,

    tic_counter: u64,
    next_tic: u64,
    last_tic_frame: u64,
    started: bool,

    note_offset: u64,
    note_offset_absolute: u64,
    next_note_offset: u64,

    delay_counter: f64,
    tact_counter: f64,

    loop_left: u64,
    loop_right: u64,
    do_loop: bool,

    table: TimingTable,
}

impl Clock {
    pub fn new(samplerate: u32, buffer_size: usize, bpm: f64, subdivisions: u32) -> Self {
        let tempo = Tempo::new(samplerate, bpm, subdivisions);
        Self {
            samplerate,
            buffer_size,
            subdivisions,
            bpm,
            tempo,
            origin_frame: 0,
            origin_tic: 0,
            tic_counter: 0,
            next_tic: 0,
            last_tic_frame: 0,
            started: false,
            note_offset: 0,
            note_offset_absolute: 0,
            next_note_offset: 0,
            delay_counter: 0.0,
            tact_counter: 0.0,
            loop_left: 0,
            loop_right: 64,
            do_loop: false,
            table: TimingTable::build(&tempo, 0, buffer_size),
        }
    }

    /// Frame on which tic `k` lands. `k` must not precede the tempo origin.
    #[inline]
    pub fn tic_frame(&self, k: u64) -> u64 {
        self.origin_frame + self.tempo.offset(k.saturating_sub(self.origin_tic))
    }

    /// Advance by one cycle, collecting the tics that land in it.
    pub fn advance(&mut self, tics: &mut Vec<TicEvent>) {
        tics.clear();

        let bs = self.buffer_size as u64;
        let start = self.tic_counter * bs;
        let end = start + bs;

        while self.tic_frame(self.next_tic) < end {
            let k = self.next_tic;
            // After a tempo change the next tic may already be overdue.
            let frame = self.tic_frame(k).max(start);

            self.note_offset = self.next_note_offset;
            self.note_offset_absolute = k;
            self.next_note_offset = self.wrap(self.note_offset + 1);
            self.last_tic_frame = frame;
            self.started = true;

            tics.push(TicEvent {
                note_offset: self.note_offset,
                note_offset_absolute: k,
                attack: (frame - start) as usize,
            });

            self.next_tic += 1;
        }

        self.tic_counter += 1;

        if self.started {
            let since_tic = end - self.last_tic_frame.min(end);
            self.delay_counter = since_tic as f64 / bs as f64;
            self.tact_counter =
                self.note_offset_absolute as f64 + since_tic as f64 / self.tempo.frames_per_tic();
        }
    }

    fn wrap(&self, note_offset: u64) -> u64 {
        if self.do_loop && note_offset >= self.loop_right {
            self.loop_left
        } else {
            note_offset
        }
    }

    /// Change tempo at the current cycle boundary.
    ///
    /// The pending tic keeps its phase: the part of it not yet played is
    /// rescaled to the new tic length, and every later tic follows from there.
    pub fn set_bpm(&mut self, bpm: f64) {
        if (bpm - self.bpm).abs() < f64::EPSILON {
            return;
        }
        let tempo = Tempo::new(self.samplerate, bpm, self.subdivisions);
        if self.started {
            let now = self.frames_elapsed();
            let remaining = self.tic_frame(self.next_tic).saturating_sub(now);
            self.origin_frame = now + self.tempo.rescale(remaining, &tempo);
            self.origin_tic = self.next_tic;
        }
        self.bpm = bpm;
        self.tempo = tempo;
        self.table = TimingTable::build(&self.tempo, self.origin_frame, self.buffer_size);
    }

    pub fn set_loop(&mut self, left: u64, right: u64, do_loop: bool) {
        self.loop_left = left;
        self.loop_right = right.max(left + 1);
        self.do_loop = do_loop;
        self.next_note_offset = self.wrap(self.next_note_offset);
    }

    /// Jump the sequencer position; the next tic reports `note_offset`.
    pub fn seek(&mut self, note_offset: u64) {
        self.next_note_offset = self.wrap(note_offset);
    }

    /// Frame offset in the buffer of tic `k`.
    pub fn attack_at(&self, k: u64) -> usize {
        let rel = k.saturating_sub(self.origin_tic);
        if self.table.complete && !self.table.attack.is_empty() {
            self.table.attack[(rel % self.table.attack.len() as u64) as usize] as usize
        } else {
            (self.tic_frame(k) % self.buffer_size as u64) as usize
        }
    }

    /// Cycle boundaries crossed between tic `k` and tic `k + 1`.
    pub fn delay_at(&self, k: u64) -> u32 {
        let rel = k.saturating_sub(self.origin_tic);
        if self.table.complete && !self.table.delay.is_empty() {
            self.table.delay[(rel % self.table.delay.len() as u64) as usize]
        } else {
            let bs = self.buffer_size as u64;
            (self.tic_frame(k + 1) / bs - self.tic_frame(k) / bs) as u32
        }
    }

    pub fn attack_table(&self) -> &[u32] {
        &self.table.attack
    }

    pub fn delay_table(&self) -> &[u32] {
        &self.table.delay
    }

    /// Cycles per tic at the current tempo.
    pub fn delay(&self) -> f64 {
        self.tempo.frames_per_tic() / self.buffer_size as f64
    }

    pub fn frames_per_tic(&self) -> f64 {
        self.tempo.frames_per_tic()
    }

    /// Frames covered by completed cycles.
    pub fn frames_elapsed(&self) -> u64 {
        self.tic_counter * self.buffer_size as u64
    }

    pub fn tic_counter(&self) -> u64 {
        self.tic_counter
    }

    pub fn note_offset(&self) -> u64 {
        self.note_offset
    }

    pub fn note_offset_absolute(&self) -> u64 {
        self.note_offset_absolute
    }

    pub fn delay_counter(&self) -> f64 {
        self.delay_counter
    }

    pub fn tact_counter(&self) -> f64 {
        self.tact_counter
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    pub fn loop_region(&self) -> (u64, u64, bool) {
        (self.loop_left, self.loop_right, self.do_loop)
    }

    pub fn has_started(&self) -> bool {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_is_reduced_and_exact() {
        let tempo = Tempo::new(44100, 120.0, 4);
        assert_eq!(tempo.frames_per_tic(), 5512.5);
        assert_eq!(tempo.offset(2), 11025);
        assert_eq!(tempo.offset(3), 16537);
        assert_eq!(tempo.period(1024), 2048);
    }

    #[test]
    fn delay_formula() {
        let d = delay_per_tic(44100, 1024, 120.0, 4);
        assert!((d - 5512.5 / 1024.0).abs() < 1e-12);
    }

    #[test]
    fn first_tic_fires_on_first_cycle() {
        let mut clock = Clock::new(44100, 512, 120.0, 4);
        let mut tics = Vec::new();
        clock.advance(&mut tics);
        assert_eq!(tics.len(), 1);
        assert_eq!(tics[0].note_offset, 0);
        assert_eq!(tics[0].attack, 0);
    }

    #[test]
    fn table_matches_direct_computation() {
        let clock = Clock::new(44100, 1024, 120.0, 4);
        assert_eq!(clock.attack_table().len(), 2048);
        for k in [0u64, 1, 7, 2047, 2048, 5000] {
            assert_eq!(clock.attack_at(k), (clock.tic_frame(k) % 1024) as usize);
            let direct = (clock.tic_frame(k + 1) / 1024 - clock.tic_frame(k) / 1024) as u32;
            assert_eq!(clock.delay_at(k), direct);
        }
    }

    #[test]
    fn loop_wraps_note_offset() {
        let mut clock = Clock::new(1000, 10, 600.0, 1);
        // 100 frames per tic, 10 cycles per tic
        clock.set_loop(2, 4, true);
        clock.seek(2);
        let mut tics = Vec::new();
        let mut seen = Vec::new();
        for _ in 0..60 {
            clock.advance(&mut tics);
            seen.extend(tics.iter().map(|t| t.note_offset));
        }
        assert_eq!(seen, vec![2, 3, 2, 3, 2, 3]);
        assert_eq!(clock.note_offset_absolute(), 5);
    }

    #[test]
    fn tempo_change_keeps_the_pending_phase() {
        let mut clock = Clock::new(1000, 10, 600.0, 1);
        let mut tics = Vec::new();
        for _ in 0..15 {
            clock.advance(&mut tics);
        }
        assert_eq!(clock.note_offset_absolute(), 1);
        // tic 2 was half way, 50 of 100 frames left
        clock.set_bpm(1200.0);
        assert_eq!(clock.tic_frame(2), 150 + 25);
        assert_eq!(clock.tic_frame(3), 175 + 50);
    }

    #[test]
    fn speeding_up_fires_only_the_tics_of_the_cycle() {
        // 1000 frames per tic, 10 cycles per tic
        let mut clock = Clock::new(1000, 100, 60.0, 1);
        let mut tics = Vec::new();
        for _ in 0..9 {
            clock.advance(&mut tics);
        }
        assert_eq!(clock.note_offset_absolute(), 0);

        // 10 frames per tic from here on
        clock.set_bpm(6000.0);
        for _ in 0..2 {
            clock.advance(&mut tics);
            assert_eq!(tics.len(), 10);
            let attacks: Vec<usize> = tics.iter().map(|t| t.attack).collect();
            assert_eq!(attacks, (0..10).map(|i| 1 + 10 * i).collect::<Vec<_>>());
        }
        let offsets: Vec<u64> = tics.iter().map(|t| t.note_offset).collect();
        assert_eq!(offsets, (11..21).collect::<Vec<_>>());

        // and back down: the next tic is ten times further away
        clock.set_bpm(60.0);
        clock.advance(&mut tics);
        assert!(tics.is_empty());
        assert_eq!(clock.tic_frame(21), 1200);
    }
}
