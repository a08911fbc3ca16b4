//! The real-time half of the engine.
//!
//! [`Renderer::process`] runs inside the device callback. It never allocates,
//! locks, or blocks: commands arrive on an `rtrb` ring and are parked in a
//! pending list whose capacity is reserved up front, buffer tables are swapped
//! in as `basedrop::Shared` pointers so freeing happens on the edit thread,
//! and everything the edit thread needs to observe is published through
//! [`EngineAtomics`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use basedrop::Shared;
use loopdeck_transport::{
    Action, AudioArc, BufferId, Command, SampleTime, ScheduledCommand, stretch_sample_time,
};

pub(crate) const FAULT_NONE: u8 = 0;
pub(crate) const FAULT_DEVICE_LOST: u8 = 1;

/// Lock-free engine state readable from the edit thread.
///
/// All fields use `Ordering::Relaxed`; readers only need eventual visibility.
pub struct EngineAtomics {
    /// Playhead on the absolute timeline, in frames
    pub position: AtomicU64,
    pub playing: AtomicBool,
    /// One of the `FAULT_*` codes
    pub fault: AtomicU8,
    pub underruns: AtomicU64,
    pub dropped_commands: AtomicU64,
}

impl EngineAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            fault: AtomicU8::new(FAULT_NONE),
            underruns: AtomicU64::new(0),
            dropped_commands: AtomicU64::new(0),
        }
    }

    pub fn position(&self) -> SampleTime {
        self.position.load(Ordering::Relaxed)
    }

    pub(crate) fn signal_device_lost(&self) {
        self.fault.store(FAULT_DEVICE_LOST, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for EngineAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of the loaded buffers, sorted by id.
pub struct BufferTable {
    entries: Vec<(BufferId, Shared<AudioArc>)>,
}

impl BufferTable {
    pub fn new(mut entries: Vec<(BufferId, Shared<AudioArc>)>) -> Self {
        entries.sort_by_key(|(id, _)| *id);
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, id: BufferId) -> Option<&Shared<AudioArc>> {
        self.entries
            .binary_search_by_key(&id, |(entry, _)| *entry)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-buffer channel strip: mix parameters plus the single voice a layer
/// can have sounding at a time.
struct Strip {
    buffer: BufferId,
    gain: f32,
    muted: bool,
    voice: Option<Shared<AudioArc>>,
    read_frame: usize,
}

impl Strip {
    fn new(buffer: BufferId) -> Self {
        Self {
            buffer,
            gain: 1.0,
            muted: false,
            voice: None,
            read_frame: 0,
        }
    }
}

pub struct RendererConfig {
    pub channels: usize,
    pub pending_capacity: usize,
    pub max_strips: usize,
}

pub struct Renderer {
    commands: rtrb::Consumer<Command>,
    tables: rtrb::Consumer<Shared<BufferTable>>,
    input: rtrb::Consumer<f32>,
    capture: rtrb::Producer<f32>,
    atomics: Arc<EngineAtomics>,
    table: Shared<BufferTable>,
    channels: usize,
    playing: bool,
    position: SampleTime,
    generation: u64,
    pending: VecDeque<ScheduledCommand>,
    strips: Vec<Strip>,
    capture_from: Option<SampleTime>,
}

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RendererConfig,
        commands: rtrb::Consumer<Command>,
        tables: rtrb::Consumer<Shared<BufferTable>>,
        initial_table: Shared<BufferTable>,
        input: rtrb::Consumer<f32>,
        capture: rtrb::Producer<f32>,
        atomics: Arc<EngineAtomics>,
    ) -> Self {
        Self {
            commands,
            tables,
            input,
            capture,
            atomics,
            table: initial_table,
            channels: config.channels.max(1),
            playing: false,
            position: 0,
            generation: 0,
            pending: VecDeque::with_capacity(config.pending_capacity),
            strips: Vec::with_capacity(config.max_strips),
            capture_from: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Scheduled commands waiting for their sample time.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn position(&self) -> SampleTime {
        self.position
    }

    /// Render one buffer of interleaved output.
    pub fn process(&mut self, data: &mut [f32]) {
        self.swap_tables();
        self.drain_commands();

        let channels = self.channels;
        for frame in data.chunks_mut(channels) {
            frame.fill(0.0);
            let input = self.input.pop().ok();

            if !self.playing {
                continue;
            }

            self.fire_due_commands();

            for strip in self.strips.iter_mut() {
                let Some(audio) = strip.voice.as_ref() else {
                    continue;
                };
                if strip.read_frame >= audio.frames() {
                    strip.voice = None;
                    continue;
                }
                if !strip.muted {
                    for (ch, out) in frame.iter_mut().enumerate() {
                        *out += audio.sample_at(strip.read_frame, ch) * strip.gain;
                    }
                }
                strip.read_frame += 1;
            }

            if self.capture_from.is_some_and(|at| self.position >= at) {
                match input {
                    Some(sample) => {
                        if self.capture.push(sample).is_err() {
                            self.atomics.record_underrun();
                        }
                    }
                    None => {
                        self.atomics.record_underrun();
                        let _ = self.capture.push(0.0);
                    }
                }
            }

            self.position += 1;
        }

        self.atomics.position.store(self.position, Ordering::Relaxed);
        self.atomics.playing.store(self.playing, Ordering::Relaxed);
    }

    fn swap_tables(&mut self) {
        let mut swapped = false;
        while let Ok(table) = self.tables.pop() {
            self.table = table;
            swapped = true;
        }
        if swapped {
            let table = &self.table;
            self.strips.retain(|strip| table.contains(strip.buffer));
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                Command::Play => self.playing = true,
                Command::Pause => self.playing = false,
                Command::Halt { generation } => {
                    self.playing = false;
                    self.position = 0;
                    self.generation = generation;
                    self.pending.clear();
                    self.capture_from = None;
                    for strip in self.strips.iter_mut() {
                        strip.voice = None;
                        strip.read_frame = 0;
                    }
                }
                Command::SetGeneration(generation) => {
                    self.generation = generation;
                    self.pending.retain(|c| c.generation >= generation);
                }
                Command::Schedule(scheduled) => self.enqueue(scheduled),
                Command::SetGain { buffer, gain } => {
                    if let Some(strip) = self.strip_mut(buffer) {
                        strip.gain = gain;
                    }
                }
                Command::SetMuted { buffer, muted } => {
                    if let Some(strip) = self.strip_mut(buffer) {
                        strip.muted = muted;
                    }
                }
                Command::BeginCapture { at } => self.capture_from = Some(at),
                Command::EndCapture => self.capture_from = None,
                Command::Stretch { from, to } => {
                    self.position = stretch_sample_time(self.position, from, to);
                    self.capture_from = self
                        .capture_from
                        .map(|at| stretch_sample_time(at, from, to));
                }
            }
        }
    }

    fn enqueue(&mut self, scheduled: ScheduledCommand) {
        if scheduled.generation < self.generation {
            return;
        }
        if self.pending.len() == self.pending.capacity() {
            self.atomics.dropped_commands.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // stable: equal times keep enqueue order
        let idx = self
            .pending
            .partition_point(|c| c.sample_time <= scheduled.sample_time);
        self.pending.insert(idx, scheduled);
    }

    fn fire_due_commands(&mut self) {
        while let Some(next) = self.pending.front() {
            if next.sample_time > self.position {
                break;
            }
            let Some(command) = self.pending.pop_front() else {
                break;
            };
            if command.generation < self.generation {
                continue;
            }
            self.execute(command);
        }
    }

    fn execute(&mut self, command: ScheduledCommand) {
        let position = self.position;
        match command.action {
            Action::Trigger => {
                let Some(audio) = self.table.get(command.buffer).cloned() else {
                    return;
                };
                if let Some(strip) = self.strip_mut(command.buffer) {
                    // a late trigger starts where it would be had it fired on time
                    strip.read_frame = (position - command.sample_time) as usize;
                    strip.voice = Some(audio);
                }
            }
            Action::Stop => {
                if let Some(strip) = self.strips.iter_mut().find(|s| s.buffer == command.buffer) {
                    strip.voice = None;
                    strip.read_frame = 0;
                }
            }
        }
    }

    fn strip_mut(&mut self, buffer: BufferId) -> Option<&mut Strip> {
        if let Some(idx) = self.strips.iter().position(|s| s.buffer == buffer) {
            return Some(&mut self.strips[idx]);
        }
        // may precede the table that introduces `buffer`; the next swap prunes it otherwise
        if self.strips.len() == self.strips.capacity() {
            return None;
        }
        self.strips.push(Strip::new(buffer));
        self.strips.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use loopdeck_transport::LayerId;

    struct Rig {
        renderer: Renderer,
        commands: rtrb::Producer<Command>,
        tables: rtrb::Producer<Shared<BufferTable>>,
        input: rtrb::Producer<f32>,
        capture: rtrb::Consumer<f32>,
        atomics: Arc<EngineAtomics>,
        collector: Collector,
    }

    fn rig(buffers: &[(u32, Vec<f32>)]) -> Rig {
        let collector = Collector::new();
        let handle = collector.handle();
        let entries = buffers
            .iter()
            .map(|(id, samples)| {
                (
                    BufferId(*id),
                    Shared::new(&handle, AudioArc::new(samples.clone(), 1000, 1)),
                )
            })
            .collect();
        let table = Shared::new(&handle, BufferTable::new(entries));

        let (commands, commands_rx) = rtrb::RingBuffer::new(64);
        let (tables, tables_rx) = rtrb::RingBuffer::new(4);
        let (input, input_rx) = rtrb::RingBuffer::new(64);
        let (capture_tx, capture) = rtrb::RingBuffer::new(64);
        let atomics = Arc::new(EngineAtomics::new());

        let renderer = Renderer::new(
            RendererConfig {
                channels: 1,
                pending_capacity: 8,
                max_strips: 4,
            },
            commands_rx,
            tables_rx,
            table,
            input_rx,
            capture_tx,
            atomics.clone(),
        );

        Rig {
            renderer,
            commands,
            tables,
            input,
            capture,
            atomics,
            collector,
        }
    }

    fn scheduled(time: u64, buffer: u32, action: Action, generation: u64) -> Command {
        Command::Schedule(ScheduledCommand {
            sample_time: time,
            layer: LayerId(buffer as u64),
            buffer: BufferId(buffer),
            action,
            generation,
        })
    }

    fn render(rig: &mut Rig, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        rig.renderer.process(&mut out);
        out
    }

    #[test]
    fn test_silent_until_play() {
        let mut rig = rig(&[(1, vec![1.0; 8])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();

        assert_eq!(render(&mut rig, 4), vec![0.0; 4]);
        assert_eq!(rig.atomics.position(), 0);

        rig.commands.push(Command::Play).unwrap();
        assert_eq!(render(&mut rig, 4), vec![1.0; 4]);
        assert_eq!(rig.atomics.position(), 4);
    }

    #[test]
    fn test_trigger_and_stop_are_sample_accurate() {
        let mut rig = rig(&[(1, vec![0.5; 16])]);
        rig.commands.push(scheduled(2, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(scheduled(5, 1, Action::Stop, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();

        let out = render(&mut rig, 8);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
        assert_eq!(rig.renderer.pending_len(), 0);
    }

    #[test]
    fn test_voice_ends_with_its_audio() {
        let mut rig = rig(&[(1, vec![1.0, 2.0])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();

        assert_eq!(render(&mut rig, 4), vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_late_trigger_starts_aligned() {
        let mut rig = rig(&[(1, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])]);
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 3);

        // arrives after its time: plays from the offset it would have reached
        rig.commands.push(scheduled(1, 1, Action::Trigger, 0)).unwrap();
        assert_eq!(render(&mut rig, 2), vec![2.0, 3.0]);
    }

    #[test]
    fn test_stale_generation_is_skipped() {
        let mut rig = rig(&[(1, vec![1.0; 8])]);
        rig.commands.push(scheduled(2, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::SetGeneration(1)).unwrap();
        rig.commands.push(scheduled(3, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();

        assert_eq!(render(&mut rig, 4), vec![0.0; 4]);
        assert_eq!(rig.renderer.pending_len(), 0);
    }

    #[test]
    fn test_halt_rewinds_and_drops_pending() {
        let mut rig = rig(&[(1, vec![1.0; 64])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(scheduled(40, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 8);
        assert_eq!(rig.renderer.pending_len(), 1);

        rig.commands.push(Command::Halt { generation: 1 }).unwrap();
        assert_eq!(render(&mut rig, 4), vec![0.0; 4]);
        assert_eq!(rig.atomics.position(), 0);
        assert_eq!(rig.renderer.pending_len(), 0);

        rig.commands.push(Command::Play).unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.0; 2], "voice was silenced");
    }

    #[test]
    fn test_stretch_moves_playhead_and_keeps_voice() {
        let mut rig = rig(&[(1, (0..16).map(|i| i as f32).collect())]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::BeginCapture { at: 8 }).unwrap();
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 6);

        rig.commands.push(Command::Stretch { from: 1, to: 2 }).unwrap();
        assert_eq!(render(&mut rig, 2), vec![6.0, 7.0]);
        assert_eq!(rig.atomics.position(), 5);

        // capture start moved from 8 to 4
        assert!(rig.capture.pop().is_ok());
    }

    #[test]
    fn test_pause_keeps_position_and_voice() {
        let mut rig = rig(&[(1, vec![0.0, 1.0, 2.0, 3.0])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.0, 1.0]);

        rig.commands.push(Command::Pause).unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.0, 0.0]);
        assert_eq!(rig.atomics.position(), 2);

        rig.commands.push(Command::Play).unwrap();
        assert_eq!(render(&mut rig, 2), vec![2.0, 3.0]);
    }

    #[test]
    fn test_gain_and_mute_apply_at_buffer_boundary() {
        let mut rig = rig(&[(1, vec![1.0; 16])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 2);

        rig.commands
            .push(Command::SetGain {
                buffer: BufferId(1),
                gain: 0.5,
            })
            .unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.5, 0.5]);

        rig.commands
            .push(Command::SetMuted {
                buffer: BufferId(1),
                muted: true,
            })
            .unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_full_pending_list_counts_dropped() {
        let mut rig = rig(&[(1, vec![1.0; 4])]);
        for t in 0..10 {
            rig.commands
                .push(scheduled(100 + t, 1, Action::Trigger, 0))
                .unwrap();
        }
        render(&mut rig, 1);

        assert_eq!(rig.renderer.pending_len(), 8);
        assert_eq!(rig.atomics.dropped_commands.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_table_swap_drops_unloaded_voice() {
        let mut rig = rig(&[(1, vec![1.0; 16])]);
        rig.commands.push(scheduled(0, 1, Action::Trigger, 0)).unwrap();
        rig.commands.push(Command::Play).unwrap();
        assert_eq!(render(&mut rig, 2), vec![1.0, 1.0]);

        let empty = Shared::new(&rig.collector.handle(), BufferTable::empty());
        rig.tables.push(empty).unwrap();
        assert_eq!(render(&mut rig, 2), vec![0.0, 0.0]);
        rig.collector.collect();
    }

    #[test]
    fn test_capture_starts_at_requested_sample() {
        let mut rig = rig(&[]);
        for i in 0..8 {
            rig.input.push(i as f32).unwrap();
        }
        rig.commands.push(Command::BeginCapture { at: 3 }).unwrap();
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 6);

        let mut captured = Vec::new();
        while let Ok(sample) = rig.capture.pop() {
            captured.push(sample);
        }
        assert_eq!(captured, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_missing_input_while_capturing_is_underrun() {
        let mut rig = rig(&[]);
        rig.commands.push(Command::BeginCapture { at: 0 }).unwrap();
        rig.commands.push(Command::Play).unwrap();
        render(&mut rig, 2);

        assert_eq!(rig.atomics.underruns.load(Ordering::Relaxed), 2);
        assert_eq!(rig.capture.slots(), 2);
    }
}
