//! Turns the edit-time grid into timed engine commands.
//!
//! The grid loops forever: absolute slot `64k + s` plays grid slot `s`. The
//! scheduler keeps a cursor on that unwrapped slot timeline and hands out
//! commands a bounded window ahead of the playhead. Any edit bumps the
//! generation so the renderer skips whatever was queued for the old layout,
//! then the window is rebuilt from the playhead.

use loopdeck_transport::{
    Action, BufferId, GRID_SLOTS, Layer, LayerId, PatternBlock, SampleTime, ScheduledCommand,
    Track,
};

use crate::time::TempoClock;

/// Audible layers and their blocks, frozen at the last replan.
#[derive(Debug, Clone, PartialEq)]
struct LayerPlan {
    layer: LayerId,
    buffer: BufferId,
    blocks: Vec<PatternBlock>,
}

/// Commands for one stretch of the timeline. Pass `until` to
/// [`Scheduler::advance`] once the commands have been delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    pub commands: Vec<ScheduledCommand>,
    pub until: u64,
}

/// A layer plays iff neither it nor its track is muted and either nothing in
/// the session is soloed or the layer itself is.
pub fn is_audible(track: &Track, layer: &Layer, any_solo: bool) -> bool {
    !track.muted && !layer.muted && (!any_solo || layer.solo)
}

pub fn any_solo(tracks: &[Track]) -> bool {
    tracks
        .iter()
        .flat_map(|track| track.layers())
        .any(|layer| layer.solo)
}

/// Stable order: time, then stops before triggers, then layer.
pub fn sort_commands(commands: &mut [ScheduledCommand]) {
    commands.sort_by_key(|c| (c.sample_time, c.action, c.layer));
}

#[derive(Debug)]
pub struct Scheduler {
    lookahead_slots: u32,
    generation: u64,
    /// First unwrapped slot with no commands handed out yet
    next_slot: u64,
    plan: Vec<LayerPlan>,
}

impl Scheduler {
    pub fn new(lookahead_slots: u32) -> Self {
        Self {
            lookahead_slots: lookahead_slots.max(1),
            generation: 0,
            next_slot: 0,
            plan: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lookahead_slots(&self) -> u32 {
        self.lookahead_slots
    }

    pub fn next_slot(&self) -> u64 {
        self.next_slot
    }

    /// Number of layers that currently produce commands.
    pub fn audible_layers(&self) -> usize {
        self.plan.len()
    }

    /// Rebuild the plan from the model without touching the timeline.
    pub fn replan(&mut self, tracks: &[Track]) {
        let any_solo = any_solo(tracks);
        let mut plan: Vec<LayerPlan> = tracks
            .iter()
            .flat_map(|track| {
                track
                    .layers()
                    .iter()
                    .filter(move |layer| is_audible(track, layer, any_solo))
            })
            .map(|layer| LayerPlan {
                layer: layer.id,
                buffer: layer.buffer(),
                blocks: layer.blocks().to_vec(),
            })
            .collect();
        plan.sort_by_key(|p| p.layer);
        self.plan = plan;
    }

    /// Forget everything queued and rewind the cursor. Returns the new
    /// generation for the engine's halt.
    pub fn reset(&mut self) -> u64 {
        self.generation += 1;
        self.next_slot = 0;
        self.generation
    }

    pub fn advance(&mut self, until: u64) {
        self.next_slot = self.next_slot.max(until);
    }

    /// Commands from the cursor up to `lookahead_slots` past the slot under
    /// `position`.
    pub fn window(&self, position: SampleTime, clock: &TempoClock) -> Window {
        let horizon = clock.absolute_slot(position) + self.lookahead_slots as u64;
        let mut commands = Vec::new();
        for slot in self.next_slot..horizon {
            self.emit_slot(slot, clock, &mut commands);
        }
        sort_commands(&mut commands);
        Window {
            commands,
            until: horizon.max(self.next_slot),
        }
    }

    /// Replan after an edit and recompute from `position`.
    ///
    /// Every layer gets either a trigger at the start of the block sounding
    /// at `position`, which the renderer aligns so the voice carries on, or
    /// a stop at `position`. The cursor then restarts at the next slot
    /// boundary.
    pub fn invalidate(
        &mut self,
        tracks: &[Track],
        position: SampleTime,
        clock: &TempoClock,
    ) -> Window {
        let mut previous: Vec<(LayerId, BufferId)> =
            self.plan.iter().map(|p| (p.layer, p.buffer)).collect();

        self.generation += 1;
        self.replan(tracks);

        let current = clock.absolute_slot(position);
        let grid = (current % GRID_SLOTS as u64) as u32;
        let mut commands = Vec::new();

        for plan in &self.plan {
            let sounding = plan
                .blocks
                .iter()
                .find(|block| block.contains(grid))
                .map(|block| clock.absolute_to_sample_time(current - (grid - block.start()) as u64))
                .filter(|&start| start < position);

            match sounding {
                Some(start) => commands.push(self.command(plan, start, Action::Trigger)),
                None => commands.push(self.command(plan, position, Action::Stop)),
            }
            previous.retain(|(layer, _)| *layer != plan.layer);
        }

        // layers that went silent or were removed
        for (layer, buffer) in previous {
            commands.push(ScheduledCommand {
                sample_time: position,
                layer,
                buffer,
                action: Action::Stop,
                generation: self.generation,
            });
        }

        self.next_slot = clock.next_boundary(position);
        let mut window = self.window(position, clock);
        commands.append(&mut window.commands);
        sort_commands(&mut commands);

        log::debug!(
            "scheduler generation {}: {} commands from slot {}",
            self.generation,
            commands.len(),
            self.next_slot
        );

        Window {
            commands,
            until: window.until,
        }
    }

    fn emit_slot(&self, slot: u64, clock: &TempoClock, out: &mut Vec<ScheduledCommand>) {
        let grid = (slot % GRID_SLOTS as u64) as u32;
        let at = clock.absolute_to_sample_time(slot);

        for plan in &self.plan {
            for block in &plan.blocks {
                // a block ending on the last slot stops at the next loop's slot 0
                if block.end() % GRID_SLOTS == grid && slot >= block.length() as u64 {
                    out.push(self.command(plan, at, Action::Stop));
                }
                if block.start() == grid {
                    out.push(self.command(plan, at, Action::Trigger));
                }
            }
        }
    }

    fn command(&self, plan: &LayerPlan, sample_time: SampleTime, action: Action) -> ScheduledCommand {
        ScheduledCommand {
            sample_time,
            layer: plan.layer,
            buffer: plan.buffer,
            action,
            generation: self.generation,
        }
    }
}
