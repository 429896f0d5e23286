//! Per-slot visual state for smooth marker transitions
//!
//! Every slot runs the cycle `Hidden → Appearing → Idle → Disappearing → Hidden`. While
//! `Appearing` or `Idle`, a slot may switch between cluster and single display through a
//! [`Morph`]; a morph never passes through `Hidden` and never changes the slot, so the
//! renderer keeps the same element and only animates its content.
//!
//! Morphs are reserved for one lineage: the new feature must share the old one's id or
//! anchor. When the pool hands a visible slot to an unrelated feature, the slot restarts
//! its appear animation instead.

use crate::assign::{DisplayMode, PoolSlot};
use crate::feature::ClusterFeature;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a slot's visual element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    Hidden,
    Appearing,
    Idle,
    Disappearing,
}

/// An in-place change of display mode
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Morph {
    pub from: DisplayMode,
    pub to: DisplayMode,
    /// 0.0 at the start, 1.0 when done
    pub progress: f32,
}

/// What the renderer should draw for one slot this frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotVisual {
    pub slot_index: usize,
    pub phase: Phase,
    /// Mode currently presented; a disappearing slot keeps the mode it fades out with
    pub mode: DisplayMode,
    /// Feature currently presented, if any
    pub feature: Option<ClusterFeature>,
    /// Progress of the current phase, 1.0 once settled
    pub progress: f32,
    pub morph: Option<Morph>,
}

/// Number of transitions started by one [`ModeTransitionController::update`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransitionStats {
    pub appearing: usize,
    pub disappearing: usize,
    pub morphing: usize,
    /// Visible slots handed to an unrelated feature
    pub swapped: usize,
}

#[derive(Debug, Clone, Copy)]
struct MorphState {
    from: DisplayMode,
    elapsed: u16,
}

#[derive(Debug, Clone)]
struct SlotState {
    phase: Phase,
    elapsed: u16,
    mode: DisplayMode,
    feature: Option<ClusterFeature>,
    morph: Option<MorphState>,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            phase: Phase::Hidden,
            elapsed: 0,
            mode: DisplayMode::Hidden,
            feature: None,
            morph: None,
        }
    }
}

impl SlotState {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn advance_morph(&mut self, frames: u16) {
        if let Some(morph) = &mut self.morph {
            morph.elapsed = morph.elapsed.saturating_add(1);
            if morph.elapsed >= frames {
                self.morph = None;
            }
        }
    }

    fn start_appearing(&mut self, elapsed: u16) {
        self.phase = Phase::Appearing;
        self.elapsed = elapsed;
        self.morph = None;
    }

    /// Advance one frame
    fn step(&mut self, frames: u16) {
        match self.phase {
            Phase::Hidden => {}
            Phase::Appearing => {
                self.advance_morph(frames);
                self.elapsed = self.elapsed.saturating_add(1);
                if self.elapsed >= frames {
                    self.phase = Phase::Idle;
                    self.elapsed = 0;
                }
            }
            Phase::Idle => self.advance_morph(frames),
            Phase::Disappearing => {
                self.elapsed = self.elapsed.saturating_add(1);
                if self.elapsed >= frames {
                    self.reset();
                }
            }
        }
    }

    /// Finish any transition immediately when animations are disabled
    fn settle(&mut self, frames: u16) {
        if frames > 0 {
            return;
        }
        match self.phase {
            Phase::Appearing => {
                self.phase = Phase::Idle;
                self.elapsed = 0;
                self.morph = None;
            }
            Phase::Disappearing => self.reset(),
            Phase::Idle => self.morph = None,
            Phase::Hidden => {}
        }
    }
}

/// Whether `next` continues the feature `previous` (same feature, or merged/split from it)
#[inline]
fn same_lineage(previous: &ClusterFeature, next: &ClusterFeature) -> bool {
    previous.feature_id == next.feature_id || previous.anchor == next.anchor
}

#[inline]
fn fraction(elapsed: u16, frames: u16) -> f32 {
    if frames == 0 {
        1.0
    } else {
        (f32::from(elapsed) / f32::from(frames)).min(1.0)
    }
}

/// Drives the visual lifecycle of every pool slot
#[derive(Debug, Clone)]
pub struct ModeTransitionController {
    states: Vec<SlotState>,
    frames: u16,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ModeTransitionController {
    /// Create a controller for `capacity` slots with `frames`-long animations
    pub fn new(capacity: usize, frames: u16) -> Self {
        Self {
            states: vec![SlotState::default(); capacity],
            frames,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.states.len()
    }

    /// Apply a new pool state, starting the transitions it implies
    pub fn update(&mut self, slots: &[PoolSlot]) -> TransitionStats {
        debug_assert_eq!(slots.len(), self.states.len());
        let mut stats = TransitionStats::default();

        for (state, slot) in self.states.iter_mut().zip(slots) {
            match (slot.is_visible(), slot.feature()) {
                (true, Some(feature)) => {
                    let mode = slot.display_mode();
                    let related = state
                        .feature
                        .as_ref()
                        .is_some_and(|previous| same_lineage(previous, feature));
                    match state.phase {
                        Phase::Hidden => {
                            state.start_appearing(0);
                            stats.appearing += 1;
                        }
                        Phase::Disappearing => {
                            // The same feature fades back in from wherever the fade out
                            // got to; anything else starts over
                            let elapsed = if related {
                                self.frames.saturating_sub(state.elapsed)
                            } else {
                                0
                            };
                            state.start_appearing(elapsed);
                            stats.appearing += 1;
                        }
                        Phase::Appearing | Phase::Idle if !related => {
                            state.start_appearing(0);
                            stats.swapped += 1;
                        }
                        Phase::Appearing | Phase::Idle => {
                            if state.mode != mode {
                                state.morph = Some(MorphState {
                                    from: state.mode,
                                    elapsed: 0,
                                });
                                stats.morphing += 1;
                            }
                        }
                    }
                    state.mode = mode;
                    state.feature = Some(feature.clone());
                }
                _ => match state.phase {
                    Phase::Appearing | Phase::Idle => {
                        state.elapsed = match state.phase {
                            Phase::Appearing => self.frames.saturating_sub(state.elapsed),
                            _ => 0,
                        };
                        state.phase = Phase::Disappearing;
                        state.morph = None;
                        stats.disappearing += 1;
                    }
                    Phase::Disappearing | Phase::Hidden => {}
                },
            }
            state.settle(self.frames);
        }

        stats
    }

    /// Advance every animation by one frame
    pub fn tick(&mut self) {
        for state in &mut self.states {
            state.step(self.frames);
        }
    }

    /// Whether any slot is still animating
    pub fn is_animating(&self) -> bool {
        self.states.iter().any(|s| {
            matches!(s.phase, Phase::Appearing | Phase::Disappearing) || s.morph.is_some()
        })
    }

    /// Visual state of one slot
    pub fn visual(&self, slot_index: usize) -> Option<SlotVisual> {
        let state = self.states.get(slot_index)?;
        let progress = match state.phase {
            Phase::Appearing | Phase::Disappearing => fraction(state.elapsed, self.frames),
            Phase::Idle | Phase::Hidden => 1.0,
        };
        Some(SlotVisual {
            slot_index,
            phase: state.phase,
            mode: state.mode,
            feature: state.feature.clone(),
            progress,
            morph: state.morph.map(|m| Morph {
                from: m.from,
                to: state.mode,
                progress: fraction(m.elapsed, self.frames),
            }),
        })
    }

    /// Visual state of every slot, ordered by slot index
    pub fn visuals(&self) -> Vec<SlotVisual> {
        (0..self.states.len())
            .filter_map(|i| self.visual(i))
            .collect()
    }
}
