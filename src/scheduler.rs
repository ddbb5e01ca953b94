use anyhow::Result;
use std::f32::consts::PI;

/// Temporal feedback parameters carried by every preset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeedbackParams {
    /// Trail persistence, 0.0-1.0.
    pub decay: f32,
    /// Per-frame zoom toward the center, close to 1.0.
    pub zoom: f32,
    /// Trail rotation in radians per second.
    pub rotation: f32,
}

impl FeedbackParams {
    fn lerp(&self, other: &FeedbackParams, t: f32) -> FeedbackParams {
        FeedbackParams {
            decay: self.decay + (other.decay - self.decay) * t,
            zoom: self.zoom + (other.zoom - self.zoom) * t,
            rotation: self.rotation + (other.rotation - self.rotation) * t,
        }
    }
}

/// One entry of the fixed preset list: a shader effect plus its feedback
/// character.
#[derive(Clone, Copy, Debug)]
pub struct Preset {
    pub name: &'static str,
    pub effect: usize,
    pub feedback: FeedbackParams,
}

/// Per-frame scheduler output: which effect(s) to draw and how to blend.
#[derive(Clone, Copy, Debug)]
pub struct PresetFrame {
    pub current: usize,
    pub next: Option<usize>,
    pub mix: f32,
    pub feedback: FeedbackParams,
}

/// Selects the active preset and drives crossfades between them.
///
/// Two states: idle and transitioning, where transitioning is exactly
/// "a next preset exists". A transition starts on a track change, after the
/// cycle interval runs out, or on a strong beat that wins a random draw.
pub struct PresetScheduler {
    presets: Vec<Preset>,
    current: usize,
    next: Option<usize>,
    progress: f32,
    elapsed: f32,
    last_switch: f32,
    cycle_seconds: f32,
    transition_seconds: f32,
}

/// Beat pulse level that qualifies a frame for the random switch draw.
const BEAT_SWITCH_THRESHOLD: f32 = 0.7;
/// Chance per qualifying frame that the switch actually happens.
const BEAT_SWITCH_CHANCE: f32 = 0.08;

impl PresetScheduler {
    pub fn new(presets: Vec<Preset>, cycle_seconds: f32, transition_seconds: f32) -> Result<Self> {
        if presets.is_empty() {
            anyhow::bail!("preset list is empty; the scheduler needs at least one preset");
        }
        Ok(Self {
            presets,
            current: 0,
            next: None,
            progress: 0.0,
            elapsed: 0.0,
            last_switch: 0.0,
            cycle_seconds,
            transition_seconds: transition_seconds.max(0.01),
        })
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn next_index(&self) -> Option<usize> {
        self.next
    }

    pub fn transitioning(&self) -> bool {
        self.next.is_some()
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Advance one frame and produce the blend instructions for it.
    pub fn update(&mut self, dt: f32, beat: f32, track_changed: bool) -> PresetFrame {
        self.elapsed += dt;

        if self.next.is_none() {
            let cycle_due = self.elapsed - self.last_switch > self.cycle_seconds;
            let beat_kick =
                beat > BEAT_SWITCH_THRESHOLD && fastrand::f32() < BEAT_SWITCH_CHANCE;
            if track_changed || cycle_due || beat_kick {
                if let Some(next) = self.pick_next() {
                    self.begin_transition(next);
                }
            }
        }

        if let Some(next) = self.next {
            self.progress += dt / self.transition_seconds;
            if self.progress >= 1.0 {
                self.current = next;
                self.next = None;
                self.progress = 0.0;
            }
        }

        self.frame()
    }

    /// Host override: start a transition toward an explicit preset index.
    pub fn force_select(&mut self, index: usize) {
        let index = index % self.presets.len();
        if index == self.current && self.next.is_none() {
            return;
        }
        self.begin_transition(index);
    }

    /// Host override: step through the preset list relative to the current
    /// entry (or the transition target, so repeated presses keep moving).
    pub fn cycle(&mut self, step: i32) {
        let len = self.presets.len() as i32;
        let base = self.next.unwrap_or(self.current) as i32;
        let index = (base + step).rem_euclid(len) as usize;
        self.force_select(index);
    }

    fn begin_transition(&mut self, next: usize) {
        log::info!(
            "preset transition: {} -> {}",
            self.presets[self.current].name,
            self.presets[next].name
        );
        self.next = Some(next);
        self.progress = 0.0;
        self.last_switch = self.elapsed;
    }

    /// Uniform pick over all presets except the current one. With a single
    /// preset there is nothing to switch to, so this is an explicit no-op
    /// instead of a loop that could never terminate.
    fn pick_next(&self) -> Option<usize> {
        if self.presets.len() < 2 {
            return None;
        }
        loop {
            let candidate = fastrand::usize(..self.presets.len());
            if candidate != self.current {
                return Some(candidate);
            }
        }
    }

    fn frame(&self) -> PresetFrame {
        let current = &self.presets[self.current];
        match self.next {
            Some(next_index) => {
                let next = &self.presets[next_index];
                let mix = mix_curve(self.progress);
                PresetFrame {
                    current: current.effect,
                    next: Some(next.effect),
                    mix,
                    feedback: current.feedback.lerp(&next.feedback, mix),
                }
            }
            None => PresetFrame {
                current: current.effect,
                next: None,
                mix: 0.0,
                feedback: current.feedback,
            },
        }
    }
}

/// Cosine ease over the raw transition progress: slow in, fast middle,
/// slow out, symmetric about the halfway point.
pub fn mix_curve(progress: f32) -> f32 {
    0.5 - 0.5 * (progress * PI).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(decay: f32) -> FeedbackParams {
        FeedbackParams {
            decay,
            zoom: 1.01,
            rotation: 0.2,
        }
    }

    fn presets(n: usize) -> Vec<Preset> {
        (0..n)
            .map(|i| Preset {
                name: "test",
                effect: i,
                feedback: feedback(0.1 * i as f32),
            })
            .collect()
    }

    fn scheduler(n: usize) -> PresetScheduler {
        PresetScheduler::new(presets(n), 30.0, 2.0).unwrap()
    }

    #[test]
    fn empty_preset_list_is_rejected() {
        assert!(PresetScheduler::new(Vec::new(), 30.0, 2.0).is_err());
    }

    #[test]
    fn track_change_starts_a_transition() {
        // Scenario C: a track change while idle transitions immediately.
        fastrand::seed(7);
        let mut s = scheduler(4);
        let frame = s.update(1.0 / 60.0, 0.0, true);
        assert!(s.transitioning());
        let next = s.next_index().unwrap();
        assert_ne!(next, 0);
        assert!(frame.next.is_some());
        assert!(s.progress() < 0.05);
    }

    #[test]
    fn single_preset_never_transitions() {
        // Scenario D: the degenerate list must not hang or self-transition.
        let mut s = scheduler(1);
        for _ in 0..100 {
            s.update(1.0 / 60.0, 1.0, true);
            assert!(!s.transitioning());
        }
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn next_exists_exactly_while_transitioning() {
        fastrand::seed(3);
        let mut s = scheduler(3);
        assert_eq!(s.next_index().is_some(), s.transitioning());
        s.update(0.016, 0.0, true);
        assert_eq!(s.next_index().is_some(), s.transitioning());
        for _ in 0..200 {
            s.update(0.016, 0.0, false);
            assert_eq!(s.next_index().is_some(), s.transitioning());
            assert!((0.0..=1.0).contains(&s.progress()));
        }
        assert!(!s.transitioning());
    }

    #[test]
    fn transition_commits_after_its_duration() {
        fastrand::seed(11);
        let mut s = scheduler(2);
        s.update(0.016, 0.0, true);
        let target = s.next_index().unwrap();
        // 2s duration at dt=0.1 needs 20 more steps.
        for _ in 0..21 {
            s.update(0.1, 0.0, false);
        }
        assert!(!s.transitioning());
        assert_eq!(s.current_index(), target);
        assert_eq!(s.progress(), 0.0);
    }

    #[test]
    fn mix_curve_endpoints_and_midpoint() {
        assert!(mix_curve(0.0).abs() < 1e-6);
        assert!((mix_curve(1.0) - 1.0).abs() < 1e-6);
        assert!((mix_curve(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn feedback_interpolates_by_eased_mix() {
        fastrand::seed(5);
        let mut s = PresetScheduler::new(
            vec![
                Preset {
                    name: "a",
                    effect: 0,
                    feedback: FeedbackParams {
                        decay: 0.2,
                        zoom: 1.0,
                        rotation: 0.0,
                    },
                },
                Preset {
                    name: "b",
                    effect: 1,
                    feedback: FeedbackParams {
                        decay: 0.8,
                        zoom: 1.02,
                        rotation: 1.0,
                    },
                },
            ],
            30.0,
            2.0,
        )
        .unwrap();

        s.update(0.0, 0.0, true);
        // Step to the exact halfway point: mix(0.5) == 0.5.
        let frame = s.update(1.0, 0.0, false);
        assert!((frame.mix - 0.5).abs() < 1e-5);
        assert!((frame.feedback.decay - 0.5).abs() < 1e-5);
        assert!((frame.feedback.zoom - 1.01).abs() < 1e-5);
        assert!((frame.feedback.rotation - 0.5).abs() < 1e-5);
    }

    #[test]
    fn cycle_interval_forces_a_switch() {
        fastrand::seed(2);
        let mut s = scheduler(3);
        for _ in 0..31 {
            s.update(1.0, 0.0, false);
            if s.transitioning() {
                return;
            }
        }
        panic!("cycle interval never fired");
    }

    #[test]
    fn strong_beats_eventually_win_the_draw() {
        fastrand::seed(9);
        let mut s = scheduler(3);
        // 10s of qualifying beats: far below the 30s cycle interval, so any
        // transition must come from the beat draw.
        for _ in 0..1000 {
            s.update(0.01, 0.9, false);
            if s.transitioning() {
                return;
            }
        }
        panic!("beat draw never fired across 1000 qualifying frames");
    }

    #[test]
    fn weak_beats_never_trigger() {
        fastrand::seed(13);
        let mut s = scheduler(3);
        for _ in 0..500 {
            s.update(0.01, BEAT_SWITCH_THRESHOLD, false);
        }
        assert!(!s.transitioning());
    }

    #[test]
    fn force_select_targets_an_explicit_preset() {
        let mut s = scheduler(4);
        s.force_select(2);
        assert_eq!(s.next_index(), Some(2));
        s.force_select(2);
        assert_eq!(s.next_index(), Some(2));
    }

    #[test]
    fn cycle_wraps_around_the_list() {
        let mut s = scheduler(3);
        s.cycle(-1);
        assert_eq!(s.next_index(), Some(2));
        s.cycle(1);
        assert_eq!(s.next_index(), Some(0));
    }
}
