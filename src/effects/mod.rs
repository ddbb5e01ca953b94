use crate::scheduler::{FeedbackParams, Preset};

/// One shader effect: an opaque fullscreen fragment program that may declare
/// any subset of the audio uniform contract.
pub struct EffectSource {
    pub name: &'static str,
    pub wgsl: &'static str,
}

/// The built-in effect library. Presets reference these by index, so the
/// order is part of the contract and a broken entry is a startup failure,
/// never a silent skip.
pub fn builtin_effects() -> &'static [EffectSource] {
    &[
        EffectSource {
            name: "plasma",
            wgsl: include_str!("../../shaders/effects/plasma.wgsl"),
        },
        EffectSource {
            name: "tunnel",
            wgsl: include_str!("../../shaders/effects/tunnel.wgsl"),
        },
        EffectSource {
            name: "kaleido",
            wgsl: include_str!("../../shaders/effects/kaleido.wgsl"),
        },
        EffectSource {
            name: "nebula",
            wgsl: include_str!("../../shaders/effects/nebula.wgsl"),
        },
        EffectSource {
            name: "rings",
            wgsl: include_str!("../../shaders/effects/rings.wgsl"),
        },
    ]
}

const PLASMA: usize = 0;
const TUNNEL: usize = 1;
const KALEIDO: usize = 2;
const NEBULA: usize = 3;
const RINGS: usize = 4;

fn feedback(decay: f32, zoom: f32, rotation: f32) -> FeedbackParams {
    FeedbackParams {
        decay,
        zoom,
        rotation,
    }
}

/// The fixed startup preset list. Several presets reuse an effect with a
/// different feedback character.
pub fn default_presets() -> Vec<Preset> {
    vec![
        Preset {
            name: "Plasma: Bass Swell",
            effect: PLASMA,
            feedback: feedback(0.90, 1.010, 0.10),
        },
        Preset {
            name: "Tunnel: Kick Dive",
            effect: TUNNEL,
            feedback: feedback(0.86, 1.020, 0.25),
        },
        Preset {
            name: "Kaleido: Treble Lace",
            effect: KALEIDO,
            feedback: feedback(0.92, 1.008, 0.35),
        },
        Preset {
            name: "Nebula: Mid Bloom",
            effect: NEBULA,
            feedback: feedback(0.95, 1.006, 0.08),
        },
        Preset {
            name: "Rings: Snare Flash",
            effect: RINGS,
            feedback: feedback(0.84, 1.016, -0.20),
        },
        Preset {
            name: "Plasma: Slow Drift",
            effect: PLASMA,
            feedback: feedback(0.96, 1.004, -0.05),
        },
        Preset {
            name: "Tunnel: Vortex Spin",
            effect: TUNNEL,
            feedback: feedback(0.91, 1.012, 0.60),
        },
        Preset {
            name: "Kaleido: Mandala",
            effect: KALEIDO,
            feedback: feedback(0.93, 1.005, -0.30),
        },
    ]
}
