use naga::front::wgsl;

use super::{finish_program_build, fullscreen_pipeline, RenderError};
use crate::audio::signal::AudioSignal;

/// The audio uniform contract: the fields an effect may declare in its
/// `@group(0) @binding(0)` uniform struct. Anything else is a build error.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Slot {
    Time,
    Resolution,
    Bass,
    Mid,
    Treble,
    Beat,
    PhaseBass,
    PhaseMid,
    PhaseTreble,
}

const CONTRACT_FIELDS: &str =
    "time, resolution, bass, mid, treble, beat, phase_bass, phase_mid, phase_treble";

fn slot_for(name: &str) -> Option<Slot> {
    match name {
        "time" => Some(Slot::Time),
        "resolution" => Some(Slot::Resolution),
        "bass" => Some(Slot::Bass),
        "mid" => Some(Slot::Mid),
        "treble" => Some(Slot::Treble),
        "beat" => Some(Slot::Beat),
        "phase_bass" => Some(Slot::PhaseBass),
        "phase_mid" => Some(Slot::PhaseMid),
        "phase_treble" => Some(Slot::PhaseTreble),
        _ => None,
    }
}

/// The reflected layout of one effect's uniform struct: which contract
/// fields it declares and at which byte offsets.
#[derive(Debug)]
struct UniformLayout {
    fields: Vec<(Slot, u32)>,
    span: u32,
}

/// Reflect the `@group(0) @binding(0)` uniform struct of an effect, if it
/// declares one. This is the link-time capability query: render code later
/// writes only the fields found here, so effects stay heterogeneous without
/// per-effect branching.
fn reflect_contract(name: &str, source: &str) -> Result<Option<UniformLayout>, RenderError> {
    let module = wgsl::parse_str(source).map_err(|err| RenderError::ShaderBuild {
        name: name.to_string(),
        log: err.emit_to_string(source),
    })?;

    let build_err = |log: String| RenderError::ShaderBuild {
        name: name.to_string(),
        log,
    };

    for (_, var) in module.global_variables.iter() {
        if var.space != naga::AddressSpace::Uniform {
            continue;
        }
        let Some(binding) = &var.binding else { continue };
        if binding.group != 0 || binding.binding != 0 {
            continue;
        }

        let naga::TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
            return Err(build_err(
                "the audio uniform binding must be a struct".to_string(),
            ));
        };

        let mut fields = Vec::with_capacity(members.len());
        for member in members {
            let member_name = member.name.as_deref().unwrap_or("<unnamed>");
            let slot = slot_for(member_name).ok_or_else(|| {
                build_err(format!(
                    "uniform field '{}' is not part of the audio contract ({})",
                    member_name, CONTRACT_FIELDS
                ))
            })?;

            let inner = &module.types[member.ty].inner;
            let valid = match slot {
                Slot::Resolution => matches!(
                    inner,
                    naga::TypeInner::Vector {
                        size: naga::VectorSize::Bi,
                        scalar: naga::Scalar {
                            kind: naga::ScalarKind::Float,
                            width: 4,
                        },
                    }
                ),
                _ => matches!(
                    inner,
                    naga::TypeInner::Scalar(naga::Scalar {
                        kind: naga::ScalarKind::Float,
                        width: 4,
                    })
                ),
            };
            if !valid {
                return Err(build_err(format!(
                    "uniform field '{}' has the wrong type (resolution is vec2<f32>, everything else f32)",
                    member_name
                )));
            }

            fields.push((slot, member.offset));
        }

        return Ok(Some(UniformLayout {
            fields,
            span: *span,
        }));
    }

    Ok(None)
}

struct EffectBinding {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    fields: Vec<(Slot, u32)>,
    scratch: Vec<u8>,
}

/// One compiled shader effect: its render pipeline plus the cached contract
/// layout. Immutable after creation apart from the uniform scratch buffer.
pub struct CompiledEffect {
    name: String,
    pipeline: wgpu::RenderPipeline,
    binding: Option<EffectBinding>,
}

impl CompiledEffect {
    pub fn new(
        device: &wgpu::Device,
        name: &str,
        source: &str,
        format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        let layout = reflect_contract(name, source)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut bind_group_layouts = Vec::new();
        let bgl = layout.as_ref().map(|_| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("effect_bind_group_layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        });
        if let Some(ref bgl) = bgl {
            bind_group_layouts.push(bgl);
        }

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("effect_pipeline_layout"),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        let pipeline = fullscreen_pipeline(device, name, &module, &pipeline_layout, format);

        finish_program_build(device, name)?;

        let binding = match (layout, &bgl) {
            (Some(layout), Some(bgl)) => {
                let size = (layout.span as u64).next_multiple_of(16);
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("effect_uniform_buffer"),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("effect_bind_group"),
                    layout: bgl,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                });
                Some(EffectBinding {
                    buffer,
                    bind_group,
                    fields: layout.fields,
                    scratch: vec![0; size as usize],
                })
            }
            _ => None,
        };

        Ok(Self {
            name: name.to_string(),
            pipeline,
            binding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write the declared contract fields for this frame. Fields the effect
    /// never declared are not uploaded at all.
    pub fn upload(&mut self, queue: &wgpu::Queue, signal: &AudioSignal, width: u32, height: u32) {
        let Some(binding) = &mut self.binding else {
            return;
        };
        for &(slot, offset) in &binding.fields {
            let at = offset as usize;
            match slot {
                Slot::Resolution => {
                    put_f32(&mut binding.scratch, at, width as f32);
                    put_f32(&mut binding.scratch, at + 4, height as f32);
                }
                Slot::Time => put_f32(&mut binding.scratch, at, signal.time),
                Slot::Bass => put_f32(&mut binding.scratch, at, signal.bands.bass),
                Slot::Mid => put_f32(&mut binding.scratch, at, signal.bands.mid),
                Slot::Treble => put_f32(&mut binding.scratch, at, signal.bands.treble),
                Slot::Beat => put_f32(&mut binding.scratch, at, signal.beat),
                Slot::PhaseBass => put_f32(&mut binding.scratch, at, signal.phase.bass),
                Slot::PhaseMid => put_f32(&mut binding.scratch, at, signal.phase.mid),
                Slot::PhaseTreble => put_f32(&mut binding.scratch, at, signal.phase.treble),
            }
        }
        queue.write_buffer(&binding.buffer, 0, &binding.scratch);
    }

    /// Record the effect's fullscreen pass into `encoder`.
    pub fn draw(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.name.as_str()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        if let Some(binding) = &self.binding {
            pass.set_bind_group(0, &binding.bind_group, &[]);
        }
        pass.draw(0..3, 0..1);
    }
}

fn put_f32(scratch: &mut [u8], offset: usize, value: f32) {
    scratch[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBSET_SHADER: &str = r#"
struct AudioUniforms {
    time: f32,
    bass: f32,
};
@group(0) @binding(0) var<uniform> audio: AudioUniforms;

@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(audio.time, audio.bass, 0.0, 1.0);
}
"#;

    #[test]
    fn reflection_finds_declared_subset() {
        let layout = reflect_contract("subset", SUBSET_SHADER).unwrap().unwrap();
        assert_eq!(layout.fields.len(), 2);
        assert_eq!(layout.fields[0], (Slot::Time, 0));
        assert_eq!(layout.fields[1], (Slot::Bass, 4));
        assert_eq!(layout.span, 8);
    }

    #[test]
    fn reflection_places_vec2_resolution() {
        let src = r#"
struct AudioUniforms {
    resolution: vec2<f32>,
    beat: f32,
};
@group(0) @binding(0) var<uniform> audio: AudioUniforms;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(audio.resolution, audio.beat, 1.0);
}
"#;
        let layout = reflect_contract("resolution", src).unwrap().unwrap();
        assert_eq!(layout.fields[0], (Slot::Resolution, 0));
        assert_eq!(layout.fields[1], (Slot::Beat, 8));
    }

    #[test]
    fn unknown_uniform_field_is_a_build_error() {
        let src = r#"
struct AudioUniforms {
    time: f32,
    tempo: f32,
};
@group(0) @binding(0) var<uniform> audio: AudioUniforms;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(audio.time, audio.tempo, 0.0, 1.0);
}
"#;
        let err = reflect_contract("bad_field", src).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("tempo"), "unexpected error: {}", message);
    }

    #[test]
    fn wrong_field_type_is_a_build_error() {
        let src = r#"
struct AudioUniforms {
    bass: vec3<f32>,
};
@group(0) @binding(0) var<uniform> audio: AudioUniforms;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(audio.bass, 1.0);
}
"#;
        assert!(reflect_contract("bad_type", src).is_err());
    }

    #[test]
    fn shader_without_uniforms_reflects_to_none() {
        let src = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;
        assert!(reflect_contract("bare", src).unwrap().is_none());
    }

    #[test]
    fn invalid_wgsl_reports_the_program_name() {
        let err = reflect_contract("broken", "not wgsl at all").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn builtin_effects_reflect_cleanly() {
        for effect in crate::effects::builtin_effects() {
            let layout = reflect_contract(effect.name, effect.wgsl)
                .unwrap_or_else(|e| panic!("{}", e));
            assert!(
                layout.is_some(),
                "effect '{}' should declare audio uniforms",
                effect.name
            );
        }
    }
}
