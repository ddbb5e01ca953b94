use bytemuck::{Pod, Zeroable};

use super::effect::CompiledEffect;
use super::target::Fbo;
use super::{finish_program_build, fullscreen_pipeline, RenderError};
use crate::audio::signal::AudioSignal;
use crate::effects::EffectSource;
use crate::scheduler::PresetFrame;

/// Internal format for every off-screen stage; only the post pass targets
/// the actual surface format.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlendUniforms {
    blend: f32,
    _padding: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FeedbackUniforms {
    decay: f32,
    zoom: f32,
    angle: f32,
    _padding: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PostUniforms {
    resolution: [f32; 2],
    time: f32,
    bass: f32,
    beat: f32,
    _padding: [f32; 3],
}

/// A fixed-layout compositing pass: one uniform buffer, a fixed number of
/// input textures and a shared sampler.
struct ComposePass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl ComposePass {
    fn new(
        device: &wgpu::Device,
        name: &str,
        source: &str,
        format: wgpu::TextureFormat,
        texture_count: u32,
        uniform_size: u64,
    ) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for i in 0..texture_count {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + i,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1 + texture_count,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = fullscreen_pipeline(device, name, &module, &pipeline_layout, format);

        finish_program_build(device, name)?;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
        })
    }

    /// Bind groups are rebuilt per frame because FBO views change on resize;
    /// this mirrors how the offline post chain binds its ping-pong pair.
    fn bind(
        &self,
        device: &wgpu::Device,
        textures: &[&wgpu::TextureView],
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.uniform_buffer.as_entire_binding(),
        }];
        for (i, view) in textures.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 1 + textures.len() as u32,
            resource: wgpu::BindingResource::Sampler(sampler),
        });

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("compose_bind_group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }

    fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        bind_group: &wgpu::BindGroup,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("compose_pass"),
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
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// The per-frame compositor. Owns every GPU resource of the engine: the five
/// render targets, the N compiled effects and the three compose programs.
/// Dropping it is the single teardown point for all of them.
pub struct RenderPipeline {
    effects: Vec<CompiledEffect>,
    crossfade: ComposePass,
    feedback: ComposePass,
    post: ComposePass,
    effect_a: Fbo,
    effect_b: Fbo,
    crossfade_out: Fbo,
    feedback_pair: [Fbo; 2],
    feedback_prev: usize,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
}

impl RenderPipeline {
    /// Compile every program and allocate every target. Any shader failure
    /// aborts construction: presets address effects by index, so a broken
    /// effect cannot be skipped without silently shifting the whole library.
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        sources: &[EffectSource],
    ) -> Result<Self, RenderError> {
        let (width, height) = (width.max(1), height.max(1));

        let effects = sources
            .iter()
            .map(|source| {
                let effect = CompiledEffect::new(device, source.name, source.wgsl, OFFSCREEN_FORMAT)?;
                log::info!("Compiled effect: {}", source.name);
                Ok(effect)
            })
            .collect::<Result<Vec<_>, RenderError>>()?;

        let crossfade = ComposePass::new(
            device,
            "crossfade",
            include_str!("../../shaders/compose/crossfade.wgsl"),
            OFFSCREEN_FORMAT,
            2,
            std::mem::size_of::<BlendUniforms>() as u64,
        )?;
        let feedback = ComposePass::new(
            device,
            "feedback",
            include_str!("../../shaders/compose/feedback.wgsl"),
            OFFSCREEN_FORMAT,
            2,
            std::mem::size_of::<FeedbackUniforms>() as u64,
        )?;
        let post = ComposePass::new(
            device,
            "post_crt",
            include_str!("../../shaders/compose/post_crt.wgsl"),
            surface_format,
            1,
            std::mem::size_of::<PostUniforms>() as u64,
        )?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("compose_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            effects,
            crossfade,
            feedback,
            post,
            effect_a: Fbo::new(device, "effect_a", width, height, OFFSCREEN_FORMAT),
            effect_b: Fbo::new(device, "effect_b", width, height, OFFSCREEN_FORMAT),
            crossfade_out: Fbo::new(device, "crossfade_out", width, height, OFFSCREEN_FORMAT),
            feedback_pair: [
                Fbo::new(device, "feedback_ping", width, height, OFFSCREEN_FORMAT),
                Fbo::new(device, "feedback_pong", width, height, OFFSCREEN_FORMAT),
            ],
            feedback_prev: 0,
            sampler,
            width,
            height,
        })
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Which feedback buffer holds the accumulated history right now.
    pub fn feedback_slot(&self) -> usize {
        self.feedback_prev
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resize every owned target in place. Called between frames only.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        self.width = width;
        self.height = height;
        self.effect_a.resize(device, width, height);
        self.effect_b.resize(device, width, height);
        self.crossfade_out.resize(device, width, height);
        for target in &mut self.feedback_pair {
            target.resize(device, width, height);
        }
    }

    /// Render one frame into `target` (the surface view). Passes run in a
    /// fixed order inside a single submit; each samples the previous stage's
    /// texture.
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        signal: &AudioSignal,
        frame: &PresetFrame,
        target: &wgpu::TextureView,
    ) {
        let (width, height) = (self.width, self.height);
        // The crossfade stage only runs mid-transition.
        let next_effect = if frame.mix > 0.0 { frame.next } else { None };

        self.effects[frame.current].upload(queue, signal, width, height);
        if let Some(next) = next_effect {
            if next != frame.current {
                self.effects[next].upload(queue, signal, width, height);
            }
            queue.write_buffer(
                &self.crossfade.uniform_buffer,
                0,
                bytemuck::bytes_of(&BlendUniforms {
                    blend: frame.mix,
                    _padding: [0.0; 3],
                }),
            );
        }

        queue.write_buffer(
            &self.feedback.uniform_buffer,
            0,
            bytemuck::bytes_of(&FeedbackUniforms {
                decay: frame.feedback.decay,
                zoom: frame.feedback.zoom,
                angle: frame.feedback.rotation * signal.dt,
                _padding: 0.0,
            }),
        );
        queue.write_buffer(
            &self.post.uniform_buffer,
            0,
            bytemuck::bytes_of(&PostUniforms {
                resolution: [width as f32, height as f32],
                time: signal.time,
                bass: signal.bands.bass,
                beat: signal.beat,
                _padding: [0.0; 3],
            }),
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });

        // Stage 1: the current effect.
        self.effects[frame.current].draw(&mut encoder, self.effect_a.view());

        // Stage 2: crossfade toward the next effect while transitioning.
        if let Some(next) = next_effect {
            self.effects[next].draw(&mut encoder, self.effect_b.view());
            let bind = self.crossfade.bind(
                device,
                &[self.effect_a.view(), self.effect_b.view()],
                &self.sampler,
            );
            self.crossfade
                .draw(&mut encoder, self.crossfade_out.view(), &bind);
        }
        let effect_result = if next_effect.is_some() {
            self.crossfade_out.view()
        } else {
            self.effect_a.view()
        };

        // Stage 3: temporal feedback into the non-previous buffer.
        let dest = 1 - self.feedback_prev;
        let bind = self.feedback.bind(
            device,
            &[self.feedback_pair[self.feedback_prev].view(), effect_result],
            &self.sampler,
        );
        self.feedback
            .draw(&mut encoder, self.feedback_pair[dest].view(), &bind);

        // Stage 4: CRT post onto the visible surface.
        let bind = self
            .post
            .bind(device, &[self.feedback_pair[dest].view()], &self.sampler);
        self.post.draw(&mut encoder, target, &bind);

        queue.submit(std::iter::once(encoder.finish()));
        self.swap_feedback();
    }

    fn swap_feedback(&mut self) {
        self.feedback_prev = 1 - self.feedback_prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FeedbackParams;

    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None)).ok()
    }

    fn preset_frame(current: usize, next: Option<usize>, mix: f32) -> PresetFrame {
        PresetFrame {
            current,
            next,
            mix,
            feedback: FeedbackParams {
                decay: 0.9,
                zoom: 1.01,
                rotation: 0.2,
            },
        }
    }

    #[test]
    fn builds_compiles_and_ping_pongs() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut pipeline = RenderPipeline::new(
            &device,
            OFFSCREEN_FORMAT,
            64,
            64,
            crate::effects::builtin_effects(),
        )
        .expect("pipeline should build");
        assert_eq!(pipeline.effect_count(), 5);

        let screen = Fbo::new(&device, "screen", 64, 64, OFFSCREEN_FORMAT);
        let signal = AudioSignal::default();

        let before = pipeline.feedback_slot();
        pipeline.render_frame(&device, &queue, &signal, &preset_frame(0, None, 0.0), screen.view());
        let after_one = pipeline.feedback_slot();
        pipeline.render_frame(
            &device,
            &queue,
            &signal,
            &preset_frame(1, Some(2), 0.5),
            screen.view(),
        );
        let after_two = pipeline.feedback_slot();

        assert_ne!(before, after_one);
        assert_ne!(after_one, after_two);
    }

    #[test]
    fn crossfading_between_presets_sharing_an_effect() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut pipeline = RenderPipeline::new(
            &device,
            OFFSCREEN_FORMAT,
            32,
            32,
            crate::effects::builtin_effects(),
        )
        .unwrap();
        let screen = Fbo::new(&device, "screen", 32, 32, OFFSCREEN_FORMAT);
        let signal = AudioSignal::default();
        pipeline.render_frame(
            &device,
            &queue,
            &signal,
            &preset_frame(0, Some(0), 0.25),
            screen.view(),
        );
    }

    #[test]
    fn resize_updates_every_target_and_clamps() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let mut pipeline = RenderPipeline::new(
            &device,
            OFFSCREEN_FORMAT,
            64,
            64,
            crate::effects::builtin_effects(),
        )
        .unwrap();

        pipeline.resize(&device, 17, 0);
        assert_eq!(pipeline.size(), (17, 1));
        assert_eq!(pipeline.effect_a.size(), (17, 1));
        assert_eq!(pipeline.effect_b.size(), (17, 1));
        assert_eq!(pipeline.crossfade_out.size(), (17, 1));
        assert_eq!(pipeline.feedback_pair[0].size(), (17, 1));
        assert_eq!(pipeline.feedback_pair[1].size(), (17, 1));
    }

    #[test]
    fn broken_effect_aborts_construction() {
        let Some((device, _queue)) = test_device() else {
            return;
        };
        let sources = [EffectSource {
            name: "broken",
            wgsl: "@fragment fn fs_main() -> f32 { return 1.0; }",
        }];
        let Err(err) = RenderPipeline::new(&device, OFFSCREEN_FORMAT, 8, 8, &sources) else {
            panic!("a broken effect must abort pipeline construction");
        };
        assert!(err.to_string().contains("broken"));
    }
}
