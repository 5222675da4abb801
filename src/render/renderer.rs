//! Frame orchestration: noise upkeep, target sizing, evaluation, composite.
//!
//! One call to [`VolumetricRenderer::render`] runs the stages in fixed order.
//! Each stage is a blocking dispatch on the compute backend, so the composite
//! always reads a finished evaluation. Nothing here returns an error per
//! frame: missing inputs or mismatched buffers produce a pass-through.

use std::sync::Arc;

use crate::atmosphere::OpticalDepthCache;
use crate::clouds::{ImpactRecord, NoiseField, PhaseFunctionTable};
use crate::core::{ComputeBackend, Result};
use crate::render::composite::composite;
use crate::render::config::ScatteringConfig;
use crate::render::evaluator::{EvaluationInputs, ScatterOutput, ScatteringEvaluator};
use crate::render::frame::{ColorImage, FrameInputs, SurfaceDescriptor};

/// Intermediate evaluation target, sized from the surface and downscale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargets {
    pub surface: SurfaceDescriptor,
    pub downscale: u32,
    pub width: u32,
    pub height: u32,
}

impl RenderTargets {
    fn new(surface: SurfaceDescriptor, downscale: u32) -> Self {
        let (width, height) = surface.scaled(downscale);
        Self {
            surface,
            downscale: downscale.max(1),
            width,
            height,
        }
    }
}

/// Result of one frame.
#[derive(Clone, Debug)]
pub struct FrameOutput {
    /// Source with the scattering composited in, or an unmodified copy.
    pub image: ColorImage,
    /// Raw evaluation at target resolution, absent for pass-through frames.
    pub scatter: Option<ScatterOutput>,
}

impl FrameOutput {
    fn pass_through(source: &ColorImage) -> Self {
        Self {
            image: source.clone(),
            scatter: None,
        }
    }

    #[inline]
    pub fn is_pass_through(&self) -> bool {
        self.scatter.is_none()
    }
}

/// Owns every derived resource the scattering core needs.
pub struct VolumetricRenderer {
    backend: ComputeBackend,
    evaluator: ScatteringEvaluator,
    noise: NoiseField,
    phase: PhaseFunctionTable,
    targets: Option<RenderTargets>,
    target_generation: u64,
    /// Last raw config and its sanitized form, so warnings fire once per change.
    config: Option<(ScatteringConfig, ScatteringConfig)>,
    frame_count: u64,
}

impl VolumetricRenderer {
    /// Build the compute backend and the initial noise field.
    ///
    /// Fails only when the backend cannot be created.
    pub fn new(config: &ScatteringConfig, threads: Option<usize>) -> Result<Self> {
        let backend = ComputeBackend::new(threads)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Share an existing backend.
    pub fn with_backend(backend: ComputeBackend, config: &ScatteringConfig) -> Self {
        let mut renderer = Self {
            evaluator: ScatteringEvaluator::new(backend.clone()),
            noise: NoiseField::empty(backend.clone()),
            phase: PhaseFunctionTable::default(),
            targets: None,
            target_generation: 0,
            config: None,
            frame_count: 0,
            backend,
        };
        let config = renderer.sanitize(config);
        renderer.noise.ensure(&config.noise);
        renderer
    }

    /// Replace the cloud phase table.
    pub fn set_phase_table(&mut self, table: PhaseFunctionTable) {
        self.phase = table;
    }

    pub fn phase_table(&self) -> &PhaseFunctionTable {
        &self.phase
    }

    pub fn noise_field(&self) -> &NoiseField {
        &self.noise
    }

    pub fn optical_depth_cache(&self) -> &Arc<OpticalDepthCache> {
        self.evaluator.cache()
    }

    pub fn backend(&self) -> &ComputeBackend {
        &self.backend
    }

    /// Current evaluation target, once a frame has sized it.
    pub fn targets(&self) -> Option<RenderTargets> {
        self.targets
    }

    /// Bumped every time the evaluation target is re-created.
    pub fn target_generation(&self) -> u64 {
        self.target_generation
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Render one frame over `source`.
    pub fn render(
        &mut self,
        source: &ColorImage,
        inputs: &FrameInputs<'_>,
        impacts: &[ImpactRecord],
        config: &ScatteringConfig,
    ) -> FrameOutput {
        self.frame_count += 1;
        let config = self.sanitize(config);
        self.noise.ensure(&config.noise);

        let surface = inputs.surface;
        if surface.width == 0 || surface.height == 0 {
            log::debug!("Frame {}: empty surface, passing through", self.frame_count);
            return FrameOutput::pass_through(source);
        }
        if source.width() != surface.width || source.height() != surface.height {
            log::debug!(
                "Frame {}: source {}x{} does not match surface {}x{}, passing through",
                self.frame_count,
                source.width(),
                source.height(),
                surface.width,
                surface.height
            );
            return FrameOutput::pass_through(source);
        }

        let targets = self.ensure_targets(surface, config.downscale);

        let (Some(camera), Some(light), Some(depth)) = (inputs.camera, inputs.light, inputs.depth) else {
            log::debug!(
                "Frame {}: missing{}{}{}, passing through",
                self.frame_count,
                if inputs.camera.is_none() { " camera" } else { "" },
                if inputs.light.is_none() { " light" } else { "" },
                if inputs.depth.is_none() { " depth" } else { "" },
            );
            return FrameOutput::pass_through(source);
        };
        if !camera.is_valid() {
            log::debug!("Frame {}: camera matrices not invertible, passing through", self.frame_count);
            return FrameOutput::pass_through(source);
        }
        if depth.width() != surface.width || depth.height() != surface.height {
            log::debug!(
                "Frame {}: depth {}x{} does not match surface, passing through",
                self.frame_count,
                depth.width(),
                depth.height()
            );
            return FrameOutput::pass_through(source);
        }

        let grid = self.noise.grid();
        let scatter = self.evaluator.evaluate(&EvaluationInputs {
            camera,
            light,
            point_lights: inputs.point_lights,
            depth,
            impacts,
            noise: grid.as_deref(),
            phase: &self.phase,
            config: &config,
            width: targets.width,
            height: targets.height,
        });

        let image = composite(source, &scatter, config.blend_factor, &self.backend);
        FrameOutput {
            image,
            scatter: Some(scatter),
        }
    }

    /// Re-create the evaluation target when the surface or downscale changes.
    fn ensure_targets(&mut self, surface: SurfaceDescriptor, downscale: u32) -> RenderTargets {
        if let Some(targets) = self.targets {
            if targets.surface == surface && targets.downscale == downscale.max(1) {
                return targets;
            }
        }

        let targets = RenderTargets::new(surface, downscale);
        self.target_generation += 1;
        log::info!(
            "Render targets #{}: {}x{} {:?} surface, evaluating at {}x{} (downscale {})",
            self.target_generation,
            surface.width,
            surface.height,
            surface.format,
            targets.width,
            targets.height,
            targets.downscale
        );
        self.targets = Some(targets);
        targets
    }

    /// Sanitize `config`, reusing the previous result when it is unchanged.
    fn sanitize(&mut self, config: &ScatteringConfig) -> ScatteringConfig {
        if let Some((raw, clean)) = &self.config {
            if raw == config {
                return clean.clone();
            }
        }
        let clean = config.sanitized();
        self.config = Some((config.clone(), clean.clone()));
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clouds::{ImpactBuffer, ImpactSettings};
    use crate::core::types::{Vec3, Vec4};
    use crate::render::frame::{CameraState, DepthBuffer, LightState, SurfaceFormat};

    fn config() -> ScatteringConfig {
        let mut c = ScatteringConfig {
            lut_resolution: 16,
            optical_depth_samples: 8,
            in_scattering_samples: 6,
            ..Default::default()
        };
        c.noise.resolution = 8;
        c
    }

    fn renderer(config: &ScatteringConfig) -> VolumetricRenderer {
        VolumetricRenderer::new(config, Some(2)).unwrap()
    }

    fn camera() -> CameraState {
        CameraState::look_at(Vec3::new(0.0, 2.0, 12.0), Vec3::new(0.0, 2.0, 0.0), Vec3::Y, 60.0, 1.0, 0.1, 1000.0)
    }

    fn surface(width: u32, height: u32) -> SurfaceDescriptor {
        SurfaceDescriptor::new(width, height, SurfaceFormat::Rgba16Float)
    }

    #[test]
    fn test_missing_inputs_pass_through() {
        let config = config();
        let mut r = renderer(&config);
        let source = ColorImage::filled(8, 8, Vec4::new(0.1, 0.2, 0.3, 1.0));
        let camera = camera();

        let inputs = FrameInputs {
            surface: surface(8, 8),
            camera: Some(&camera),
            light: None,
            point_lights: &[],
            depth: None,
        };
        let out = r.render(&source, &inputs, &[], &config);
        assert!(out.is_pass_through());
        assert_eq!(out.image, source);
        assert_eq!(r.optical_depth_cache().bake_count(), 0);
    }

    #[test]
    fn test_full_frame_composites() {
        let config = config();
        let mut r = renderer(&config);
        let source = ColorImage::filled(8, 6, Vec4::new(0.1, 0.2, 0.3, 1.0));
        let camera = camera();
        let light = LightState::new(Vec3::new(0.2, -1.0, 0.1), Vec3::ONE, 5.0);
        let depth = DepthBuffer::sky(8, 6);

        let mut impacts = ImpactBuffer::new(&ImpactSettings::default());
        impacts.spawn(Vec3::new(0.0, 2.0, 0.0));
        impacts.tick(2.0);

        let inputs = FrameInputs {
            surface: surface(8, 6),
            camera: Some(&camera),
            light: Some(&light),
            point_lights: &[],
            depth: Some(&depth),
        };
        let out = r.render(&source, &inputs, &impacts.records(), &config);
        assert!(!out.is_pass_through());
        assert_eq!((out.image.width(), out.image.height()), (8, 6));
        assert_ne!(out.image, source);
        assert_eq!(r.optical_depth_cache().bake_count(), 1);

        r.render(&source, &inputs, &impacts.records(), &config);
        assert_eq!(r.optical_depth_cache().bake_count(), 1, "unchanged params must not rebake");
    }

    #[test]
    fn test_surface_and_downscale_changes_recreate_targets() {
        let mut config = config();
        let mut r = renderer(&config);
        let camera = camera();

        let frame = |r: &mut VolumetricRenderer, w: u32, h: u32, config: &ScatteringConfig| {
            let source = ColorImage::filled(w, h, Vec4::ONE);
            let inputs = FrameInputs {
                surface: surface(w, h),
                camera: Some(&camera),
                light: None,
                point_lights: &[],
                depth: None,
            };
            r.render(&source, &inputs, &[], config);
        };

        frame(&mut r, 16, 8, &config);
        assert_eq!(r.target_generation(), 1);
        frame(&mut r, 16, 8, &config);
        assert_eq!(r.target_generation(), 1);

        frame(&mut r, 32, 8, &config);
        assert_eq!(r.target_generation(), 2);

        config.downscale = 3;
        frame(&mut r, 32, 8, &config);
        assert_eq!(r.target_generation(), 3);
        let targets = r.targets().unwrap();
        assert_eq!((targets.width, targets.height), (11, 3));
    }

    #[test]
    fn test_downscaled_evaluation_size() {
        let mut config = config();
        config.downscale = 2;
        let mut r = renderer(&config);
        let source = ColorImage::filled(9, 5, Vec4::ONE);
        let camera = camera();
        let light = LightState::new(Vec3::NEG_Y, Vec3::ONE, 1.0);
        let depth = DepthBuffer::sky(9, 5);

        let out = r.render(
            &source,
            &FrameInputs {
                surface: surface(9, 5),
                camera: Some(&camera),
                light: Some(&light),
                point_lights: &[],
                depth: Some(&depth),
            },
            &[],
            &config,
        );
        let scatter = out.scatter.unwrap();
        assert_eq!((scatter.width(), scatter.height()), (5, 3));
        assert_eq!((out.image.width(), out.image.height()), (9, 5));
    }

    #[test]
    fn test_mismatched_depth_passes_through() {
        let config = config();
        let mut r = renderer(&config);
        let source = ColorImage::filled(4, 4, Vec4::ONE);
        let camera = camera();
        let light = LightState::new(Vec3::NEG_Y, Vec3::ONE, 1.0);
        let depth = DepthBuffer::sky(2, 2);

        let out = r.render(
            &source,
            &FrameInputs {
                surface: surface(4, 4),
                camera: Some(&camera),
                light: Some(&light),
                point_lights: &[],
                depth: Some(&depth),
            },
            &[],
            &config,
        );
        assert!(out.is_pass_through());
    }

    #[test]
    fn test_noise_follows_config_resolution() {
        let mut config = config();
        let mut r = renderer(&config);
        assert_eq!(r.noise_field().grid().unwrap().resolution(), 8);

        config.noise.resolution = 4;
        let source = ColorImage::filled(2, 2, Vec4::ONE);
        let inputs = FrameInputs {
            surface: surface(2, 2),
            camera: None,
            light: None,
            point_lights: &[],
            depth: None,
        };
        r.render(&source, &inputs, &[], &config);
        assert_eq!(r.noise_field().grid().unwrap().resolution(), 8, "invalid resolution keeps old grid");

        config.noise.resolution = 12;
        r.render(&source, &inputs, &[], &config);
        assert_eq!(r.noise_field().grid().unwrap().resolution(), 12);
    }
}
