//! Per-frame scattering: host inputs, the raymarch evaluator and compositing

pub mod composite;
pub mod config;
pub mod evaluator;
pub mod frame;
pub mod renderer;

pub use composite::composite;
pub use config::{CloudConfig, ScatteringConfig, ScatteringMode, MAX_POINT_LIGHTS};
pub use evaluator::{CloudMedium, DensitySampler, EvaluationInputs, ScatterOutput, ScatteringEvaluator};
pub use frame::{
    CameraState, ColorImage, DepthBuffer, FrameInputs, LightState, PointLight, SpotCone, SurfaceDescriptor,
    SurfaceFormat,
};
pub use renderer::{FrameOutput, RenderTargets, VolumetricRenderer};
