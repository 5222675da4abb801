//! Render a single scattering frame to a PNG.
//!
//! Usage: cargo run --release --bin render_frame -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>       Scattering config JSON (default: built-in defaults)
//!   --save-config <PATH>  Write the effective config as JSON
//!   --width <PX>          Image width (default: 320)
//!   --height <PX>         Image height (default: 180)
//!   --impacts <N>         Impacts to spawn in a ring (default: 3)
//!   --time <SECONDS>      Simulated time after spawning (default: 1.0)
//!   --threads <N>         Compute worker threads (default: one per core)
//!   --output <PATH>       Output PNG (default: nimbus_frame.png)

use std::path::PathBuf;
use std::time::Instant;

use glam::{Vec3, Vec4};

use nimbus::clouds::ImpactBuffer;
use nimbus::core::{logging, Error, Result};
use nimbus::render::{
    CameraState, ColorImage, DepthBuffer, FrameInputs, LightState, PointLight, ScatteringConfig,
    SurfaceDescriptor, SurfaceFormat, VolumetricRenderer,
};

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("render_frame failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let width = parse_u32_arg(&args, "--width").unwrap_or(320).max(1);
    let height = parse_u32_arg(&args, "--height").unwrap_or(180).max(1);
    let impact_count = parse_usize_arg(&args, "--impacts").unwrap_or(3);
    let time = parse_f32_arg(&args, "--time").unwrap_or(1.0);
    let threads = parse_usize_arg(&args, "--threads");
    let output = parse_str_arg(&args, "--output")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("nimbus_frame.png"));

    let config = match parse_str_arg(&args, "--config") {
        Some(path) => ScatteringConfig::load_json(&PathBuf::from(path))?,
        None => ScatteringConfig::default(),
    };
    if let Some(path) = parse_str_arg(&args, "--save-config") {
        config.save_json(&PathBuf::from(path))?;
    }

    println!("=== Nimbus Frame Renderer ===");
    println!("Size:    {}x{} (downscale {})", width, height, config.downscale);
    println!("Impacts: {} after {:.2}s", impact_count, time);
    println!("Mode:    {:?}", config.mode);
    println!("Output:  {}", output.display());
    println!();

    let mut renderer = VolumetricRenderer::new(&config, threads)?;

    // Impacts in a ring inside the cloud container
    let mut impacts = ImpactBuffer::new(&config.sanitized().impacts);
    let centre = config.clouds.bounds.center();
    for i in 0..impact_count {
        let angle = i as f32 / impact_count.max(1) as f32 * std::f32::consts::TAU;
        impacts.spawn(centre + Vec3::new(angle.cos() * 3.0, 0.0, angle.sin() * 3.0));
    }
    let dt: f32 = 1.0 / 60.0;
    let mut elapsed = 0.0_f32;
    while elapsed < time {
        impacts.tick(dt.min(time - elapsed));
        elapsed += dt;
    }

    let camera = CameraState::look_at(
        centre + Vec3::new(0.0, 1.0, 18.0),
        centre,
        Vec3::Y,
        60.0,
        width as f32 / height as f32,
        0.1,
        2000.0,
    );
    let sun = LightState::new(Vec3::new(-0.4, -0.6, -0.5), Vec3::new(1.0, 0.97, 0.9), 20.0);
    let lamps = [PointLight::point(centre + Vec3::new(0.0, -1.0, 4.0), Vec3::new(4.0, 2.0, 0.8), 8.0)];

    let (source, depth) = background(&camera, width, height)?;

    let start = Instant::now();
    let frame = renderer.render(
        &source,
        &FrameInputs {
            surface: SurfaceDescriptor::new(width, height, SurfaceFormat::Rgba8UnormSrgb),
            camera: Some(&camera),
            light: Some(&sun),
            point_lights: &lamps,
            depth: Some(&depth),
        },
        &impacts.records(),
        &config,
    );
    println!("Rendered in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    let image = image::RgbaImage::from_raw(width, height, frame.image.to_rgba8())
        .ok_or_else(|| Error::InvalidConfig("image buffer size mismatch".to_string()))?;
    image
        .save(&output)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    println!("Wrote {}", output.display());
    Ok(())
}

/// Gradient sky over a flat ground plane at `y = 0`, with matching depth.
fn background(camera: &CameraState, width: u32, height: u32) -> Result<(ColorImage, DepthBuffer)> {
    let mut depth = Vec::with_capacity(width as usize * height as usize);
    let mut pixels = Vec::with_capacity(depth.capacity());

    for y in 0..height {
        for x in 0..width {
            let (ray, depth_scale) = camera.pixel_ray(x, y, width, height);
            if ray.direction.y < 0.0 && ray.origin.y > 0.0 {
                let t = -ray.origin.y / ray.direction.y;
                let hit = ray.at(t);
                let checker = ((hit.x.floor() + hit.z.floor()) as i32).rem_euclid(2) as f32;
                let shade = 0.25 + 0.1 * checker;
                pixels.push(Vec4::new(shade * 0.8, shade, shade * 0.6, 1.0));
                depth.push(t / depth_scale);
            } else {
                let up = ray.direction.y.max(0.0);
                let sky = Vec3::new(0.75, 0.85, 0.95).lerp(Vec3::new(0.25, 0.45, 0.85), up);
                pixels.push(sky.extend(1.0));
                depth.push(f32::INFINITY);
            }
        }
    }

    Ok((ColorImage::new(width, height, pixels)?, DepthBuffer::new(width, height, depth)?))
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
