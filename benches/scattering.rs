use criterion::{criterion_group, criterion_main, Criterion, black_box};

use nimbus::atmosphere::{AtmosphereParams, OpticalDepthTable};
use nimbus::clouds::noise_field::generate_worley;
use nimbus::clouds::{ImpactBuffer, NoiseSettings, PhaseFunctionTable};
use nimbus::core::ComputeBackend;
use nimbus::render::{
    CameraState, DepthBuffer, EvaluationInputs, LightState, ScatteringConfig, ScatteringEvaluator,
};

use glam::Vec3;

fn backend() -> ComputeBackend {
    ComputeBackend::new(None).unwrap()
}

fn bench_optical_depth_bake_64(c: &mut Criterion) {
    let backend = backend();
    let params = AtmosphereParams {
        resolution: 64,
        sample_count: 50,
        ..Default::default()
    };

    c.bench_function("optical_depth_bake_64", |b| {
        b.iter(|| OpticalDepthTable::bake(black_box(&params), &backend));
    });
}

fn bench_worley_32(c: &mut Criterion) {
    let backend = backend();
    let settings = NoiseSettings {
        resolution: 32,
        ..Default::default()
    };

    c.bench_function("worley_volume_32", |b| {
        b.iter(|| generate_worley(black_box(&settings), &backend));
    });
}

fn bench_phase_lookup(c: &mut Criterion) {
    let table = PhaseFunctionTable::default();

    c.bench_function("phase_lookup_1k", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for i in 0..1000 {
                sum += table.lookup(black_box(-1.0 + i as f32 * 0.002));
            }
            sum
        });
    });
}

fn bench_evaluate_160x90(c: &mut Criterion) {
    let backend = backend();
    let config = ScatteringConfig {
        lut_resolution: 64,
        ..Default::default()
    };
    let evaluator = ScatteringEvaluator::new(backend.clone());
    let grid = generate_worley(
        &NoiseSettings {
            resolution: 32,
            ..Default::default()
        },
        &backend,
    );

    let mut impacts = ImpactBuffer::new(&config.impacts);
    impacts.spawn(Vec3::new(0.0, 3.0, 0.0));
    impacts.spawn(Vec3::new(2.0, 2.0, 1.0));
    impacts.tick(1.0);
    let records = impacts.records();

    let camera = CameraState::look_at(
        Vec3::new(0.0, 4.0, 18.0),
        Vec3::new(0.0, 3.0, 0.0),
        Vec3::Y,
        60.0,
        16.0 / 9.0,
        0.1,
        2000.0,
    );
    let light = LightState::new(Vec3::new(-0.4, -0.6, -0.5), Vec3::ONE, 20.0);
    let depth = DepthBuffer::sky(160, 90);
    let phase = PhaseFunctionTable::default();

    let inputs = EvaluationInputs {
        camera: &camera,
        light: &light,
        point_lights: &[],
        depth: &depth,
        impacts: &records,
        noise: Some(&grid),
        phase: &phase,
        config: &config,
        width: 160,
        height: 90,
    };

    // Warm the optical depth cache outside the measurement
    evaluator.evaluate(&inputs);

    c.bench_function("evaluate_160x90", |b| {
        b.iter(|| evaluator.evaluate(black_box(&inputs)));
    });
}

criterion_group!(
    benches,
    bench_optical_depth_bake_64,
    bench_worley_32,
    bench_phase_lookup,
    bench_evaluate_160x90,
);

criterion_main!(benches);
