//! End-to-end checks of frame planning that need no GPU.
//!
//! Run with: cargo test --test pipeline_scenarios

use deferred_bloom::bloom::{
    demo_configuration, dual_filter_schedule, BloomMode, FilterStepKind, FilterTexture, KawaseSchedule,
    DEMO_CONFIGURATIONS, NUM_DEMO_CONFIGURATIONS,
};
use deferred_bloom::config::{DirectionalLightConfig, PointLightConfig};
use deferred_bloom::gaussian::GaussianKernel;
use deferred_bloom::lighting::LightAllocator;
use deferred_bloom::render_graph::{bloom_graph, deferred_graph, resources, PassKind};
use deferred_bloom::scene::{ProceduralScene, SceneLight, SceneProvider};
use deferred_bloom::structured_buffer::{FieldDesc, GpuDataType, StructLayout};
use glam::{UVec2, Vec3};

const FRAMEBUFFER: UVec2 = UVec2::new(1280, 720);

fn point_lights(count: usize) -> Vec<SceneLight> {
    (0..count)
        .map(|i| SceneLight::point(Vec3::ONE, Vec3::new(i as f32 * 3.0, 2.0, 0.0)))
        .collect()
}

fn allocate(scene_lights: &[SceneLight]) -> LightAllocator {
    let point = PointLightConfig {
        max_scene_point_lights: 5,
        num_procedural_point_lights: 10,
        ..Default::default()
    };
    LightAllocator::allocate(scene_lights, &point, &DirectionalLightConfig::default(), 7)
}

#[test]
fn test_plain_kernel_of_five() {
    let kernel = GaussianKernel::with_defaults(5, false, false);
    assert_eq!(kernel.weights.len(), 3);
    assert_eq!(kernel.offsets, vec![0.0, 1.0, 2.0]);
    assert!((kernel.sum() - 1.0).abs() < 1e-5);
}

#[test]
fn test_linear_kernel_of_fifteen() {
    let plain = GaussianKernel::with_defaults(15, false, false);
    let linear = GaussianKernel::with_defaults(15, false, true);
    assert_eq!(plain.weights.len(), 8);
    assert_eq!(linear.tap_count(), 4);
    assert!(!linear.centre_tap);
    assert!((linear.sum() - 1.0).abs() < 1e-5);
}

#[test]
fn test_scene_lights_below_cap() {
    let lights = allocate(&point_lights(2));
    assert_eq!(lights.num_point_lights(), 12);
    assert_eq!(lights.num_scene_point_lights(), 2);
}

#[test]
fn test_scene_lights_above_cap() {
    let lights = allocate(&point_lights(8));
    assert_eq!(lights.num_point_lights(), 15);
    assert_eq!(lights.procedural_range(), 5..15);
}

#[test]
fn test_deferred_graph_for_builtin_scene() {
    let scene = ProceduralScene::new();
    let lights = allocate(scene.lights());
    let graph = deferred_graph(lights.num_directional_lights(), lights.num_point_lights());
    graph.validate().unwrap();
    assert_eq!(graph.count(PassKind::PointLightProxy), lights.num_point_lights());
    assert_eq!(graph.count(PassKind::DirectionalLight), lights.num_directional_lights());

    let last = graph.last_depth_stencil_use().unwrap();
    assert!(graph.passes()[last + 1..].iter().all(|p| p.state.depth_stencil.is_none()));
}

#[test]
fn test_kawase_even_iterations_end_in_first_slot() {
    let schedule = KawaseSchedule::new(&[0, 0, 1, 1], UVec2::new(320, 180));
    assert_eq!(schedule.iterations(), 4);
    assert_eq!(schedule.blurred_image_index(), 0);
}

#[test]
fn test_dual_filter_four_iterations() {
    let schedule = dual_filter_schedule(FRAMEBUFFER, 4);
    let downs = schedule.steps.iter().filter(|s| s.kind == FilterStepKind::Down).count();
    assert_eq!(downs, 2);
    assert_eq!(schedule.steps.len() - downs, 2);

    let last = schedule.steps.last().unwrap();
    assert_eq!(last.kind, FilterStepKind::Final);
    assert_eq!(last.target, FilterTexture::Output);
    assert_eq!(last.dimensions, FRAMEBUFFER);
}

#[test]
fn test_every_bloom_graph_is_consistent() {
    for mode in BloomMode::ALL {
        for configuration in 0..NUM_DEMO_CONFIGURATIONS {
            let graph = bloom_graph(mode, demo_configuration(configuration), FRAMEBUFFER);
            graph.validate().unwrap();
            assert_eq!(graph.passes()[0].kind, PassKind::Scene);
            let last = graph.passes().last().unwrap();
            assert_eq!(last.writes, vec![resources::OUTPUT.to_string()], "{:?}", mode);
        }
    }
}

#[test]
fn test_blur_passes_ping_pong() {
    let modes = [BloomMode::GaussianLinear, BloomMode::Compute, BloomMode::Kawase];
    for mode in modes {
        for config in &DEMO_CONFIGURATIONS {
            let graph = bloom_graph(mode, config, FRAMEBUFFER);
            let blurs: Vec<_> = graph
                .passes()
                .iter()
                .filter(|p| {
                    matches!(
                        p.kind,
                        PassKind::GaussianHorizontal
                            | PassKind::GaussianVertical
                            | PassKind::ComputeHorizontal
                            | PassKind::ComputeVertical
                            | PassKind::Kawase
                    )
                })
                .collect();
            for pass in &blurs {
                assert_ne!(pass.reads[0], pass.writes[0], "{} samples its own target", pass.name);
            }
            for pair in blurs.windows(2) {
                assert_eq!(pair[1].reads[0], pair[0].writes[0]);
            }
        }
    }
}

#[test]
fn test_mixed_layout_alignment() {
    let alignment = 256;
    let layout = StructLayout::new(
        vec![
            FieldDesc::new("fScale", GpuDataType::Float),
            FieldDesc::new("vColor", GpuDataType::Vec4),
            FieldDesc::new("uCount", GpuDataType::UInt),
            FieldDesc::new("mTransform", GpuDataType::Mat4),
            FieldDesc::new("vDirection", GpuDataType::Vec3),
        ],
        4,
        alignment,
    );
    for field in layout.fields() {
        let natural = match field.desc.data_type {
            GpuDataType::Float | GpuDataType::Int | GpuDataType::UInt => 4,
            GpuDataType::Vec2 => 8,
            _ => 16,
        };
        assert_eq!(field.offset % natural, 0, "{}", field.desc.name);
    }
    for slice in 0..layout.slice_count() {
        assert_eq!(layout.dynamic_slice_offset(slice) % alignment, 0);
    }
}
