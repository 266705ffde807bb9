//! End-to-end tests of the tiled pipeline.
//!
//! Every test that dispatches work runs against both CPU backends through
//! `rstest` cases, since the two must agree bit for bit.
//!
//! ```bash
//! cargo test --test pipeline_tests
//! ```

mod common;

use common::{
    approx_eq, hash01, pipeline, scene_gbuffer, scene_lights, texel_bits, uniform_gbuffer,
    view_space_params,
};
use glam::{UVec2, Vec3, Vec4};
use rstest::rstest;
use tiled_lighting::packing::quantize_depth;
use tiled_lighting::pipeline::brdf::ambient_hemisphere;
use tiled_lighting::pipeline::tiled_shading::BACKGROUND_COLOR;
use tiled_lighting::resources::{unpack_tile_depths, DepthImage};
use tiled_lighting::scene::{DirectionalLight, LightRecord, LightType, PointLight};
use tiled_lighting::{
    BackendType, DepthMode, DepthRange, FrameInputs, TileRect, TiledConfig, TiledError,
};

fn point_light(range: DepthRange) -> LightRecord {
    PointLight::new(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE, 1.0, 50.0)
        .to_record(&glam::Mat4::IDENTITY)
        .with_depth_range(range)
}

// ============================================================================
// Depth Reduction
// ============================================================================

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_reduce_matches_brute_force(#[case] backend: BackendType) {
    let config = TiledConfig::default().with_tile_size(8);
    let pipeline = pipeline(backend, config.clone());
    // 7x5 tiles, the last column and row partial
    let depth = DepthImage::from_fn("depth", 50, 37, |x, y| hash01(x, y, 7));

    let ranges = unpack_tile_depths(&pipeline.reduce_depth(&depth).unwrap());
    assert_eq!(ranges.len(), 7 * 5);

    for (index, range) in ranges.iter().enumerate() {
        let tile = UVec2::new(index as u32 % 7, index as u32 / 7);
        let mut expected = DepthRange::EMPTY;
        for y in tile.y * 8..((tile.y + 1) * 8).min(37) {
            for x in tile.x * 8..((tile.x + 1) * 8).min(50) {
                expected.include(quantize_depth(hash01(x, y, 7)));
            }
        }
        assert_eq!(*range, expected, "tile {tile}");
        assert!(range.min <= range.max);
    }
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_reduce_constant_depth(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let depth = DepthImage::filled("depth", 64, 48, 0.625);
    let quantized = quantize_depth(0.625);

    let words = pipeline.reduce_depth(&depth).unwrap();
    assert_eq!(words.len(), 4 * 3);
    assert!(words
        .iter()
        .all(|&w| w == DepthRange::new(quantized, quantized).pack()));
}

// ============================================================================
// Light Culling
// ============================================================================

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_screen_quad_bounds_are_half_open(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let viewport = UVec2::new(128, 128);
    let tile_depth = pipeline
        .reduce_depth(&DepthImage::filled("depth", 128, 128, 0.5))
        .unwrap();
    let light = point_light(DepthRange::FULL).with_tile_rect(TileRect::new(2, 5, 3, 6));

    let culled = pipeline.cull_lights(&tile_depth, &[light], viewport).unwrap();
    assert_eq!(culled.tiles.len(), 64);
    for (index, tile) in culled.tiles.iter().enumerate() {
        let (x, y) = (index % 8, index / 8);
        let inside = (2..5).contains(&x) && (3..6).contains(&y);
        let expected: &[u32] = if inside { &[0] } else { &[] };
        assert_eq!(tile.lights(LightType::Point), expected, "tile ({x}, {y})");
        assert_eq!(tile.xy_count, inside as u32);
    }
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_depth_overlap_is_strict(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let tile_depth = [DepthRange::new(100, 200).pack()];
    let lights = [
        point_light(DepthRange::new(150, 300)),
        point_light(DepthRange::new(210, 300)),
        // Touching either end is not an overlap
        point_light(DepthRange::new(200, 300)),
        point_light(DepthRange::new(50, 100)),
        point_light(DepthRange::new(120, 180)),
    ];

    let culled = pipeline
        .cull_lights(&tile_depth, &lights, UVec2::new(16, 16))
        .unwrap();
    let tile = &culled.tiles[0];
    assert_eq!(tile.xy_count, 5);
    let mut accepted = tile.lights(LightType::Point).to_vec();
    accepted.sort_unstable();
    assert_eq!(accepted, vec![0, 4]);
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_bins_are_split_by_type(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let view = glam::Mat4::IDENTITY;
    let mut unknown = point_light(DepthRange::FULL);
    unknown.flags = 7;
    let lights = [
        DirectionalLight::default().to_record(&view),
        point_light(DepthRange::FULL),
        tiled_lighting::scene::SpotLight::default().to_record(&view),
        unknown,
        point_light(DepthRange::FULL),
    ];

    let culled = pipeline
        .cull_lights(&[DepthRange::new(0, 10).pack()], &lights, UVec2::new(16, 16))
        .unwrap();
    let tile = &culled.tiles[0];
    assert_eq!(tile.lights(LightType::Directional), &[0]);
    assert_eq!(tile.lights(LightType::Point), &[1, 4]);
    assert_eq!(tile.lights(LightType::Spot), &[2]);
    assert_eq!(tile.total(), 4);
    assert_eq!(culled.stats.unknown_type, 1);
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_bin_overflow_drops_extra_lights(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let lights = vec![point_light(DepthRange::FULL); 300];
    let tile_depth = pipeline
        .reduce_depth(&DepthImage::filled("depth", 16, 16, 0.5))
        .unwrap();

    let culled = pipeline
        .cull_lights(&tile_depth, &lights, UVec2::new(16, 16))
        .unwrap();
    let tile = &culled.tiles[0];
    assert_eq!(tile.xy_count, 256);
    assert_eq!(culled.stats.xy_overflow, 44);

    // Invocation k claims k then k + 256, so 212..=255 are the lights dropped
    // from the XY list and the point bin keeps the first 64 claims
    assert_eq!(culled.stats.z_overflow, 256 - 64);
    let claim_order: Vec<u32> = (0..32).flat_map(|i| [i, i + 256]).collect();
    assert_eq!(tile.lights(LightType::Point), claim_order.as_slice());

    let wide = common::pipeline(backend, TiledConfig::default().with_capacities(256, 256));
    let culled = wide
        .cull_lights(&tile_depth, &lights, UVec2::new(16, 16))
        .unwrap();
    let mut kept = culled.tiles[0].lights(LightType::Point).to_vec();
    kept.sort_unstable();
    let expected: Vec<u32> = (0..=211).chain(256..=299).collect();
    assert_eq!(kept, expected);
}

// ============================================================================
// Shading
// ============================================================================

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_directional_light_facing_pixel(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    // Odd size so the center texel sits exactly on the view axis
    let size = UVec2::new(33, 33);
    let albedo = Vec3::new(0.8, 0.4, 0.2);
    let gbuffer = uniform_gbuffer(size, 0.5, Vec3::Z, albedo.extend(0.0));
    let params = view_space_params(size, DepthMode::Hardware)
        .with_surface_roughness(0.5)
        .with_ambient(Vec3::splat(0.1), Vec3::splat(0.1));
    let light = DirectionalLight::new(-Vec3::Z, Vec3::ONE, 1.0).to_record(&params.view_matrix);

    let output = pipeline
        .render(&FrameInputs {
            gbuffer: &gbuffer,
            lights: &[light],
            params: &params,
        })
        .unwrap();

    let texel = output.image.load(UVec2::new(16, 16)).unwrap();
    let expected = albedo * (Vec3::splat(0.1) + Vec3::splat(params.roughness_a));
    assert!(approx_eq(texel.truncate(), expected), "{texel} vs {expected}");
    assert_eq!(texel.w, 1.0);
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_light_only_reaches_its_tiles(#[case] backend: BackendType) {
    let pipeline = pipeline(
        backend,
        TiledConfig::default().with_depth_mode(DepthMode::Linear),
    );
    let size = UVec2::new(32, 16);
    let albedo = Vec3::splat(0.5);
    let gbuffer = uniform_gbuffer(size, 0.5, Vec3::Z, albedo.extend(0.0));
    let params = view_space_params(size, DepthMode::Linear);
    let light = PointLight::new(Vec3::new(0.0, 0.0, -40.0), Vec3::ONE, 5.0, 100.0)
        .to_record(&params.view_matrix)
        .with_tile_rect(TileRect::new(0, 1, 0, 1));

    let output = pipeline
        .render(&FrameInputs {
            gbuffer: &gbuffer,
            lights: &[light],
            params: &params,
        })
        .unwrap();

    let ambient = ambient_hemisphere(
        Vec3::Z,
        &params.view_matrix,
        params.ambient_ground,
        params.ambient_sky,
    );
    let unlit = output.image.load(UVec2::new(24, 8)).unwrap().truncate();
    assert!(approx_eq(unlit, albedo * ambient));
    let lit = output.image.load(UVec2::new(8, 8)).unwrap().truncate();
    assert!(lit.x > unlit.x);
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_outside_invocations_still_cull(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    // One pixel in a 16x16 tile: only invocation 0 samples, but light 255
    // is reached only by invocation 255's stride
    let size = UVec2::new(1, 1);
    let albedo = Vec3::splat(0.8);
    let gbuffer = uniform_gbuffer(size, 0.5, Vec3::Z, albedo.extend(0.0));
    let params = view_space_params(size, DepthMode::Hardware);
    let elsewhere = point_light(DepthRange::FULL).with_tile_rect(TileRect::new(1, 2, 1, 2));
    let mut lights = vec![elsewhere; 256];
    lights[255] = DirectionalLight::new(-Vec3::Z, Vec3::ONE, 1.0)
        .to_record(&params.view_matrix)
        .with_tile_rect(TileRect::FULL);

    let output = pipeline
        .render(&FrameInputs {
            gbuffer: &gbuffer,
            lights: &lights,
            params: &params,
        })
        .unwrap();

    let ambient = ambient_hemisphere(
        Vec3::Z,
        &params.view_matrix,
        params.ambient_ground,
        params.ambient_sky,
    );
    let texel = output.image.load(UVec2::ZERO).unwrap();
    assert!(texel.x > albedo.x * ambient.x + 0.1, "{texel}");
    assert_eq!(texel.w, 1.0);
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_background_is_opaque_black(#[case] backend: BackendType) {
    let pipeline = pipeline(backend, TiledConfig::default());
    let size = UVec2::new(40, 24);
    let gbuffer = uniform_gbuffer(size, 1.0, Vec3::Z, Vec4::ONE);
    let params = view_space_params(size, DepthMode::Hardware);
    let lights = [DirectionalLight::new(-Vec3::Z, Vec3::splat(10.0), 1.0)
        .to_record(&params.view_matrix)];

    let output = pipeline
        .render(&FrameInputs {
            gbuffer: &gbuffer,
            lights: &lights,
            params: &params,
        })
        .unwrap();
    assert!(output
        .image
        .texels()
        .iter()
        .all(|&texel| texel == BACKGROUND_COLOR));
}

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_linear_depth_empty_tile(#[case] backend: BackendType) {
    let config = TiledConfig::default().with_depth_mode(DepthMode::Linear);
    let pipeline = pipeline(backend, config);
    let size = UVec2::new(32, 16);
    // Left tile has no geometry
    let depth = DepthImage::from_fn("depth", 32, 16, |x, _| if x < 16 { 0.0 } else { 0.4 });
    let tile_depth = pipeline.reduce_depth(&depth).unwrap();
    let ranges = unpack_tile_depths(&tile_depth);
    assert!(ranges[0].is_empty());
    assert_eq!(ranges[1], DepthRange::from_normalized(0.4, 0.4));

    let light = point_light(DepthRange::FULL);
    let culled = pipeline.cull_lights(&tile_depth, &[light], size).unwrap();
    assert_eq!(culled.tiles[0].total(), 0);
    assert_eq!(culled.tiles[1].lights(LightType::Point), &[0]);

    let mut gbuffer = uniform_gbuffer(size, 0.4, Vec3::Z, Vec4::ONE);
    gbuffer.depth = depth;
    let params = view_space_params(size, DepthMode::Linear);
    let output = pipeline
        .render(&FrameInputs {
            gbuffer: &gbuffer,
            lights: &[light],
            params: &params,
        })
        .unwrap();
    assert_eq!(output.image.load(UVec2::new(3, 5)), Some(BACKGROUND_COLOR));
    assert_ne!(output.image.load(UVec2::new(20, 5)), Some(BACKGROUND_COLOR));
}

// ============================================================================
// Determinism
// ============================================================================

#[rstest]
#[case::serial(BackendType::Serial)]
#[case::parallel(BackendType::Parallel)]
fn test_render_is_idempotent(#[case] backend: BackendType) {
    let config = TiledConfig::default().with_capacities(32, 8);
    let pipeline = pipeline(backend, config.clone());
    let size = UVec2::new(100, 70);
    let gbuffer = scene_gbuffer(size);
    let lights = scene_lights(120, config.tile_grid(size).unwrap());
    let params = view_space_params(size, DepthMode::Hardware);
    let inputs = FrameInputs {
        gbuffer: &gbuffer,
        lights: &lights,
        params: &params,
    };

    let first = pipeline.render(&inputs).unwrap();
    let second = pipeline.render(&inputs).unwrap();
    assert_eq!(first.tile_depth, second.tile_depth);
    assert_eq!(texel_bits(&first.image), texel_bits(&second.image));
    assert_eq!(first.culling, second.culling);
}

#[test]
fn test_backends_agree() {
    let config = TiledConfig::default().with_tile_size(8).with_capacities(48, 16);
    let size = UVec2::new(90, 61);
    let gbuffer = scene_gbuffer(size);
    let lights = scene_lights(200, config.tile_grid(size).unwrap());
    let params = view_space_params(size, DepthMode::Hardware);
    let inputs = FrameInputs {
        gbuffer: &gbuffer,
        lights: &lights,
        params: &params,
    };

    let serial = pipeline(BackendType::Serial, config.clone())
        .render(&inputs)
        .unwrap();
    let parallel = pipeline(BackendType::Parallel, config).render(&inputs).unwrap();
    assert_eq!(serial.tile_depth, parallel.tile_depth);
    assert_eq!(texel_bits(&serial.image), texel_bits(&parallel.image));
    assert_eq!(serial.culling, parallel.culling);
}

// ============================================================================
// Host-side Validation
// ============================================================================

#[test]
fn test_tile_grid_limit() {
    let pipeline = pipeline(BackendType::Serial, TiledConfig::default());
    let depth = DepthImage::filled("depth", 255 * 16 + 1, 1, 0.5);
    assert!(matches!(
        pipeline.reduce_depth(&depth),
        Err(TiledError::TileGridTooLarge { tiles_x: 256, .. })
    ));
}

#[test]
fn test_invalid_configs_are_rejected() {
    for config in [
        TiledConfig::default().with_tile_size(0),
        TiledConfig::default().with_tile_size(64),
        TiledConfig::default().with_capacities(16, 32),
    ] {
        assert!(matches!(
            tiled_lighting::TiledPipeline::new(config),
            Err(TiledError::InvalidConfig(_))
        ));
    }
}
