// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_adversary::{
    to_normalized, to_pixel, AttackError, AttackOptions, ConfigError, ConstraintGeometry,
    ElasticAttack, ElasticAttackBase, ElasticAttackConfig, JpegAttack, JpegAttackBase,
    JpegAttackConfig, JpegCodec, PixelModel, RoundingMode, RoundingVars, SeparatedList,
};
use st_nn::{AvgPool2d, Linear, Sequential};
use st_tensor::{ImageShape, Tensor};
use std::io::Write;

fn linear_head(inputs: usize, classes: usize, seed: u64) -> Linear {
    let weight = Tensor::random_uniform(inputs, classes, -0.05, 0.05, Some(seed)).unwrap();
    Linear::from_tensors("head", weight, Tensor::zeros(1, classes).unwrap()).unwrap()
}

fn textured(batch: usize, shape: ImageShape, seed: u64) -> Tensor {
    Tensor::random_uniform(batch, shape.volume(), -0.9, 0.9, Some(seed)).unwrap()
}

#[test]
fn elastic_without_iterations_or_budget_is_identity() {
    let _ = spiral_config::tracing::init_tracing();
    let shape = ImageShape::new(3, 32, 32).unwrap();
    let images = textured(4, shape, 1);
    let mut attack = ElasticAttack::new(linear_head(shape.volume(), 10, 2), 0, 0.0, 0.0, 32).unwrap();
    let out = attack.perturb(&images, &[0, 1, 2, 3]).unwrap();
    assert_eq!(out.shape(), images.shape());
    assert!(out.max_abs_diff(&images).unwrap() < 1e-3);
}

#[test]
fn jpeg_without_budget_matches_plain_compression() {
    let shape = ImageShape::new(3, 32, 32).unwrap();
    let images = textured(2, shape, 3);
    let mut attack =
        JpegAttack::new(linear_head(shape.volume(), 4, 4), 0, 0.0, 0.0, "linf", 32).unwrap();
    let out = attack.perturb(&images, &[1, 3]).unwrap();

    let codec = JpegCodec::new();
    assert!(codec.downsample_chroma());
    assert_eq!(codec.factor(), 1.0);
    let vars = RoundingVars::zeros(2, &codec.layout(32, 32)).unwrap();
    let baseline = codec
        .forward(&to_pixel(&images), shape, &vars, &[0.0, 0.0])
        .unwrap();
    assert!(out.max_abs_diff(&to_normalized(&baseline)).unwrap() < 1e-6);
    // lossy, but not destructive
    assert!(out.max_abs_diff(&images).unwrap() > 0.0);
}

#[test]
fn elastic_flow_saturates_under_repeated_steps() {
    let shape = ImageShape::new(3, 16, 16).unwrap();
    let plane = Tensor::random_uniform(2, shape.plane(), 0.0, 255.0, Some(5)).unwrap();
    let pixels = Tensor::from_fn(2, shape.volume(), |b, i| {
        plane.data()[b * shape.plane() + i % shape.plane()]
    })
    .unwrap();
    let mut config = ElasticAttackConfig::new(10, 2.0, 1.0, 16);
    config.seed = Some(17);
    let mut attack = ElasticAttackBase::new(config).unwrap();
    let mut model = PixelModel::new(linear_head(shape.volume(), 3, 6));
    let outcome = attack
        .forward(&mut model, &pixels, shape, &[0, 2], AttackOptions::default())
        .unwrap();
    let eps = 2.0 * 2.0 / 16.0;
    for norm in outcome.flow.row_linf_norms() {
        assert!((norm - eps).abs() < 1e-6, "flow norm {norm} is not on the boundary {eps}");
    }
}

#[test]
fn targeted_mode_and_eps_scaling_stay_in_budget() {
    let shape = ImageShape::new(3, 16, 16).unwrap();
    let pixels = to_pixel(&textured(3, shape, 8));
    let mut config = JpegAttackConfig::new(2, 1.0, 0.5, "linf", 16);
    config.seed = Some(2);
    config.scale_each = true;
    let mut attack = JpegAttackBase::new(config).unwrap();
    let mut model = PixelModel::new(linear_head(shape.volume(), 3, 9));
    let options = AttackOptions {
        scale_eps: true,
        avoid_target: false,
    };
    let outcome = attack
        .forward(&mut model, &pixels, shape, &[0, 1, 2], options)
        .unwrap();
    assert!(outcome
        .perturbation
        .row_linf_norms()
        .iter()
        .all(|&n| n <= 1.0));
}

#[test]
fn compression_is_deterministic_at_zero_amplitude() {
    let shape = ImageShape::new(3, 32, 32).unwrap();
    let pixels = to_pixel(&textured(2, shape, 11));
    let codec = JpegCodec::new().with_quality(75.0).unwrap();
    let layout = codec.layout(32, 32);
    let noise = Tensor::random_uniform(2, layout.len(), -1.0, 1.0, Some(12)).unwrap();
    let vars = layout.split(&noise).unwrap();
    let first = codec.forward(&pixels, shape, &vars, &[0.0, 0.0]).unwrap();
    let second = codec.forward(&pixels, shape, &vars, &[0.0, 0.0]).unwrap();
    assert_eq!(first, second);
    let zero = RoundingVars::zeros(2, &layout).unwrap();
    let third = codec.forward(&pixels, shape, &zero, &[0.0, 0.0]).unwrap();
    assert_eq!(first, third);
}

#[test]
fn straight_through_rounding_snaps_flat_blocks() {
    let shape = ImageShape::new(3, 16, 16).unwrap();
    let pixels = Tensor::full(1, shape.volume(), 133.3).unwrap();
    let codec = JpegCodec::new()
        .with_downsample_chroma(false)
        .with_rounding(RoundingMode::StraightThrough);
    let vars = RoundingVars::zeros(1, &codec.layout(16, 16)).unwrap();
    let out = codec.forward(&pixels, shape, &vars, &[0.0]).unwrap();
    // DC = 8 * 5.3 = 42.4 quantizes to 3 * 16 = 48, i.e. a level of 134
    assert!(out.data().iter().all(|v| (v - 134.0).abs() < 1e-2));
}

#[test]
fn pooled_classifier_runs_through_the_facade() {
    let shape = ImageShape::new(3, 16, 16).unwrap();
    let pool = AvgPool2d::square(shape, 4).unwrap();
    let pooled = pool.output_shape().volume();
    let model = Sequential::new()
        .with(pool)
        .with(linear_head(pooled, 5, 13));
    let mut config = JpegAttackConfig::new(2, 2.0, 1.0, "l1", 16);
    config.seed = Some(4);
    let mut attack = JpegAttack::from_config(model, config).unwrap();
    let images = textured(2, shape, 14);
    let out = attack.perturb(&images, &[4, 0]).unwrap();
    assert_eq!(out.shape(), images.shape());
    assert!(out.data().iter().all(|v| v.abs() <= 1.0 + 1e-5));
}

#[test]
fn every_listed_geometry_builds() {
    let geometries: SeparatedList<ConstraintGeometry> = "linf,l1,l2".parse().unwrap();
    assert_eq!(geometries.len(), 3);
    for geometry in &geometries {
        let attack = JpegAttack::new(
            linear_head(3 * 16 * 16, 2, 1),
            1,
            1.0,
            0.5,
            geometry.as_str(),
            16,
        )
        .unwrap();
        assert_eq!(attack.base().geometry(), *geometry);
    }
    let none: SeparatedList<ConstraintGeometry> = "none".parse().unwrap();
    assert!(none.is_empty());
    assert!(matches!(
        "linf,l4".parse::<SeparatedList<ConstraintGeometry>>(),
        Err(AttackError::UnknownConstraint { .. })
    ));
}

#[test]
fn configs_load_from_toml_files() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "nb_iters = 3\neps_max = 0.5\nstep_size = 0.25\nresolution = 16\nopt = \"l2\"\nquality = 80.0\nrounding = \"straight_through\"\nseed = 7"
    )
    .unwrap();
    let config = JpegAttackConfig::load(file.path()).unwrap();
    assert_eq!(config.geometry().unwrap(), ConstraintGeometry::L2);
    assert_eq!(config.rounding, RoundingMode::StraightThrough);
    assert!((config.factor().unwrap() - 0.4).abs() < 1e-6);
    let attack = JpegAttack::from_config(linear_head(768, 2, 3), config).unwrap();
    assert_eq!(attack.base().codec().rounding(), RoundingMode::StraightThrough);

    let json = serde_json::to_value(attack.base().config()).unwrap();
    assert_eq!(json["opt"], "l2");

    let missing = ElasticAttackConfig::load(file.path().with_extension("missing"));
    assert!(matches!(
        missing,
        Err(AttackError::Config(ConfigError::Io { .. }))
    ));
    assert!(matches!(
        ElasticAttackConfig::from_toml_str("nb_iters = \"many\""),
        Err(AttackError::Config(ConfigError::Toml { .. }))
    ));
}

#[test]
fn configuration_errors_surface_before_iterating() {
    let shape = ImageShape::new(3, 24, 24).unwrap();
    let mut attack =
        JpegAttack::new(linear_head(shape.volume(), 2, 1), 5, 1.0, 0.5, "l2", 24).unwrap();
    let images = textured(1, shape, 2);
    assert!(matches!(
        attack.perturb(&images, &[0]),
        Err(AttackError::BlockAlignment { .. })
    ));

    let mut elastic = ElasticAttack::new(linear_head(768, 2, 1), 1, 1.0, 0.5, 16).unwrap();
    let wrong = Tensor::zeros(1, 3 * 16 * 16 + 1).unwrap();
    assert!(elastic.perturb(&wrong, &[0]).is_err());
    let images = textured(1, ImageShape::new(3, 16, 16).unwrap(), 5);
    assert!(matches!(
        elastic.perturb(&images, &[7]),
        Err(AttackError::Tensor(_))
    ));
}
