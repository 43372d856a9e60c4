use approx::assert_abs_diff_eq;
use matrix_param::io::{read_json, write_json};
use matrix_param::*;
use matrix_util::common_io::create_temp_dir_file;
use matrix_util::tensor_util::contract_factors;
use matrix_util::traits::SampleOps;
use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tefa::*;

fn low_rank_matrix(m: usize, n: usize, k: usize, seed: u64) -> anyhow::Result<ArrayD<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let truth = vec![
        Array2::<f32>::rnorm(Ix2(k, m), &mut rng),
        Array2::<f32>::rnorm(Ix2(k, n), &mut rng),
    ];
    let noise = ArrayD::<f32>::rnorm(IxDyn(&[m, n]), &mut rng) * 0.1;
    Ok(contract_factors(&truth)? + noise)
}

fn short_run(n_components: usize, max_iterations: usize) -> FactorisationOptions {
    FactorisationOptions {
        n_components,
        max_iterations,
        stop_init: StopRule::Stall(5, STALL_TOLERANCE),
        stop_em: StopRule::Stall(10, STALL_TOLERANCE),
        stop_bcd: StopRule::Improvement(1e-2, Improvement::Absolute),
        log_every: 0,
        ..Default::default()
    }
}

/// every phase converges on its second observation
fn two_steps_per_phase() -> StopRule {
    StopRule::Improvement(f32::INFINITY, Improvement::Absolute)
}

#[test]
fn two_way_example() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(1);
    let x = ArrayD::<f32>::rnorm(IxDyn(&[4, 5]), &mut rng);

    let mut lh = AllSpecificNormal2dLikelihood::with_default_properties(&[4, 5], 1)?;
    lh.init(&x, &mut rng)?;
    {
        let noise = lh.noise_distribution()?;
        assert_eq!(noise.param("tau0")?.shape(), &[4]);
        assert_eq!(noise.param("tau1")?.shape(), &[5]);
        for name in ["tau0", "tau1"] {
            assert!(noise.param(name)?.iter().all(|&t| t > 0.0 && t < 1.0));
        }
    }

    let u = [4, 5]
        .iter()
        .map(|&mf| -> anyhow::Result<Array2<f32>> {
            let prior = CenNormal::random(Properties::new("u"), &[mf], &[1], &mut rng)?;
            Ok(prior.sample(&mut rng)?.into_dimensionality::<Ix2>()?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    assert!(lh.llh(&u, &x)?.is_finite());

    let mut nd = NormalNdLikelihood::new(&[4, 5], 1, 0.01, Properties::new("likelihood"))?;
    nd.init(&x, &mut rng)?;
    assert_abs_diff_eq!(nd.tau()?, 0.01);
    assert!(nd.llh(&u, &x)?.is_finite());
    Ok(())
}

#[test]
fn likelihood_needs_init() -> anyhow::Result<()> {
    let lh = AllSpecificNormal2dLikelihood::with_default_properties(&[4, 5], 1)?;
    let u = vec![Array2::<f32>::zeros((1, 4)), Array2::<f32>::zeros((1, 5))];
    let x = ArrayD::<f32>::zeros(IxDyn(&[4, 5]));

    for err in [
        lh.residuals(&u, &x).unwrap_err(),
        lh.prep_vars(0, &u, &x).unwrap_err(),
        lh.noise_distribution().unwrap_err(),
    ] {
        assert!(matches!(param_error(&err), Some(ParamError::State(_))));
    }

    let mut lh = lh;
    let mut rng = SmallRng::seed_from_u64(0);
    lh.init(&x, &mut rng)?;
    let err = lh.init(&x, &mut rng).unwrap_err();
    assert!(matches!(param_error(&err), Some(ParamError::State(_))));

    let err = lh.residuals(&u[..1], &x).unwrap_err();
    assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));
    Ok(())
}

#[test]
fn fit_a_low_rank_matrix() -> anyhow::Result<()> {
    let x = low_rank_matrix(30, 20, 2, 11)?;

    let mut dec = Decompose::new(short_run(2, 300));
    dec.fit(&x)?;

    let model = dec.model()?;
    assert!(model.iteration() <= 300);
    assert_eq!(model.llh_trace().len(), model.iteration());
    assert!(model.llh_trace().iter().all(|v| v.is_finite()));

    let loss = model.likelihood().loss(model.factors(), &x)?;
    let total: f32 = x.iter().map(|v| v * v).sum();
    assert!(loss < 0.2 * total, "loss {} of {}", loss, total);

    let evr = dec.variance_ratio()?;
    assert_eq!(evr.len(), 2);
    assert!(evr.iter().all(|v| v.is_finite() && *v >= 0.0));

    let components = dec.components()?;
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].dim(), (2, 20));
    Ok(())
}

#[test]
fn phases_run_in_order() -> anyhow::Result<()> {
    let x = low_rank_matrix(8, 6, 1, 12)?;
    let options = FactorisationOptions {
        stop_init: two_steps_per_phase(),
        stop_em: two_steps_per_phase(),
        stop_bcd: two_steps_per_phase(),
        ..short_run(2, 100)
    };

    let mut model = TensorFactorisation::new(&[8, 6], options)?;
    model.fit(&x)?;
    assert_eq!(model.phase(), Phase::Done);
    assert_eq!(model.iteration(), 6);

    let sd = model.posterior_sd(1).expect("mode 1");
    assert_eq!(sd.dim(), (2, 6));
    assert!(sd.iter().all(|v| v.is_finite()));

    let err = model.step(&x).unwrap_err();
    assert!(matches!(param_error(&err), Some(ParamError::State(_))));
    Ok(())
}

#[test]
fn iteration_ceiling_is_a_hard_stop() -> anyhow::Result<()> {
    let x = low_rank_matrix(8, 6, 1, 13)?;
    let options = FactorisationOptions {
        stop_init: StopRule::Stall(1000, STALL_TOLERANCE),
        ..short_run(1, 7)
    };

    let mut model = TensorFactorisation::new(&[8, 6], options)?;
    model.fit(&x)?;
    assert_eq!(model.iteration(), 7);
    assert_eq!(model.phase(), Phase::Init);
    Ok(())
}

#[test]
fn three_way_with_mixed_priors() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(14);
    let truth: Vec<Array2<f32>> = [6, 5, 4]
        .iter()
        .map(|&mf| Array2::<f32>::runif(Ix2(2, mf), &mut rng))
        .collect();
    let x = contract_factors(&truth)?;

    let options = FactorisationOptions {
        priors: vec![PriorFamily::T, PriorFamily::Normal, PriorFamily::Exponential],
        noise: NoiseModel::Normal,
        tau: 0.01,
        ..short_run(2, 20)
    };

    let mut model = TensorFactorisation::new(&[6, 5, 4], options)?;
    model.fit(&x)?;

    assert!(model.llh_trace().iter().all(|v| v.is_finite()));
    assert!(model.factors()[2].iter().all(|&v| v > 0.0));
    assert_eq!(model.priors()[0].latent_shape(), &[6]);
    Ok(())
}

#[test]
fn checkpoint_round_trip() -> anyhow::Result<()> {
    let x = low_rank_matrix(10, 7, 2, 15)?;
    let mut model = TensorFactorisation::new(&[10, 7], short_run(2, 30))?;
    model.fit(&x)?;

    let checkpoint = model.checkpoint()?;
    assert!(checkpoint.variables.contains_key("U/0"));
    assert!(checkpoint.variables.contains_key("prior/1/tau"));
    assert!(checkpoint.variables.contains_key("likelihood/noise/tau0"));

    let file = create_temp_dir_file(".json.gz")?;
    let file = file.to_str().expect("file name");
    write_json(&checkpoint, file)?;
    let back: Checkpoint = read_json(file)?;

    let restored = TensorFactorisation::from_checkpoint(&back)?;
    assert_eq!(restored.iteration(), model.iteration());
    assert_eq!(restored.phase(), model.phase());
    for (a, b) in restored.factors().iter().zip(model.factors().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(
        restored.likelihood().llh(restored.factors(), &x)?,
        model.likelihood().llh(model.factors(), &x)?,
        epsilon = 1e-2
    );

    // a model of another shape refuses it
    let mut other = TensorFactorisation::new(&[10, 8], short_run(2, 30))?;
    let err = other.restore(&checkpoint).unwrap_err();
    assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));
    Ok(())
}

#[test]
fn transform_new_rows() -> anyhow::Result<()> {
    let x = low_rank_matrix(12, 9, 2, 16)?;
    let mut dec = Decompose::new(short_run(2, 40));
    let u0 = dec.fit_transform(&x)?;
    assert_eq!(u0.dim(), (2, 12));

    let x_new = low_rank_matrix(5, 9, 2, 17)?;
    let u0_new = dec.transform(&x_new)?;
    assert_eq!(u0_new.dim(), (2, 5));
    assert!(u0_new.iter().all(|v| v.is_finite()));

    let bad = ArrayD::<f32>::zeros(IxDyn(&[5, 8]));
    let err = dec.transform(&bad).unwrap_err();
    assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));
    Ok(())
}

#[test]
fn decompose_before_fit() {
    let dec = Decompose::new(FactorisationOptions::default());
    for err in [
        dec.components().unwrap_err(),
        dec.parameters().unwrap_err(),
        dec.variance_ratio().unwrap_err(),
    ] {
        assert!(matches!(param_error(&err), Some(ParamError::State(_))));
    }
}

#[test]
fn fit_a_single_row() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(18);
    let x = ArrayD::<f32>::rnorm(IxDyn(&[1, 6]), &mut rng);
    let options = FactorisationOptions {
        priors: vec![PriorFamily::Normal],
        ..short_run(2, 50)
    };

    let mut model = TensorFactorisation::new(&[1, 6], options)?;
    model.fit(&x)?;
    assert!(model.llh_trace().iter().all(|v| v.is_finite()));
    assert!(model.factors()[0].iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn transform_one_new_row() -> anyhow::Result<()> {
    let x = low_rank_matrix(12, 9, 2, 19)?;
    let x_new = low_rank_matrix(1, 9, 2, 20)?;

    for priors in [vec![PriorFamily::CenNormal], vec![PriorFamily::Normal], vec![PriorFamily::T]] {
        let mut dec = Decompose::new(FactorisationOptions {
            priors,
            ..short_run(2, 40)
        });
        dec.fit(&x)?;
        let before = dec.parameters()?;

        let u0 = dec.transform(&x_new)?;
        assert_eq!(u0.dim(), (2, 1));
        assert!(u0.iter().all(|v| v.is_finite()));

        // the fitted model is left alone
        let after = dec.parameters()?;
        assert_eq!(before.variables, after.variables);
    }
    Ok(())
}

#[test]
fn held_out_entries() -> anyhow::Result<()> {
    let x = low_rank_matrix(20, 15, 2, 21)?;
    let options = FactorisationOptions {
        trainset_prob: 0.8,
        ..short_run(2, 200)
    };

    let mut dec = Decompose::new(options);
    dec.fit(&x)?;
    let mask = dec.mask()?.expect("held-out entries").clone();
    assert_eq!(mask.shape(), x.shape());
    assert!(mask.iter().any(|&w| w == 0.0));

    // the held-out entries are predicted from the rest
    let model = dec.model()?;
    let xhat = contract_factors(model.factors())?;
    let (mut sse, mut sst, mut n) = (0.0, 0.0, 0);
    for ((&w, &v), &vhat) in mask.iter().zip(x.iter()).zip(xhat.iter()) {
        if w == 0.0 {
            sse += (v - vhat) * (v - vhat);
            sst += v * v;
            n += 1;
        }
    }
    assert!(n > 0);
    assert!(sse < 0.5 * sst, "held-out error {} of {}", sse, sst);

    let checkpoint = dec.parameters()?;
    assert_eq!(checkpoint.variables.get("data_mask"), Some(&mask));
    let restored = Decompose::from_checkpoint(&checkpoint)?;
    assert_eq!(restored.mask()?, Some(&mask));
    Ok(())
}
