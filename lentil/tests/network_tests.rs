use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use lentil::layer::{
    activation, add, concat, dense_map, dense_var, dropout, fork, identity, lmap, random_arc_cosine,
    random_fourier, DenseVarConfig,
};
use lentil::{
    elbo, predict_expected, train_elbo, CategoricalLikelihood, Layer, LayerError, LayerExt, Matern,
    NormalLikelihood, Rbf, Samples, TrainConfig,
};

#[test]
fn fourier_then_dense_var_any_batch_size() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let net = random_fourier(50, Rbf::default()).then(dense_var(1, DenseVarConfig::default(), vb.pp("dense")));

    for batch in [1, 13, 64] {
        let x = Samples::replicate(&Tensor::randn(0f32, 1., (batch, 3), &dev)?, 5)?;
        let (f, kl) = net.build(&x)?;
        assert_eq!(f.len(), 5);
        assert_eq!(f.feature_dim()?, 1);
        assert_eq!(f.first().dims(), &[batch, 1]);
        assert!(kl.to_scalar::<f32>()? >= 0.);
    }
    Ok(())
}

#[test]
fn dense_var_kl_does_not_depend_on_the_first_batch() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let layer = dense_var(4, DenseVarConfig::default(), vb);

    let a = Samples::replicate(&Tensor::randn(0f32, 1., (3, 2), &dev)?, 1)?;
    let b = Samples::replicate(&Tensor::randn(5f32, 2., (11, 2), &dev)?, 4)?;

    let (_, kl_a) = layer.build(&a)?;
    let (_, kl_b) = layer.build(&b)?;
    let (_, kl_a2) = layer.build(&a)?;
    assert_eq!(kl_a.to_scalar::<f32>()?, kl_b.to_scalar::<f32>()?);
    assert_eq!(kl_a.to_scalar::<f32>()?, kl_a2.to_scalar::<f32>()?);
    Ok(())
}

#[test]
fn branching_network_sums_kl() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let left = dense_var(3, DenseVarConfig::default(), vb.pp("left"));
    let right = random_fourier(4, Matern::default()).with_seed(0);
    let net = fork(2)
        .then(lmap(vec![left.boxed(), right.boxed()]))
        .then(concat())
        .then(activation(|x| x.tanh()))
        .then(dense_map(2, 0., 1e-2, vb.pp("out")));

    let x = Samples::replicate(&Tensor::randn(0f32, 1., (6, 5), &dev)?, 3)?;
    let (f, kl) = net.build(&x)?;
    assert_eq!(f.first().dims(), &[6, 2]);
    assert!(kl.to_scalar::<f32>()? > 0.);

    // residual-style sum of two branches
    let skip = fork(2)
        .then(lmap(vec![identity().boxed(), activation(|x| x.relu()).boxed()]))
        .then(add());
    let (g, kl) = skip.build(&x)?;
    assert_eq!(g.first().dims(), &[6, 5]);
    assert_eq!(kl.to_scalar::<f32>()?, 0.);

    let bad = lmap(Vec::new());
    assert!(matches!(
        fork(1).then(bad).build(&x),
        Err(LayerError::LengthMismatch { layers: 0, inputs: 1 })
    ));
    Ok(())
}

#[test]
fn training_on_noisy_sine_reduces_loss() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let n = 200;
    let x = Tensor::arange(0u32, n as u32, &dev)?
        .to_dtype(DType::F32)?
        .affine(6. / n as f64, -3.)?
        .reshape((n, 1))?;
    let y = (x.sin()? + Tensor::randn(0f32, 0.1, (n, 1), &dev)?)?;

    let net = random_fourier(30, Rbf::new(1.0)?)
        .with_seed(1)
        .then(dense_var(1, DenseVarConfig::default(), vb.pp("dense")));
    let likelihood = NormalLikelihood::learned(&vb.pp("likelihood"), 1.0)?;

    let config = TrainConfig {
        learning_rate: 0.05,
        batch_size: 20,
        num_epochs: 40,
        num_samples: 3,
        show_progress: false,
        ..TrainConfig::default()
    };
    let trace = train_elbo(&net, &likelihood, &varmap, &x, &y, &config)?;
    assert_eq!(trace.len(), 40);
    assert!(trace.iter().all(|l| l.is_finite()));

    let early = trace[..5].iter().sum::<f32>() / 5.;
    let late = trace[35..].iter().sum::<f32>() / 5.;
    assert!(late < early, "{} !< {}", late, early);

    let (f, kl) = net.build(&Samples::replicate(&x, 2)?)?;
    let loss = elbo(&f, &y, n, &kl, &likelihood)?;
    assert!(loss.to_scalar::<f32>()?.is_finite());

    let mean = predict_expected(&net, &x, 5, 2)?;
    assert_eq!(mean.dims(), &[n, 1]);
    Ok(())
}

#[test]
fn arc_cosine_classifier_with_dropout() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let n = 120;
    let x = Tensor::randn(0f32, 1., (n, 2), &dev)?;
    let y = x.narrow(1, 0, 1)?.gt(0.)?.to_dtype(DType::F32)?;

    let net = random_arc_cosine(40, 1, 1.0)?
        .with_seed(2)
        .then(dropout(0.9))
        .then(dense_var(2, DenseVarConfig::default(), vb.pp("logits")));
    let likelihood = CategoricalLikelihood::new();

    let (f, kl) = net.build(&Samples::replicate(&x, 3)?)?;
    assert_eq!(f.first().dims(), &[n, 2]);
    let loss = elbo(&f, &y, n, &kl, &likelihood)?;
    assert!(loss.to_scalar::<f32>()?.is_finite());

    let config = TrainConfig {
        learning_rate: 0.05,
        batch_size: 30,
        num_epochs: 40,
        num_samples: 3,
        show_progress: false,
        ..TrainConfig::default()
    };
    let trace = train_elbo(&net, &likelihood, &varmap, &x, &y, &config)?;
    assert!(trace.iter().all(|l| l.is_finite()));

    let early = trace[..5].iter().sum::<f32>() / 5.;
    let late = trace[35..].iter().sum::<f32>() / 5.;
    assert!(late < early, "{} !< {}", late, early);
    Ok(())
}
