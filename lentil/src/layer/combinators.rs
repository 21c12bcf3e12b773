use candle_core::Tensor;

use super::{BoxedLayer, Layer};
use crate::error::{LayerError, Result};
use crate::samples::{Branches, Samples};

/// Copy the input into `replicas` identical branches
#[derive(Clone, Debug)]
pub struct Fork {
    replicas: usize,
}

pub fn fork(replicas: usize) -> Fork {
    Fork { replicas }
}

impl Layer for Fork {
    type Input = Samples;
    type Output = Branches;

    fn build(&self, x: &Samples) -> Result<(Branches, Tensor)> {
        if self.replicas == 0 {
            return Err(LayerError::InvalidArgument(
                "fork needs at least one branch".into(),
            ));
        }
        let branches = Branches::new(vec![x.clone(); self.replicas])?;
        Ok((branches, x.zero_kl()?))
    }
}

/// Apply the i-th layer to the i-th branch
pub struct LMap {
    layers: Vec<BoxedLayer>,
}

pub fn lmap(layers: Vec<BoxedLayer>) -> LMap {
    LMap { layers }
}

impl LMap {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl Layer for LMap {
    type Input = Branches;
    type Output = Branches;

    fn build(&self, xs: &Branches) -> Result<(Branches, Tensor)> {
        if xs.len() != self.layers.len() {
            return Err(LayerError::LengthMismatch {
                layers: self.layers.len(),
                inputs: xs.len(),
            });
        }

        let mut kl = xs.zero_kl()?;
        let mut phis = Vec::with_capacity(xs.len());
        for (layer, x) in self.layers.iter().zip(xs) {
            let (phi, kl_b) = layer.build(x)?;
            kl = (kl + kl_b)?;
            phis.push(phi);
        }
        Ok((Branches::new(phis)?, kl))
    }
}

fn check_batch(replica: usize, parts: &[&Tensor]) -> Result<()> {
    let first = parts[0];
    for x in parts {
        if x.rank() != 2 {
            return Err(LayerError::RankMismatch {
                replica,
                expected: 2,
                shape: x.dims().to_vec(),
            });
        }
        if x.dim(0)? != first.dim(0)? {
            return Err(LayerError::ShapeMismatch {
                expected: first.dims().to_vec(),
                found: x.dims().to_vec(),
            });
        }
    }
    Ok(())
}

/// Join branches replica by replica, concatenating features (dim 1)
#[derive(Clone, Debug, Default)]
pub struct Concat;

pub fn concat() -> Concat {
    Concat
}

impl Layer for Concat {
    type Input = Branches;
    type Output = Samples;

    fn build(&self, xs: &Branches) -> Result<(Samples, Tensor)> {
        let phi = xs
            .by_replica()?
            .into_iter()
            .enumerate()
            .map(|(s, parts)| {
                check_batch(s, &parts)?;
                Ok(Tensor::cat(&parts, 1)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((Samples::new(phi)?, xs.zero_kl()?))
    }
}

/// Join branches replica by replica with an elementwise sum
#[derive(Clone, Debug, Default)]
pub struct Add;

pub fn add() -> Add {
    Add
}

impl Layer for Add {
    type Input = Branches;
    type Output = Samples;

    fn build(&self, xs: &Branches) -> Result<(Samples, Tensor)> {
        let phi = xs
            .by_replica()?
            .into_iter()
            .map(|parts| {
                let mut acc = parts[0].clone();
                for x in &parts[1..] {
                    if x.dims() != acc.dims() {
                        return Err(LayerError::ShapeMismatch {
                            expected: acc.dims().to_vec(),
                            found: x.dims().to_vec(),
                        });
                    }
                    acc = (acc + *x)?;
                }
                Ok(acc)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((Samples::new(phi)?, xs.zero_kl()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{identity, LayerExt};
    use candle_core::{DType, Device};

    fn replicas(vals: &[f32], ncol: usize) -> Result<Samples> {
        let dev = Device::Cpu;
        let xs = vals
            .iter()
            .map(|&v| Ok(Tensor::full(v, (2, ncol), &dev)?))
            .collect::<Result<Vec<_>>>()?;
        Samples::new(xs)
    }

    #[test]
    fn lmap_length_mismatch() -> Result<()> {
        let x = replicas(&[1., 2.], 3)?;
        let two = lmap(vec![identity().boxed(), identity().boxed()]);
        assert_eq!(two.num_layers(), 2);

        let three = Branches::new(vec![x.clone(), x.clone(), x.clone()])?;
        match two.build(&three) {
            Err(LayerError::LengthMismatch { layers, inputs }) => {
                assert_eq!((layers, inputs), (2, 3));
            }
            other => panic!("expected length mismatch, got {:?}", other.map(|_| ())),
        }

        let one = Branches::new(vec![x.clone()])?;
        assert!(matches!(
            two.build(&one),
            Err(LayerError::LengthMismatch { layers: 2, inputs: 1 })
        ));

        let (ys, _) = two.build(&Branches::new(vec![x.clone(), x])?)?;
        assert_eq!(ys.len(), 2);
        Ok(())
    }

    #[test]
    fn concat_stacks_features_per_replica() -> Result<()> {
        let a = replicas(&[1., 2., 3.], 3)?;
        let b = replicas(&[10., 20., 30.], 2)?;
        let (y, kl) = concat().build(&Branches::new(vec![a, b])?)?;

        assert_eq!(kl.to_scalar::<f32>()?, 0.);
        assert_eq!(y.len(), 3);
        for (s, r) in y.iter().enumerate() {
            assert_eq!(r.dims(), &[2, 5]);
            let row = r.get(0)?.to_vec1::<f32>()?;
            let v = (s + 1) as f32;
            assert_eq!(row, vec![v, v, v, 10. * v, 10. * v]);
        }
        Ok(())
    }

    #[test]
    fn add_sums_per_replica() -> Result<()> {
        let a = replicas(&[1., 2.], 4)?;
        let b = replicas(&[10., 20.], 4)?;
        let (y, _) = add().build(&Branches::new(vec![a, b])?)?;
        assert_eq!(y.first().get(1)?.to_vec1::<f32>()?, vec![11.; 4]);
        assert_eq!(y.as_slice()[1].get(0)?.to_vec1::<f32>()?, vec![22.; 4]);

        let c = replicas(&[1., 2.], 3)?;
        let d = replicas(&[1., 2.], 4)?;
        assert!(matches!(
            add().build(&Branches::new(vec![c, d])?),
            Err(LayerError::ShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn fork_then_join() -> Result<()> {
        let x = replicas(&[1., 2.], 3)?;
        let net = fork(2)
            .then(lmap(vec![identity().boxed(), identity().boxed()]))
            .then(concat());
        let (y, kl) = net.build(&x)?;
        assert_eq!(y.first().dims(), &[2, 6]);
        assert_eq!(kl.dtype(), DType::F32);
        assert!(fork(0).build(&x).is_err());
        Ok(())
    }
}
