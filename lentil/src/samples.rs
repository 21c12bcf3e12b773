use crate::error::{LayerError, Result};
use candle_core::Tensor;

/// Stochastic replicas of one quantity, one tensor per independent
/// forward sample. Each tensor keeps its own batch axis (dim 0); the
/// replica index is never mixed with the batch index.
#[derive(Clone, Debug)]
pub struct Samples(Vec<Tensor>);

impl Samples {
    /// # Arguments
    /// * `replicas` - one tensor per stochastic replica, at least one
    pub fn new(replicas: Vec<Tensor>) -> Result<Self> {
        if replicas.is_empty() {
            return Err(LayerError::EmptySamples("replica list"));
        }
        Ok(Self(replicas))
    }

    /// Feed the same data into `n` independent stochastic replicas
    ///
    /// # Arguments
    /// * `x` - input `(batch, feature)`, shared (not copied) by every replica
    /// * `n` - number of replicas, must be positive
    pub fn replicate(x: &Tensor, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(LayerError::InvalidArgument(
                "at least one replica is needed".into(),
            ));
        }
        Self::new(vec![x.clone(); n])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Tensor] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Tensor> {
        self.0
    }

    pub fn first(&self) -> &Tensor {
        &self.0[0]
    }

    /// Apply `f` to every replica, keeping the order
    ///
    /// # Arguments
    /// * `f` - per-replica transform; the first error stops the map
    ///
    /// # Returns
    /// New `Samples` with the same number of replicas
    pub fn map<F>(&self, f: F) -> Result<Self>
    where
        F: FnMut(&Tensor) -> Result<Tensor>,
    {
        Self::new(self.0.iter().map(f).collect::<Result<Vec<_>>>()?)
    }

    /// A zero scalar living on the replicas' device with their dtype
    pub fn zero_kl(&self) -> Result<Tensor> {
        let x = self.first();
        Ok(Tensor::zeros((), x.dtype(), x.device())?)
    }

    /// Feature dimension shared by all replicas.
    ///
    /// # Returns
    /// `d` when every replica is a rank-2 `(batch, d)` tensor; otherwise
    /// `RankMismatch` or `FeatureDimMismatch` naming the first offending
    /// replica.
    pub fn feature_dim(&self) -> Result<usize> {
        let mut expected = None;
        for (r, x) in self.0.iter().enumerate() {
            let (_, d) = x.dims2().map_err(|_| LayerError::RankMismatch {
                replica: r,
                expected: 2,
                shape: x.dims().to_vec(),
            })?;
            match expected {
                None => expected = Some(d),
                Some(e) if e != d => {
                    return Err(LayerError::FeatureDimMismatch {
                        replica: r,
                        expected: e,
                        found: d,
                    })
                }
                _ => {}
            }
        }
        expected.ok_or(LayerError::EmptySamples("replica list"))
    }

    /// Stack the replicas along a new leading axis, `(S, ...)`
    pub fn stack(&self) -> Result<Tensor> {
        Ok(Tensor::stack(&self.0, 0)?)
    }

    /// Average over replicas
    pub fn mean(&self) -> Result<Tensor> {
        Ok(self.stack()?.mean(0)?)
    }
}

impl<'a> IntoIterator for &'a Samples {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parallel network branches, each carrying its own `Samples`
#[derive(Clone, Debug)]
pub struct Branches(Vec<Samples>);

impl Branches {
    /// # Arguments
    /// * `branches` - outputs of the parallel branches, in order
    pub fn new(branches: Vec<Samples>) -> Result<Self> {
        if branches.is_empty() {
            return Err(LayerError::EmptySamples("branch list"));
        }
        Ok(Self(branches))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Samples> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Samples> {
        self.0
    }

    pub fn zero_kl(&self) -> Result<Tensor> {
        self.0[0].zero_kl()
    }

    /// Number of replicas, which must agree across branches
    pub fn num_replicas(&self) -> Result<usize> {
        let expected = self.0[0].len();
        for b in &self.0[1..] {
            if b.len() != expected {
                return Err(LayerError::ReplicaMismatch {
                    expected,
                    found: b.len(),
                });
            }
        }
        Ok(expected)
    }

    /// Regroup per replica: element `s` holds replica `s` of every branch
    ///
    /// # Returns
    /// `num_replicas` groups of `len()` tensors, or `ReplicaMismatch`
    pub fn by_replica(&self) -> Result<Vec<Vec<&Tensor>>> {
        let n = self.num_replicas()?;
        Ok((0..n)
            .map(|s| self.0.iter().map(|b| &b.as_slice()[s]).collect())
            .collect())
    }
}

impl<'a> IntoIterator for &'a Branches {
    type Item = &'a Samples;
    type IntoIter = std::slice::Iter<'a, Samples>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
