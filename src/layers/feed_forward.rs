use ndarray::Array2;
use rand::Rng;

use super::{check_width, Forward, Linear, LinearGradients};
use crate::error::{ModelError, Result};
use crate::math::{relu, relu_derivative};
use crate::optim::ParamPair;

/// Feed Forward Network: Linear(D→H) → ReLU → Linear(H→D)
#[derive(Debug, Clone)]
pub struct FeedForward {
    pub(crate) w1: Linear,
    pub(crate) w2: Linear,
}

#[derive(Debug, Clone)]
pub struct FeedForwardGradients {
    pub(crate) w1: LinearGradients,
    pub(crate) w2: LinearGradients,
}

impl FeedForwardGradients {
    pub fn zeros(embedding_dim: usize, hidden_dim: usize) -> Self {
        Self {
            w1: LinearGradients::zeros(embedding_dim, hidden_dim),
            w2: LinearGradients::zeros(hidden_dim, embedding_dim),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForwardCache {
    input: Array2<f32>,
    hidden: Array2<f32>,
    activated: Array2<f32>,
}

impl FeedForward {
    pub fn new(embedding_dim: usize, hidden_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            w1: Linear::new(embedding_dim, hidden_dim, rng),
            w2: Linear::new(hidden_dim, embedding_dim, rng),
        }
    }

    /// 2つの層の次元が D→H→D になっているか確認して組み立てる
    pub fn from_layers(w1: Linear, w2: Linear) -> Result<Self> {
        if w1.out_dim() != w2.in_dim() || w1.in_dim() != w2.out_dim() {
            return Err(ModelError::ShapeMismatch(format!(
                "feed forward layers {}→{} and {}→{} do not form D→H→D",
                w1.in_dim(),
                w1.out_dim(),
                w2.in_dim(),
                w2.out_dim()
            )));
        }
        Ok(Self { w1, w2 })
    }

    pub fn embedding_dim(&self) -> usize {
        self.w1.in_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w1.out_dim()
    }

    pub fn num_parameters(&self) -> usize {
        self.w1.num_parameters() + self.w2.num_parameters()
    }

    pub(crate) fn forward_with_cache(&self, x: &Array2<f32>) -> (Array2<f32>, FeedForwardCache) {
        let hidden = self.w1.apply(x);
        let activated = hidden.mapv(relu);
        let output = self.w2.apply(&activated);
        let cache = FeedForwardCache {
            input: x.clone(),
            hidden,
            activated,
        };
        (output, cache)
    }

    pub(crate) fn backward(
        &self,
        d_out: &Array2<f32>,
        cache: &FeedForwardCache,
        grads: &mut FeedForwardGradients,
    ) -> Array2<f32> {
        let d_activated = self.w2.backward(d_out, &cache.activated, &mut grads.w2);
        let d_hidden = d_activated * &cache.hidden.mapv(relu_derivative);
        self.w1.backward(&d_hidden, &cache.input, &mut grads.w1)
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a FeedForwardGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        self.w1.params_and_grads(&grads.w1, out);
        self.w2.params_and_grads(&grads.w2, out);
    }
}

impl Forward for FeedForward {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.embedding_dim(), "feed forward input")?;
        Ok(self.forward_with_cache(x).0)
    }
}
