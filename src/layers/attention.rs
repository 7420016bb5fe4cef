// シングルヘッドのScaled Dot-Product Self-Attention

use ndarray::{Array2, Axis};
use rand::Rng;

use super::{check_width, Forward, Linear, LinearGradients};
use crate::error::{ModelError, Result};
use crate::math::softmax_rows;
use crate::optim::ParamPair;

/// Self-Attention（マスクなし、ヘッド分割なし）
///
/// 各位置は系列内の全位置（後続位置を含む）を参照する。
#[derive(Debug, Clone)]
pub struct SelfAttention {
    pub(crate) query: Linear,
    pub(crate) key: Linear,
    pub(crate) value: Linear,
}

#[derive(Debug, Clone)]
pub struct AttentionGradients {
    pub(crate) query: LinearGradients,
    pub(crate) key: LinearGradients,
    pub(crate) value: LinearGradients,
}

impl AttentionGradients {
    pub fn zeros(embedding_dim: usize) -> Self {
        Self {
            query: LinearGradients::zeros(embedding_dim, embedding_dim),
            key: LinearGradients::zeros(embedding_dim, embedding_dim),
            value: LinearGradients::zeros(embedding_dim, embedding_dim),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttentionCache {
    input: Array2<f32>,
    q: Array2<f32>,
    k: Array2<f32>,
    v: Array2<f32>,
    weights: Array2<f32>,
}

impl SelfAttention {
    pub fn new(embedding_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            query: Linear::new(embedding_dim, embedding_dim, rng),
            key: Linear::new(embedding_dim, embedding_dim, rng),
            value: Linear::new(embedding_dim, embedding_dim, rng),
        }
    }

    /// Q, K, V の投影がすべて D→D であることを確認して組み立てる
    pub fn from_projections(query: Linear, key: Linear, value: Linear) -> Result<Self> {
        let dim = query.in_dim();
        for (name, layer) in [("query", &query), ("key", &key), ("value", &value)] {
            if layer.in_dim() != dim || layer.out_dim() != dim {
                return Err(ModelError::ShapeMismatch(format!(
                    "{} projection is {}→{}, expected {}→{}",
                    name,
                    layer.in_dim(),
                    layer.out_dim(),
                    dim,
                    dim
                )));
            }
        }
        Ok(Self { query, key, value })
    }

    pub fn embedding_dim(&self) -> usize {
        self.query.in_dim()
    }

    pub fn num_parameters(&self) -> usize {
        self.query.num_parameters() + self.key.num_parameters() + self.value.num_parameters()
    }

    fn scale(&self) -> f32 {
        1.0 / (self.embedding_dim() as f32).sqrt()
    }

    /// アテンション重み (seq_len, seq_len)。各行は非負で和が1
    pub fn attention_weights(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.embedding_dim(), "attention input")?;
        let q = self.query.apply(x);
        let k = self.key.apply(x);
        let scores = q.dot(&k.t()) * self.scale();
        Ok(softmax_rows(&scores))
    }

    pub(crate) fn forward_with_cache(&self, x: &Array2<f32>) -> (Array2<f32>, AttentionCache) {
        let q = self.query.apply(x);
        let k = self.key.apply(x);
        let v = self.value.apply(x);

        let scores = q.dot(&k.t()) * self.scale();
        let weights = softmax_rows(&scores);
        let output = weights.dot(&v);

        let cache = AttentionCache {
            input: x.clone(),
            q,
            k,
            v,
            weights,
        };
        (output, cache)
    }

    pub(crate) fn backward(
        &self,
        d_out: &Array2<f32>,
        cache: &AttentionCache,
        grads: &mut AttentionGradients,
    ) -> Array2<f32> {
        let weights = &cache.weights;

        // output = weights · V
        let d_v = weights.t().dot(d_out);
        let d_weights = d_out.dot(&cache.v.t());

        // Softmax逆伝播: d_scores_ij = w_ij * (dw_ij - Σ_k dw_ik * w_ik)
        let row_dot = (&d_weights * weights)
            .sum_axis(Axis(1))
            .insert_axis(Axis(1));
        let d_scores = (&d_weights - &row_dot) * weights * self.scale();

        let d_q = d_scores.dot(&cache.k);
        let d_k = d_scores.t().dot(&cache.q);

        let d_x_q = self.query.backward(&d_q, &cache.input, &mut grads.query);
        let d_x_k = self.key.backward(&d_k, &cache.input, &mut grads.key);
        let d_x_v = self.value.backward(&d_v, &cache.input, &mut grads.value);

        d_x_q + &d_x_k + &d_x_v
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a AttentionGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        self.query.params_and_grads(&grads.query, out);
        self.key.params_and_grads(&grads.key, out);
        self.value.params_and_grads(&grads.value, out);
    }
}

impl Forward for SelfAttention {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.embedding_dim(), "attention input")?;
        Ok(self.forward_with_cache(x).0)
    }
}
