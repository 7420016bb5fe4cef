// Transformerブロック（Post-LN）

use ndarray::Array2;
use rand::Rng;

use crate::error::{ModelError, Result};
use crate::layers::{
    check_width, AttentionCache, AttentionGradients, FeedForward, FeedForwardCache,
    FeedForwardGradients, Forward, LayerNorm, LayerNormCache, LayerNormGradients, SelfAttention,
};
use crate::optim::ParamPair;

/// Transformerの1ブロック
///
/// ```text
/// x1 = LayerNorm1(x + SelfAttention(x))
/// x2 = LayerNorm2(x1 + FeedForward(x1))
/// ```
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    pub(crate) attention: SelfAttention,
    pub(crate) norm1: LayerNorm,
    pub(crate) feed_forward: FeedForward,
    pub(crate) norm2: LayerNorm,
}

/// ブロックの勾配
#[derive(Debug, Clone)]
pub struct BlockGradients {
    pub(crate) attention: AttentionGradients,
    pub(crate) norm1: LayerNormGradients,
    pub(crate) feed_forward: FeedForwardGradients,
    pub(crate) norm2: LayerNormGradients,
}

impl BlockGradients {
    pub fn zeros(embedding_dim: usize, hidden_dim: usize) -> Self {
        Self {
            attention: AttentionGradients::zeros(embedding_dim),
            norm1: LayerNormGradients::zeros(embedding_dim),
            feed_forward: FeedForwardGradients::zeros(embedding_dim, hidden_dim),
            norm2: LayerNormGradients::zeros(embedding_dim),
        }
    }
}

/// ブロックごとの中間値キャッシュ
#[derive(Debug, Clone)]
pub struct BlockCache {
    attention: AttentionCache,
    norm1: LayerNormCache,
    feed_forward: FeedForwardCache,
    norm2: LayerNormCache,
}

impl TransformerBlock {
    pub fn new(embedding_dim: usize, hidden_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            attention: SelfAttention::new(embedding_dim, rng),
            norm1: LayerNorm::new(embedding_dim),
            feed_forward: FeedForward::new(embedding_dim, hidden_dim, rng),
            norm2: LayerNorm::new(embedding_dim),
        }
    }

    /// 構築済みの部品から組み立てる。次元が揃っていなければエラー
    pub fn from_parts(
        attention: SelfAttention,
        norm1: LayerNorm,
        feed_forward: FeedForward,
        norm2: LayerNorm,
    ) -> Result<Self> {
        let dim = attention.embedding_dim();
        let dims = [
            ("norm1", norm1.dim()),
            ("feed_forward", feed_forward.embedding_dim()),
            ("norm2", norm2.dim()),
        ];
        for (name, d) in dims {
            if d != dim {
                return Err(ModelError::ShapeMismatch(format!(
                    "{} has dimension {}, attention has {}",
                    name, d, dim
                )));
            }
        }
        Ok(Self {
            attention,
            norm1,
            feed_forward,
            norm2,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.attention.embedding_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.feed_forward.hidden_dim()
    }

    pub fn num_parameters(&self) -> usize {
        self.attention.num_parameters()
            + self.norm1.num_parameters()
            + self.feed_forward.num_parameters()
            + self.norm2.num_parameters()
    }

    pub(crate) fn forward_with_cache(&self, x: &Array2<f32>) -> (Array2<f32>, BlockCache) {
        let (attended, attention) = self.attention.forward_with_cache(x);
        let (x1, norm1) = self.norm1.forward_with_cache(&(x + &attended));

        let (forwarded, feed_forward) = self.feed_forward.forward_with_cache(&x1);
        let (x2, norm2) = self.norm2.forward_with_cache(&(&x1 + &forwarded));

        let cache = BlockCache {
            attention,
            norm1,
            feed_forward,
            norm2,
        };
        (x2, cache)
    }

    /// 逆伝播（残差接続の勾配は両方の経路に流れる）
    pub(crate) fn backward(
        &self,
        d_out: &Array2<f32>,
        cache: &BlockCache,
        grads: &mut BlockGradients,
    ) -> Array2<f32> {
        let d_sum2 = self.norm2.backward(d_out, &cache.norm2, &mut grads.norm2);
        let d_x1 = self
            .feed_forward
            .backward(&d_sum2, &cache.feed_forward, &mut grads.feed_forward)
            + &d_sum2;

        let d_sum1 = self.norm1.backward(&d_x1, &cache.norm1, &mut grads.norm1);
        self.attention
            .backward(&d_sum1, &cache.attention, &mut grads.attention)
            + &d_sum1
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a BlockGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        self.attention.params_and_grads(&grads.attention, out);
        self.norm1.params_and_grads(&grads.norm1, out);
        self.feed_forward.params_and_grads(&grads.feed_forward, out);
        self.norm2.params_and_grads(&grads.norm2, out);
    }
}

impl Forward for TransformerBlock {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.embedding_dim(), "transformer block input")?;
        let attended = self.attention.forward(x)?;
        let x1 = self.norm1.forward(&(x + &attended))?;
        let forwarded = self.feed_forward.forward(&x1)?;
        self.norm2.forward(&(&x1 + &forwarded))
    }
}
