// Transformerを構成する小さな部品
//
// どの部品も (系列長, 次元) の行列を受け取り同じ形の行列を返す
// Forward を実装し、モデルはそれらを順に合成するだけで組み立てる。

pub mod attention;
pub mod embedding;
pub mod feed_forward;
pub mod linear;
pub mod norm;
pub mod positional;

use ndarray::Array2;

use crate::error::{ModelError, Result};

pub use attention::{AttentionCache, AttentionGradients, SelfAttention};
pub use embedding::{EmbeddingGradients, TokenEmbedding};
pub use feed_forward::{FeedForward, FeedForwardCache, FeedForwardGradients};
pub use linear::{Linear, LinearGradients};
pub use norm::{LayerNorm, LayerNormCache, LayerNormGradients};
pub use positional::PositionalEncoding;

/// 系列ベクトルに対する順伝播
pub trait Forward {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>>;
}

/// 入力の列数（埋め込み次元）を確認
pub(crate) fn check_width(x: &Array2<f32>, expected: usize, what: &str) -> Result<()> {
    if x.ncols() != expected {
        return Err(ModelError::ShapeMismatch(format!(
            "{}: expected width {}, got {}",
            what,
            expected,
            x.ncols()
        )));
    }
    Ok(())
}
