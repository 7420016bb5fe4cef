// トークン埋め込み層

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{ModelError, Result};
use crate::optim::ParamPair;

/// トークンID → 埋め込みベクトルの表 (vocab_size, embedding_dim)
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    pub(crate) table: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingGradients {
    pub(crate) d_table: Array2<f32>,
}

impl EmbeddingGradients {
    pub fn zeros(vocab_size: usize, embedding_dim: usize) -> Self {
        Self {
            d_table: Array2::zeros((vocab_size, embedding_dim)),
        }
    }
}

impl TokenEmbedding {
    /// 標準正規分布 N(0, 1) で初期化
    pub fn new(vocab_size: usize, embedding_dim: usize, rng: &mut impl Rng) -> Self {
        let table: Array2<f32> = Array2::from_shape_fn((vocab_size, embedding_dim), |_| {
            StandardNormal.sample(&mut *rng)
        });
        Self { table }
    }

    pub fn from_table(table: Array2<f32>) -> Result<Self> {
        if table.nrows() == 0 || table.ncols() == 0 {
            return Err(ModelError::InvalidConfig(
                "embedding table with zero dimension".to_string(),
            ));
        }
        Ok(Self { table })
    }

    pub fn vocab_size(&self) -> usize {
        self.table.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.table.ncols()
    }

    /// 各IDの行をそのまま取り出す
    pub fn embed(&self, input_ids: &[usize]) -> Result<Array2<f32>> {
        let mut output = Array2::zeros((input_ids.len(), self.embedding_dim()));
        for (i, &token_id) in input_ids.iter().enumerate() {
            if token_id >= self.vocab_size() {
                return Err(ModelError::TokenOutOfRange {
                    id: token_id,
                    vocab_size: self.vocab_size(),
                });
            }
            output.row_mut(i).assign(&self.table.row(token_id));
        }
        Ok(output)
    }

    /// 同じIDが複数回出現した場合は勾配を加算
    pub(crate) fn backward(
        &self,
        input_ids: &[usize],
        d_out: &Array2<f32>,
        grads: &mut EmbeddingGradients,
    ) {
        for (i, &token_id) in input_ids.iter().enumerate() {
            let mut row = grads.d_table.row_mut(token_id);
            row += &d_out.row(i);
        }
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a EmbeddingGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        out.push((
            self.table.view_mut().into_dyn(),
            grads.d_table.view().into_dyn(),
        ));
    }
}
