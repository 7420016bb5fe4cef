use ndarray::{s, Array2};

use super::{check_width, Forward};
use crate::error::{ModelError, Result};

/// 正弦波による固定の位置エンコーディング（学習しない）
///
/// 行 `p`、チャネル `2i` は `sin(p / 10000^(2i/D))`、チャネル `2i+1` は
/// `cos(p / 10000^(2i/D))`。構築時に一度だけ計算する。
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    table: Array2<f32>,
}

impl PositionalEncoding {
    pub fn new(max_seq_len: usize, embedding_dim: usize) -> Self {
        let mut table = Array2::zeros((max_seq_len, embedding_dim));
        for pos in 0..max_seq_len {
            for c in 0..embedding_dim {
                let exponent = (2 * (c / 2)) as f32 / embedding_dim as f32;
                let angle = pos as f32 / 10000f32.powf(exponent);
                table[[pos, c]] = if c % 2 == 0 { angle.sin() } else { angle.cos() };
            }
        }
        Self { table }
    }

    pub fn max_seq_len(&self) -> usize {
        self.table.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.table.ncols()
    }

    pub fn table(&self) -> &Array2<f32> {
        &self.table
    }

    pub(crate) fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_seq_len() {
            return Err(ModelError::SequenceTooLong {
                len,
                max: self.max_seq_len(),
            });
        }
        Ok(())
    }
}

impl Forward for PositionalEncoding {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_len(x.nrows())?;
        check_width(x, self.embedding_dim(), "positional encoding input")?;
        Ok(x + &self.table.slice(s![..x.nrows(), ..]))
    }
}
