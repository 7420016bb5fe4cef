// モデル設定と学習設定

use crate::error::{ModelError, Result};

/// 位置エンコーディング表のデフォルト長
pub const DEFAULT_MAX_SEQ_LEN: usize = 5000;

/// モデル構造の設定（構築後は変更不可）
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub max_seq_len: usize,
    /// 初期化用のシード。Noneならエントロピーから生成
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 6,
            embedding_dim: 16,
            hidden_dim: 32,
            num_layers: 2,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            seed: None,
        }
    }
}

impl ModelConfig {
    pub fn new(
        vocab_size: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        num_layers: usize,
    ) -> Self {
        Self {
            vocab_size,
            embedding_dim,
            hidden_dim,
            num_layers,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    /// 各次元が正であることを確認
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("vocab_size", self.vocab_size),
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
            ("num_layers", self.num_layers),
            ("max_seq_len", self.max_seq_len),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ModelError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// 学習設定
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// 進捗ログを出すエポック間隔（挙動には影響しない）
    pub report_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 0.01,
            report_interval: 10,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ModelError::InvalidConfig("epochs must be > 0".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "learning_rate must be a positive finite number, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}
