// モデル全体で使うエラー型

use thiserror::Error;

/// simple_llm の処理結果
pub type Result<T> = std::result::Result<T, ModelError>;

/// モデル構築・順伝播・学習で発生しうるエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// 設定値が不正（次元が0、学習率が負など）
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// パラメータや入力の形状が設定と一致しない
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// 位置エンコーディング表の長さを超える系列
    #[error("sequence length {len} exceeds maximum {max}")]
    SequenceTooLong { len: usize, max: usize },

    /// 語彙範囲外のトークンID
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    /// 空の入力系列
    #[error("empty input sequence")]
    EmptySequence,

    /// ロジットがすべてNaN（学習の発散など）
    #[error("no comparable logits: all values are NaN")]
    NonFiniteLogits,
}
