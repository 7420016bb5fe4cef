// ワードレベルの最小構成Transformer言語モデル
// 教育目的のシンプルな実装（逆伝播も手書き）

pub mod block;
pub mod config;
pub mod error;
pub mod layers;
pub mod math;
pub mod model;
pub mod optim;
pub mod predictor;
pub mod tokenizer;
pub mod trainer;

// 主要な型を再エクスポート
pub use block::TransformerBlock;
pub use config::{ModelConfig, TrainingConfig};
pub use error::{ModelError, Result};
pub use layers::Forward;
pub use model::SequenceModel;
pub use optim::{Adam, Optimizer, Sgd};
pub use predictor::Predictor;
pub use tokenizer::Vocabulary;
pub use trainer::{Trainer, TrainingReport};
