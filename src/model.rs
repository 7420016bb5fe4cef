// 埋め込み → 位置エンコーディング → Transformerブロック×N → 出力投影

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::block::{BlockCache, BlockGradients, TransformerBlock};
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::layers::{
    EmbeddingGradients, Forward, Linear, LinearGradients, PositionalEncoding, TokenEmbedding,
};
use crate::optim::ParamPair;

/// 次トークン予測のための系列モデル
#[derive(Debug, Clone)]
pub struct SequenceModel {
    config: ModelConfig,
    embedding: TokenEmbedding,
    positional: PositionalEncoding,
    blocks: Vec<TransformerBlock>,
    output: Linear,
}

/// モデル全体の勾配（パラメータと同じ構造）
#[derive(Debug, Clone)]
pub struct ModelGradients {
    pub(crate) embedding: EmbeddingGradients,
    pub(crate) blocks: Vec<BlockGradients>,
    pub(crate) output: LinearGradients,
}

impl ModelGradients {
    pub fn zeros(config: &ModelConfig) -> Self {
        Self {
            embedding: EmbeddingGradients::zeros(config.vocab_size, config.embedding_dim),
            blocks: (0..config.num_layers)
                .map(|_| BlockGradients::zeros(config.embedding_dim, config.hidden_dim))
                .collect(),
            output: LinearGradients::zeros(config.embedding_dim, config.vocab_size),
        }
    }
}

/// 順伝播時の中間値キャッシュ（逆伝播用）
#[derive(Debug, Clone)]
pub struct ForwardCache {
    input_ids: Vec<usize>,
    block_caches: Vec<BlockCache>,
    final_hidden: Array2<f32>,
}

impl SequenceModel {
    /// 設定から新しいモデルを作成（シード指定時は再現可能）
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let embedding = TokenEmbedding::new(config.vocab_size, config.embedding_dim, &mut rng);
        let positional = PositionalEncoding::new(config.max_seq_len, config.embedding_dim);
        let blocks = (0..config.num_layers)
            .map(|_| TransformerBlock::new(config.embedding_dim, config.hidden_dim, &mut rng))
            .collect();
        let output = Linear::new(config.embedding_dim, config.vocab_size, &mut rng);

        let model = Self {
            config,
            embedding,
            positional,
            blocks,
            output,
        };
        debug!(
            vocab_size = model.config.vocab_size,
            embedding_dim = model.config.embedding_dim,
            hidden_dim = model.config.hidden_dim,
            num_layers = model.config.num_layers,
            parameters = model.num_parameters(),
            "sequence model created"
        );
        Ok(model)
    }

    /// 構築済みの部品からモデルを組み立てる
    ///
    /// 各部品の次元が `config` と一致しない場合は構築時点で失敗する。
    pub fn from_parts(
        config: ModelConfig,
        embedding: TokenEmbedding,
        blocks: Vec<TransformerBlock>,
        output: Linear,
    ) -> Result<Self> {
        config.validate()?;

        let d = config.embedding_dim;
        if embedding.vocab_size() != config.vocab_size || embedding.embedding_dim() != d {
            return Err(ModelError::ShapeMismatch(format!(
                "embedding table is {}x{}, expected {}x{}",
                embedding.vocab_size(),
                embedding.embedding_dim(),
                config.vocab_size,
                d
            )));
        }
        if blocks.len() != config.num_layers {
            return Err(ModelError::InvalidConfig(format!(
                "expected {} blocks, got {}",
                config.num_layers,
                blocks.len()
            )));
        }
        for (i, block) in blocks.iter().enumerate() {
            if block.embedding_dim() != d || block.hidden_dim() != config.hidden_dim {
                return Err(ModelError::ShapeMismatch(format!(
                    "block {} is D={} H={}, expected D={} H={}",
                    i,
                    block.embedding_dim(),
                    block.hidden_dim(),
                    d,
                    config.hidden_dim
                )));
            }
        }
        if output.in_dim() != d || output.out_dim() != config.vocab_size {
            return Err(ModelError::ShapeMismatch(format!(
                "output projection is {}→{}, expected {}→{}",
                output.in_dim(),
                output.out_dim(),
                d,
                config.vocab_size
            )));
        }

        let positional = PositionalEncoding::new(config.max_seq_len, d);
        Ok(Self {
            config,
            embedding,
            positional,
            blocks,
            output,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn max_seq_len(&self) -> usize {
        self.positional.max_seq_len()
    }

    pub fn num_parameters(&self) -> usize {
        let blocks: usize = self.blocks.iter().map(|b| b.num_parameters()).sum();
        self.embedding.vocab_size() * self.embedding.embedding_dim()
            + blocks
            + self.output.num_parameters()
    }

    fn check_input(&self, input_ids: &[usize]) -> Result<()> {
        if input_ids.is_empty() {
            return Err(ModelError::EmptySequence);
        }
        self.positional.check_len(input_ids.len())
    }

    /// 順伝播。各位置のロジット (seq_len, vocab_size) を返す
    pub fn forward(&self, input_ids: &[usize]) -> Result<Array2<f32>> {
        self.check_input(input_ids)?;

        let mut hidden_states = self.embedding.embed(input_ids)?;
        hidden_states = self.positional.forward(&hidden_states)?;
        for block in &self.blocks {
            hidden_states = block.forward(&hidden_states)?;
        }
        self.output.forward(&hidden_states)
    }

    /// 最後の位置のロジット
    pub fn last_logits(&self, input_ids: &[usize]) -> Result<Array1<f32>> {
        let logits = self.forward(input_ids)?;
        Ok(logits.row(logits.nrows() - 1).to_owned())
    }

    /// キャッシュ付き順伝播（逆伝播用）
    pub fn forward_with_cache(&self, input_ids: &[usize]) -> Result<(Array2<f32>, ForwardCache)> {
        self.check_input(input_ids)?;

        let embedded = self.embedding.embed(input_ids)?;
        let mut hidden_states = self.positional.forward(&embedded)?;

        let mut block_caches = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (output, cache) = block.forward_with_cache(&hidden_states);
            block_caches.push(cache);
            hidden_states = output;
        }

        let logits = self.output.apply(&hidden_states);
        let cache = ForwardCache {
            input_ids: input_ids.to_vec(),
            block_caches,
            final_hidden: hidden_states,
        };
        Ok((logits, cache))
    }

    /// 逆伝播。ロジットに対する勾配から全パラメータの勾配を計算する
    pub fn backward(&self, cache: &ForwardCache, d_logits: &Array2<f32>) -> Result<ModelGradients> {
        let expected = (cache.input_ids.len(), self.config.vocab_size);
        if d_logits.dim() != expected {
            return Err(ModelError::ShapeMismatch(format!(
                "logit gradient is {:?}, expected {:?}",
                d_logits.dim(),
                expected
            )));
        }

        let mut grads = ModelGradients::zeros(&self.config);

        let mut d_hidden = self
            .output
            .backward(d_logits, &cache.final_hidden, &mut grads.output);

        for ((block, block_cache), block_grads) in self
            .blocks
            .iter()
            .zip(cache.block_caches.iter())
            .zip(grads.blocks.iter_mut())
            .rev()
        {
            d_hidden = block.backward(&d_hidden, block_cache, block_grads);
        }

        // 位置エンコーディングは固定なので勾配はそのまま埋め込みへ
        self.embedding
            .backward(&cache.input_ids, &d_hidden, &mut grads.embedding);

        Ok(grads)
    }

    /// 全パラメータと勾配の組を固定の順序で列挙する
    pub fn params_and_grads<'a>(&'a mut self, grads: &'a ModelGradients) -> Vec<ParamPair<'a>> {
        let mut out = Vec::new();
        self.embedding.params_and_grads(&grads.embedding, &mut out);
        for (block, block_grads) in self.blocks.iter_mut().zip(grads.blocks.iter()) {
            block.params_and_grads(block_grads, &mut out);
        }
        self.output.params_and_grads(&grads.output, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FeedForward, LayerNorm, SelfAttention};
    use crate::math::cross_entropy_with_grad;

    fn small_model(seed: u64) -> SequenceModel {
        let config = ModelConfig::new(6, 8, 16, 2).with_seed(seed);
        SequenceModel::new(config).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let config = ModelConfig::new(100, 16, 32, 2).with_seed(0);
        let model = SequenceModel::new(config).unwrap();
        assert_eq!(model.vocab_size(), 100);
        assert_eq!(model.max_seq_len(), 5000);
        assert!(model.num_parameters() > 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SequenceModel::new(ModelConfig::new(6, 16, 32, 0));
        assert!(matches!(result, Err(ModelError::InvalidConfig(_))));
    }

    #[test]
    fn test_forward_shape() {
        let model = small_model(1);
        let logits = model.forward(&[0, 1, 2, 3]).unwrap();
        assert_eq!(logits.dim(), (4, 6));
        assert_eq!(model.last_logits(&[0, 1, 2]).unwrap().len(), 6);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let model = small_model(2);
        let a = model.forward(&[4, 3, 2]).unwrap();
        let b = model.forward(&[4, 3, 2]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = small_model(42).forward(&[0, 1]).unwrap();
        let b = small_model(42).forward(&[0, 1]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forward_errors() {
        let config = ModelConfig::new(6, 8, 16, 1)
            .with_max_seq_len(3)
            .with_seed(0);
        let model = SequenceModel::new(config).unwrap();
        assert_eq!(model.forward(&[]), Err(ModelError::EmptySequence));
        assert_eq!(
            model.forward(&[0, 1, 2, 3]),
            Err(ModelError::SequenceTooLong { len: 4, max: 3 })
        );
        assert_eq!(
            model.forward(&[0, 9]),
            Err(ModelError::TokenOutOfRange {
                id: 9,
                vocab_size: 6,
            })
        );
    }

    #[test]
    fn test_cached_forward_matches_forward() {
        let model = small_model(3);
        let plain = model.forward(&[1, 2, 3]).unwrap();
        let (cached, _) = model.forward_with_cache(&[1, 2, 3]).unwrap();
        for (a, b) in plain.iter().zip(cached.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_from_parts_dimension_mismatch() {
        let mut rng = StdRng::seed_from_u64(0);
        let config = ModelConfig::new(6, 8, 16, 1);

        // 埋め込み次元が設定と異なる
        let result = SequenceModel::from_parts(
            config.clone(),
            TokenEmbedding::new(6, 4, &mut rng),
            vec![TransformerBlock::new(8, 16, &mut rng)],
            Linear::new(8, 6, &mut rng),
        );
        assert!(matches!(result, Err(ModelError::ShapeMismatch(_))));

        // 出力投影の語彙数が異なる
        let result = SequenceModel::from_parts(
            config.clone(),
            TokenEmbedding::new(6, 8, &mut rng),
            vec![TransformerBlock::new(8, 16, &mut rng)],
            Linear::new(8, 5, &mut rng),
        );
        assert!(matches!(result, Err(ModelError::ShapeMismatch(_))));

        // ブロック数が異なる
        let result = SequenceModel::from_parts(
            config.clone(),
            TokenEmbedding::new(6, 8, &mut rng),
            vec![],
            Linear::new(8, 6, &mut rng),
        );
        assert!(matches!(result, Err(ModelError::InvalidConfig(_))));

        let block = TransformerBlock::from_parts(
            SelfAttention::new(8, &mut rng),
            LayerNorm::new(8),
            FeedForward::new(8, 16, &mut rng),
            LayerNorm::new(8),
        )
        .unwrap();
        let model = SequenceModel::from_parts(
            config,
            TokenEmbedding::new(6, 8, &mut rng),
            vec![block],
            Linear::new(8, 6, &mut rng),
        )
        .unwrap();
        assert_eq!(model.forward(&[0, 1]).unwrap().dim(), (2, 6));
    }

    #[test]
    fn test_parameter_enumeration_is_complete() {
        let mut model = small_model(4);
        let total = model.num_parameters();
        let grads = ModelGradients::zeros(model.config());
        let counted: usize = model
            .params_and_grads(&grads)
            .iter()
            .map(|(p, _)| p.len())
            .sum();
        assert_eq!(counted, total);
    }

    /// 最後の位置の交差エントロピー
    fn last_position_loss(model: &SequenceModel, input_ids: &[usize], target: usize) -> f32 {
        let logits = model.last_logits(input_ids).unwrap();
        cross_entropy_with_grad(logits.view(), target).0
    }

    #[test]
    fn test_output_projection_gradient_numerical() {
        let model = small_model(5);
        let input_ids = [1, 2, 3];
        let target = 4;
        let h = 1e-3;

        let (logits, cache) = model.forward_with_cache(&input_ids).unwrap();
        let (_, d_last) = cross_entropy_with_grad(logits.row(2), target);
        let mut d_logits = Array2::zeros(logits.dim());
        d_logits.row_mut(2).assign(&d_last);
        let grads = model.backward(&cache, &d_logits).unwrap();

        for &(i, j) in &[(0, 0), (3, 4), (7, 2)] {
            let mut plus = model.clone();
            let mut minus = model.clone();
            plus.output.weight[[i, j]] += h;
            minus.output.weight[[i, j]] -= h;
            let numerical = (last_position_loss(&plus, &input_ids, target)
                - last_position_loss(&minus, &input_ids, target))
                / (2.0 * h);
            let analytical = grads.output.d_weight[[i, j]];
            assert!(
                (analytical - numerical).abs() < 1e-2,
                "output grad mismatch at [{},{}]: analytical={}, numerical={}",
                i,
                j,
                analytical,
                numerical
            );
        }
    }

    #[test]
    fn test_embedding_gradient_numerical() {
        let model = small_model(6);
        let input_ids = [0, 2, 0];
        let target = 1;
        let h = 1e-3;

        let (logits, cache) = model.forward_with_cache(&input_ids).unwrap();
        let (_, d_last) = cross_entropy_with_grad(logits.row(2), target);
        let mut d_logits = Array2::zeros(logits.dim());
        d_logits.row_mut(2).assign(&d_last);
        let grads = model.backward(&cache, &d_logits).unwrap();

        // 使われていないIDの勾配はゼロ
        assert!(grads.embedding.d_table.row(5).iter().all(|&g| g == 0.0));

        for &(row, col) in &[(0, 0), (0, 5), (2, 3)] {
            let mut plus = model.clone();
            let mut minus = model.clone();
            plus.embedding.table[[row, col]] += h;
            minus.embedding.table[[row, col]] -= h;
            let numerical = (last_position_loss(&plus, &input_ids, target)
                - last_position_loss(&minus, &input_ids, target))
                / (2.0 * h);
            let analytical = grads.embedding.d_table[[row, col]];
            let diff = (analytical - numerical).abs();
            let rel_err = if analytical.abs() > 1e-3 {
                diff / analytical.abs()
            } else {
                diff
            };
            assert!(
                rel_err < 0.05 || diff < 2e-2,
                "embedding grad mismatch at [{},{}]: analytical={}, numerical={}",
                row,
                col,
                analytical,
                numerical
            );
        }
    }

    #[test]
    fn test_gradient_step_reduces_loss() {
        // 勾配方向に小さく更新すると損失が下がる
        let mut model = small_model(7);
        let input_ids = [0, 1, 2];
        let target = 3;
        let loss_before = last_position_loss(&model, &input_ids, target);

        let (logits, cache) = model.forward_with_cache(&input_ids).unwrap();
        let (_, d_last) = cross_entropy_with_grad(logits.row(2), target);
        let mut d_logits = Array2::zeros(logits.dim());
        d_logits.row_mut(2).assign(&d_last);
        let grads = model.backward(&cache, &d_logits).unwrap();

        for (mut param, grad) in model.params_and_grads(&grads) {
            param.zip_mut_with(&grad, |p, &g| *p -= 0.01 * g);
        }

        let loss_after = last_position_loss(&model, &input_ids, target);
        assert!(
            loss_after < loss_before,
            "loss should decrease: before={}, after={}",
            loss_before,
            loss_after
        );
    }

    #[test]
    fn test_backward_rejects_wrong_gradient_shape() {
        let model = small_model(8);
        let (_, cache) = model.forward_with_cache(&[0, 1]).unwrap();
        let result = model.backward(&cache, &Array2::zeros((3, 6)));
        assert!(matches!(result, Err(ModelError::ShapeMismatch(_))));
    }
}
