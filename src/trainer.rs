// Teacher forcingによる次トークン予測の学習ループ

use ndarray::Array2;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::error::{ModelError, Result};
use crate::math::cross_entropy_with_grad;
use crate::model::SequenceModel;
use crate::optim::{Adam, Optimizer};

/// 学習結果（エポックごとの平均損失）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub epoch_losses: Vec<f32>,
    /// 1エポックあたりの学習例（プレフィックス）の数
    pub examples_per_epoch: usize,
}

impl TrainingReport {
    pub fn first_loss(&self) -> Option<f32> {
        self.epoch_losses.first().copied()
    }

    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

/// 学習器。学習中はモデルへの唯一の可変参照を保持する
pub struct Trainer<'m, O: Optimizer> {
    model: &'m mut SequenceModel,
    optimizer: O,
    config: TrainingConfig,
}

impl<'m> Trainer<'m, Adam> {
    /// 設定の学習率でAdamを使う学習器を作成
    pub fn new(model: &'m mut SequenceModel, config: TrainingConfig) -> Result<Self> {
        let optimizer = Adam::new(config.learning_rate);
        Self::with_optimizer(model, optimizer, config)
    }
}

impl<'m, O: Optimizer> Trainer<'m, O> {
    /// 任意のオプティマイザで学習器を作成
    ///
    /// オプティマイザの学習率は設定の学習率と一致していなければならない。
    pub fn with_optimizer(
        model: &'m mut SequenceModel,
        optimizer: O,
        config: TrainingConfig,
    ) -> Result<Self> {
        config.validate()?;
        if optimizer.learning_rate() != config.learning_rate {
            return Err(ModelError::InvalidConfig(format!(
                "optimizer learning rate {} does not match configured {}",
                optimizer.learning_rate(),
                config.learning_rate
            )));
        }
        Ok(Self {
            model,
            optimizer,
            config,
        })
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// 1つのプレフィックスで1回パラメータを更新し、その損失を返す
    pub fn train_step(&mut self, prefix: &[usize], target: usize) -> Result<f32> {
        let vocab_size = self.model.vocab_size();
        if target >= vocab_size {
            return Err(ModelError::TokenOutOfRange {
                id: target,
                vocab_size,
            });
        }

        let (logits, cache) = self.model.forward_with_cache(prefix)?;
        let last = logits.nrows() - 1;

        // 損失は最後の位置のみ
        let (loss, d_last) = cross_entropy_with_grad(logits.row(last), target);
        let mut d_logits = Array2::zeros(logits.dim());
        d_logits.row_mut(last).assign(&d_last);

        let grads = self.model.backward(&cache, &d_logits)?;
        self.optimizer.step(self.model.params_and_grads(&grads));

        Ok(loss)
    }

    /// 全系列の全プレフィックスを文書順に1回ずつ学習し、平均損失を返す
    ///
    /// 長さ2未満の系列は学習例を生まないので何もしない。
    pub fn train_epoch(&mut self, sequences: &[Vec<usize>]) -> Result<f32> {
        let mut total_loss = 0.0;
        let mut count = 0;

        for sequence in sequences {
            for i in 1..sequence.len() {
                total_loss += self.train_step(&sequence[..i], sequence[i])?;
                count += 1;
            }
        }

        if count > 0 {
            Ok(total_loss / count as f32)
        } else {
            Ok(0.0)
        }
    }

    /// 設定されたエポック数だけ学習する
    pub fn train(&mut self, sequences: &[Vec<usize>]) -> Result<TrainingReport> {
        let examples_per_epoch = sequences
            .iter()
            .map(|s| s.len().saturating_sub(1))
            .sum::<usize>();
        debug!(
            epochs = self.config.epochs,
            sequences = sequences.len(),
            examples_per_epoch,
            learning_rate = self.optimizer.learning_rate(),
            "training started"
        );

        let mut report = TrainingReport {
            epoch_losses: Vec::with_capacity(self.config.epochs),
            examples_per_epoch,
        };

        for epoch in 0..self.config.epochs {
            let loss = self.train_epoch(sequences)?;
            report.epoch_losses.push(loss);

            let interval = self.config.report_interval;
            if examples_per_epoch > 0 && interval > 0 && epoch % interval == 0 {
                info!("Epoch {}: loss = {:.4}", epoch, loss);
            }
        }

        Ok(report)
    }
}
