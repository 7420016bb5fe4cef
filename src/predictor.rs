// 学習済みモデルによる次単語予測（貪欲法）

use crate::error::{ModelError, Result};
use crate::math::argmax;
use crate::model::SequenceModel;
use crate::tokenizer::Vocabulary;

/// 次トークン予測器。サンプリングは行わず常に最大ロジットを選ぶ
pub struct Predictor<'a> {
    model: &'a SequenceModel,
    vocab: &'a Vocabulary,
}

impl<'a> Predictor<'a> {
    /// 語彙サイズとモデルの出力次元が一致しない場合はエラー
    pub fn new(model: &'a SequenceModel, vocab: &'a Vocabulary) -> Result<Self> {
        if vocab.len() != model.vocab_size() {
            return Err(ModelError::ShapeMismatch(format!(
                "vocabulary has {} entries, model outputs {} logits",
                vocab.len(),
                model.vocab_size()
            )));
        }
        Ok(Self { model, vocab })
    }

    /// 最後の位置のロジットが最大のID（同値なら小さいID）
    pub fn predict_next_id(&self, input_ids: &[usize]) -> Result<usize> {
        let logits = self.model.last_logits(input_ids)?;
        argmax(logits.view()).ok_or(ModelError::NonFiniteLogits)
    }

    /// テキストの続きの1単語を予測
    pub fn predict_next_word(&self, prefix: &str) -> Result<String> {
        let input_ids = self.vocab.encode(prefix);
        let next_id = self.predict_next_id(&input_ids)?;
        self.word(next_id)
    }

    /// 予測したIDを入力に追加しながら最大 `max_new_tokens` 単語を生成
    ///
    /// 文脈が位置エンコーディングの長さに達したら打ち切る。
    pub fn generate(&self, prefix: &str, max_new_tokens: usize) -> Result<Vec<String>> {
        let mut tokens = self.vocab.encode(prefix);
        if tokens.is_empty() {
            return Err(ModelError::EmptySequence);
        }

        let mut generated = Vec::with_capacity(max_new_tokens);
        for _ in 0..max_new_tokens {
            if tokens.len() >= self.model.max_seq_len() {
                break;
            }
            let next_id = self.predict_next_id(&tokens)?;
            tokens.push(next_id);
            generated.push(self.word(next_id)?);
        }

        Ok(generated)
    }

    fn word(&self, id: usize) -> Result<String> {
        self.vocab
            .word_of(id)
            .map(str::to_string)
            .ok_or(ModelError::TokenOutOfRange {
                id,
                vocab_size: self.vocab.len(),
            })
    }
}
