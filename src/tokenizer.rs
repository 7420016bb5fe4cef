// 空白区切りのシンプルなトークナイザー

use std::collections::HashMap;

/// 未知語トークン
pub const UNK_TOKEN: &str = "<UNK>";

/// 単語とIDの対応表（構築後は不変）
#[derive(Debug, Clone)]
pub struct Vocabulary {
    vocab: HashMap<String, usize>,
    id_to_token: Vec<String>,
    unk_token_id: usize,
}

impl Vocabulary {
    /// 単語リストから語彙を作成（リスト順にIDを振り、最後に<UNK>を追加）
    pub fn from_words(words: &[&str]) -> Self {
        let mut vocab = HashMap::new();
        let mut id_to_token = Vec::new();

        for &word in words {
            if word == UNK_TOKEN || vocab.contains_key(word) {
                continue;
            }
            vocab.insert(word.to_string(), id_to_token.len());
            id_to_token.push(word.to_string());
        }

        let unk_token_id = id_to_token.len();
        vocab.insert(UNK_TOKEN.to_string(), unk_token_id);
        id_to_token.push(UNK_TOKEN.to_string());

        Self {
            vocab,
            id_to_token,
            unk_token_id,
        }
    }

    /// テキスト群から語彙を作成（出現順）
    pub fn from_texts(texts: &[&str]) -> Self {
        let words: Vec<&str> = texts
            .iter()
            .flat_map(|text| text.split_whitespace())
            .collect();
        Self::from_words(&words)
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.split_whitespace()
            .map(|token| self.id_of(token))
            .collect()
    }

    pub fn decode(&self, tokens: &[usize]) -> String {
        tokens
            .iter()
            .filter_map(|&id| self.word_of(id))
            .collect::<Vec<&str>>()
            .join(" ")
    }

    /// 単語のID。語彙にない場合は<UNK>のID
    pub fn id_of(&self, word: &str) -> usize {
        *self.vocab.get(word).unwrap_or(&self.unk_token_id)
    }

    pub fn word_of(&self, id: usize) -> Option<&str> {
        self.id_to_token.get(id).map(|s| s.as_str())
    }

    pub fn unk_id(&self) -> usize {
        self.unk_token_id
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }
}
