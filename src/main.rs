use anyhow::{Context, Result};
use simple_llm::{ModelConfig, Predictor, SequenceModel, Trainer, TrainingConfig, Vocabulary};
use std::env;
use tracing_subscriber::EnvFilter;

/// 学習用のトイコーパス
const CORPUS: [&str; 2] = ["hello world how are you", "how are you hello world"];

/// 予測に使うプレフィックス
const PROMPT: &str = "hello world how";

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== SimpleLLM (Rust) ===\n");

    // コマンドライン引数からエポック数を取得
    let args: Vec<String> = env::args().collect();
    let epochs = match args.get(1) {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("エポック数が不正です: {}", arg))?,
        None => 100,
    };

    let vocab = Vocabulary::from_texts(&CORPUS);
    let sequences: Vec<Vec<usize>> = CORPUS.iter().map(|text| vocab.encode(text)).collect();

    let model_config = ModelConfig::new(vocab.len(), 16, 32, 2);
    let mut model = SequenceModel::new(model_config.clone())
        .context("モデルの初期化に失敗しました")?;

    println!("モデル設定:");
    println!("  - 語彙サイズ: {}", model_config.vocab_size);
    println!("  - 埋め込み次元: {}", model_config.embedding_dim);
    println!("  - FFN隠れ層: {}", model_config.hidden_dim);
    println!("  - レイヤー数: {}", model_config.num_layers);
    println!("  - パラメータ数: {}", model.num_parameters());
    println!();

    let training_config = TrainingConfig {
        epochs,
        ..TrainingConfig::default()
    };
    let report = {
        let mut trainer = Trainer::new(&mut model, training_config)?;
        trainer.train(&sequences)?
    };
    if let Some(loss) = report.final_loss() {
        println!("\nトレーニング完了！ 最終損失 = {:.4}", loss);
    }

    let predictor = Predictor::new(&model, &vocab)?;
    let next_word = predictor.predict_next_word(PROMPT)?;
    println!("Input: {}", PROMPT);
    println!("Predicted next word: {}", next_word);

    Ok(())
}
