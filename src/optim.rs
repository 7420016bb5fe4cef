// パラメータ更新（オプティマイザ）
//
// モデルは `(パラメータ, 勾配)` の組を常に同じ順序で列挙する。
// オプティマイザはその順序をスロット番号として内部状態を保持する。

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

/// 更新対象のパラメータと対応する勾配
pub type ParamPair<'a> = (ArrayViewMutD<'a, f32>, ArrayViewD<'a, f32>);

/// 勾配ベースのパラメータ更新
pub trait Optimizer {
    /// 全パラメータを1ステップ更新する
    fn step(&mut self, params: Vec<ParamPair<'_>>);

    fn learning_rate(&self) -> f32;
}

/// 重み減衰付きSGD
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f32,
    pub weight_decay: f32,
}

impl Sgd {
    pub fn new(lr: f32, weight_decay: f32) -> Self {
        Self { lr, weight_decay }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: Vec<ParamPair<'_>>) {
        let lr = self.lr;
        let weight_decay = self.weight_decay;
        for (mut param, grad) in params {
            param.zip_mut_with(&grad, |p, &g| {
                *p -= lr * (g + weight_decay * *p);
            });
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adam（バイアス補正あり）
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: i32,
    // スロットごとの (一次モーメント, 二次モーメント)
    moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self::with_betas(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            moments: Vec::new(),
        }
    }

    /// これまでに実行したステップ数
    pub fn steps(&self) -> i32 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<ParamPair<'_>>) {
        self.t += 1;
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        for (slot, (mut param, grad)) in params.into_iter().enumerate() {
            if slot >= self.moments.len() {
                let zeros = ArrayD::zeros(param.raw_dim());
                self.moments.push((zeros.clone(), zeros));
            }
            let (m, v) = &mut self.moments[slot];
            if m.shape() != param.shape() {
                *m = ArrayD::zeros(param.raw_dim());
                *v = ArrayD::zeros(param.raw_dim());
            }

            Zip::from(&mut param)
                .and(&grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}
