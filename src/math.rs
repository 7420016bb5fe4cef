// 数値計算の小さなヘルパー群

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Softmax（最大値を引いて数値的に安定化）
pub fn softmax(x: ArrayView1<f32>) -> Array1<f32> {
    let max_val = x.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_vals = x.mapv(|v| (v - max_val).exp());
    let sum_exp = exp_vals.sum();
    exp_vals / sum_exp
}

/// 行ごとのSoftmax
pub fn softmax_rows(x: &Array2<f32>) -> Array2<f32> {
    let mut output = Array2::zeros(x.dim());
    for (i, row) in x.axis_iter(Axis(0)).enumerate() {
        output.row_mut(i).assign(&softmax(row));
    }
    output
}

/// log-softmax。交差エントロピーで使う
pub fn log_softmax(x: ArrayView1<f32>) -> Array1<f32> {
    let max_val = x.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum_exp = x.mapv(|v| (v - max_val).exp()).sum().ln() + max_val;
    x.mapv(|v| v - log_sum_exp)
}

/// 交差エントロピー損失とロジットに対する勾配（probs - one_hot）
pub fn cross_entropy_with_grad(logits: ArrayView1<f32>, target: usize) -> (f32, Array1<f32>) {
    let loss = -log_softmax(logits)[target];
    let mut d_logits = softmax(logits);
    d_logits[target] -= 1.0;
    (loss, d_logits)
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

pub fn relu_derivative(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// 最大値のインデックス。同値なら小さいIDを優先
///
/// NaNは比較対象から外す。すべてNaN（または空）なら `None`。
pub fn argmax(x: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in x.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax() {
        let logits = array![1.0, 2.0, 3.0];
        let probs = softmax(logits.view());

        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1]);
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_large_values_stable() {
        let logits = array![1000.0, 1000.0];
        let probs = softmax(logits.view());
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let logits = array![0.3, -1.2, 2.5, 0.0];
        let probs = softmax(logits.view());
        let log_probs = log_softmax(logits.view());
        for (p, lp) in probs.iter().zip(log_probs.iter()) {
            assert!((p.ln() - lp).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cross_entropy_gradient_numerical() {
        let logits = array![1.0, 2.0, 3.0, 0.5];
        let target = 2;
        let h = 1e-3;

        let (_, analytical) = cross_entropy_with_grad(logits.view(), target);

        for i in 0..logits.len() {
            let mut plus = logits.clone();
            let mut minus = logits.clone();
            plus[i] += h;
            minus[i] -= h;

            let loss_plus = cross_entropy_with_grad(plus.view(), target).0;
            let loss_minus = cross_entropy_with_grad(minus.view(), target).0;
            let numerical = (loss_plus - loss_minus) / (2.0 * h);

            assert!(
                (analytical[i] - numerical).abs() < 1e-2,
                "cross entropy grad mismatch at i={}: analytical={}, numerical={}",
                i,
                analytical[i],
                numerical
            );
        }
    }

    #[test]
    fn test_argmax_ties_pick_lowest_id() {
        assert_eq!(argmax(array![0.5, 2.0, 2.0, 1.0].view()), Some(1));
        assert_eq!(argmax(array![3.0, 3.0].view()), Some(0));
        assert_eq!(argmax(Array1::<f32>::zeros(0).view()), None);
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax(array![f32::NAN, 0.5, 2.0].view()), Some(2));
        assert_eq!(argmax(array![1.0, f32::NAN, 0.5].view()), Some(0));
        assert_eq!(argmax(array![f32::NAN, f32::NAN].view()), None);
        assert_eq!(argmax(array![f32::NEG_INFINITY, f32::NAN].view()), Some(0));
    }

    #[test]
    fn test_relu() {
        assert_eq!(relu(-1.0), 0.0);
        assert_eq!(relu(2.5), 2.5);
        assert_eq!(relu_derivative(-0.1), 0.0);
        assert_eq!(relu_derivative(0.1), 1.0);
    }
}
