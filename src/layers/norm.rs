use ndarray::{Array1, Array2, Axis};

use super::{check_width, Forward};
use crate::error::{ModelError, Result};
use crate::optim::ParamPair;

const LAYER_NORM_EPS: f32 = 1e-5;

/// Layer Normalization（トークンごとにチャネル方向で正規化）
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub(crate) gamma: Array1<f32>,
    pub(crate) beta: Array1<f32>,
    eps: f32,
}

#[derive(Debug, Clone)]
pub struct LayerNormGradients {
    pub(crate) d_gamma: Array1<f32>,
    pub(crate) d_beta: Array1<f32>,
}

impl LayerNormGradients {
    pub fn zeros(dim: usize) -> Self {
        Self {
            d_gamma: Array1::zeros(dim),
            d_beta: Array1::zeros(dim),
        }
    }
}

/// 逆伝播用の中間値
#[derive(Debug, Clone)]
pub struct LayerNormCache {
    normalized: Array2<f32>,
    stds: Array1<f32>,
}

impl LayerNorm {
    /// gamma=1, beta=0 で初期化
    pub fn new(dim: usize) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps: LAYER_NORM_EPS,
        }
    }

    pub fn from_parts(gamma: Array1<f32>, beta: Array1<f32>) -> Result<Self> {
        if gamma.len() != beta.len() {
            return Err(ModelError::ShapeMismatch(format!(
                "layer norm gamma has length {}, beta has {}",
                gamma.len(),
                beta.len()
            )));
        }
        Ok(Self {
            gamma,
            beta,
            eps: LAYER_NORM_EPS,
        })
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    /// 正規化し、逆伝播に必要な値も返す
    pub(crate) fn forward_with_cache(&self, x: &Array2<f32>) -> (Array2<f32>, LayerNormCache) {
        let (seq_len, hidden_size) = x.dim();
        let mut normalized = Array2::zeros((seq_len, hidden_size));
        let mut stds = Array1::zeros(seq_len);

        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let mean = row.sum() / hidden_size as f32;
            let var = row.mapv(|v| (v - mean).powi(2)).sum() / hidden_size as f32;
            let std = (var + self.eps).sqrt();
            stds[i] = std;
            let normalized_row = row.mapv(|v| (v - mean) / std);
            normalized.row_mut(i).assign(&normalized_row);
        }

        let output = &normalized * &self.gamma + &self.beta;
        (output, LayerNormCache { normalized, stds })
    }

    /// d_x = (d_norm - mean(d_norm) - x̂ * mean(d_norm * x̂)) / std
    pub(crate) fn backward(
        &self,
        d_out: &Array2<f32>,
        cache: &LayerNormCache,
        grads: &mut LayerNormGradients,
    ) -> Array2<f32> {
        let n = self.dim() as f32;

        grads.d_beta += &d_out.sum_axis(Axis(0));
        grads.d_gamma += &(d_out * &cache.normalized).sum_axis(Axis(0));

        let d_normalized = d_out * &self.gamma;
        let mut d_x = Array2::zeros(d_out.dim());

        for (i, d_norm) in d_normalized.axis_iter(Axis(0)).enumerate() {
            let x_hat = cache.normalized.row(i);
            let mean_d_norm = d_norm.sum() / n;
            let mean_d_norm_x_hat = d_norm.dot(&x_hat) / n;
            let std = cache.stds[i];

            let row = (&d_norm - mean_d_norm - &(&x_hat * mean_d_norm_x_hat)) / std;
            d_x.row_mut(i).assign(&row);
        }

        d_x
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a LayerNormGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        out.push((
            self.gamma.view_mut().into_dyn(),
            grads.d_gamma.view().into_dyn(),
        ));
        out.push((
            self.beta.view_mut().into_dyn(),
            grads.d_beta.view().into_dyn(),
        ));
    }
}

impl Forward for LayerNorm {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.dim(), "layer norm input")?;
        Ok(self.forward_with_cache(x).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_rows_are_normalized() {
        let norm = LayerNorm::new(8);
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array2::from_shape_fn((3, 8), |_| rng.gen_range(-5.0..5.0));
        let y = norm.forward(&x).unwrap();

        for row in y.axis_iter(Axis(0)) {
            let mean = row.sum() / 8.0;
            let var = row.mapv(|v| (v - mean).powi(2)).sum() / 8.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_gamma_beta_mismatch() {
        let result = LayerNorm::from_parts(Array1::ones(4), Array1::zeros(3));
        assert!(result.is_err());
    }

    #[test]
    fn test_layer_norm_backward_numerical() {
        let hidden_size = 4;
        let seq_len = 2;
        let h = 1e-2;

        let mut rng = StdRng::seed_from_u64(11);
        let norm = LayerNorm::from_parts(
            Array1::from_shape_fn(hidden_size, |_| rng.gen_range(0.5..1.5)),
            Array1::from_shape_fn(hidden_size, |_| rng.gen_range(-0.5..0.5)),
        )
        .unwrap();
        let x = Array2::from_shape_fn((seq_len, hidden_size), |_| rng.gen_range(-1.0..1.0));
        let d_out = Array2::from_shape_fn((seq_len, hidden_size), |_| rng.gen_range(-1.0..1.0));

        // スカラー関数: sum(d_out * output)
        let loss = |norm: &LayerNorm, x: &Array2<f32>| (norm.forward(x).unwrap() * &d_out).sum();

        let (_, cache) = norm.forward_with_cache(&x);
        let mut grads = LayerNormGradients::zeros(hidden_size);
        let d_x = norm.backward(&d_out, &cache, &mut grads);

        for j in 0..hidden_size {
            let mut plus = norm.clone();
            let mut minus = norm.clone();
            plus.gamma[j] += h;
            minus.gamma[j] -= h;
            let numerical = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * h);
            assert!(
                (grads.d_gamma[j] - numerical).abs() < 1e-2,
                "d_gamma mismatch at j={}: analytical={}, numerical={}",
                j,
                grads.d_gamma[j],
                numerical
            );

            let mut plus = norm.clone();
            let mut minus = norm.clone();
            plus.beta[j] += h;
            minus.beta[j] -= h;
            let numerical = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * h);
            assert!((grads.d_beta[j] - numerical).abs() < 1e-2);
        }

        for i in 0..seq_len {
            for j in 0..hidden_size {
                let mut plus = x.clone();
                let mut minus = x.clone();
                plus[[i, j]] += h;
                minus[[i, j]] -= h;
                let numerical = (loss(&norm, &plus) - loss(&norm, &minus)) / (2.0 * h);
                assert!(
                    (d_x[[i, j]] - numerical).abs() < 2e-2,
                    "d_x mismatch at [{},{}]: analytical={}, numerical={}",
                    i,
                    j,
                    d_x[[i, j]],
                    numerical
                );
            }
        }
    }
}
