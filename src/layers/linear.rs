// 全結合層 y = x·W + b

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use super::{check_width, Forward};
use crate::error::{ModelError, Result};
use crate::optim::ParamPair;

/// 全結合層。weightは (入力次元, 出力次元)
#[derive(Debug, Clone)]
pub struct Linear {
    pub(crate) weight: Array2<f32>,
    pub(crate) bias: Array1<f32>,
}

/// Linearの勾配
#[derive(Debug, Clone)]
pub struct LinearGradients {
    pub(crate) d_weight: Array2<f32>,
    pub(crate) d_bias: Array1<f32>,
}

impl LinearGradients {
    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            d_weight: Array2::zeros((in_dim, out_dim)),
            d_bias: Array1::zeros(out_dim),
        }
    }
}

impl Linear {
    /// 一様分布 U(-1/√in, 1/√in) で初期化
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let bound = (1.0 / in_dim as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-bound..bound)),
            bias: Array1::from_shape_fn(out_dim, |_| rng.gen_range(-bound..bound)),
        }
    }

    /// 既存の重みから作成。biasの長さが出力次元と一致しない場合はエラー
    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() == 0 || weight.ncols() == 0 {
            return Err(ModelError::InvalidConfig(
                "linear layer with zero dimension".to_string(),
            ));
        }
        if bias.len() != weight.ncols() {
            return Err(ModelError::ShapeMismatch(format!(
                "linear bias has length {}, weight has {} outputs",
                bias.len(),
                weight.ncols()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    pub(crate) fn apply(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight) + &self.bias
    }

    /// 逆伝播。勾配を累積し、入力に対する勾配を返す
    pub(crate) fn backward(
        &self,
        d_out: &Array2<f32>,
        input: &Array2<f32>,
        grads: &mut LinearGradients,
    ) -> Array2<f32> {
        grads.d_weight += &input.t().dot(d_out);
        grads.d_bias += &d_out.sum_axis(Axis(0));
        d_out.dot(&self.weight.t())
    }

    pub(crate) fn params_and_grads<'a>(
        &'a mut self,
        grads: &'a LinearGradients,
        out: &mut Vec<ParamPair<'a>>,
    ) {
        out.push((
            self.weight.view_mut().into_dyn(),
            grads.d_weight.view().into_dyn(),
        ));
        out.push((
            self.bias.view_mut().into_dyn(),
            grads.d_bias.view().into_dyn(),
        ));
    }
}

impl Forward for Linear {
    fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        check_width(x, self.in_dim(), "linear input")?;
        Ok(self.apply(x))
    }
}
