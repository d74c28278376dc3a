use crate::numeric::{Accumulator, OutputElement};

/// Elementwise activation applied between the linear combination and the
/// output conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    /// `max(x, threshold)`; threshold 0 is the plain ReLU.
    ReluThreshold(f32),
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Identity
    }
}

/// Host-side epilogue parameters.
///
/// Scalars may be given by value or by reference; references are read once
/// when the parameters are resolved, so a host can retarget the scaling
/// factors between launches without rebuilding the parameter block.
#[derive(Debug, Clone, Copy)]
pub struct EpilogueParams<'a> {
    alpha: f32,
    beta: f32,
    gamma: f32,
    alpha_ref: Option<&'a f32>,
    beta_ref: Option<&'a f32>,
    gamma_ref: Option<&'a f32>,
    activation: Activation,
}

impl<'a> EpilogueParams<'a> {
    /// By-value scalars: D = activation(alpha * acc + beta * bias + gamma * residual).
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        EpilogueParams {
            alpha,
            beta,
            gamma,
            alpha_ref: None,
            beta_ref: None,
            gamma_ref: None,
            activation: Activation::Identity,
        }
    }

    /// Plain scaling of the accumulator, no bias or residual.
    pub fn scale(alpha: f32) -> Self {
        Self::new(alpha, 0.0, 0.0)
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// By-reference scalars; these win over the by-value fields at resolve
    /// time.
    pub fn with_scalar_refs(
        mut self,
        alpha: Option<&'a f32>,
        beta: Option<&'a f32>,
        gamma: Option<&'a f32>,
    ) -> Self {
        self.alpha_ref = alpha;
        self.beta_ref = beta;
        self.gamma_ref = gamma;
        self
    }

    /// Snapshots the scalars into the form the store loop consumes.
    pub fn resolve(&self) -> Epilogue {
        Epilogue {
            alpha: self.alpha_ref.copied().unwrap_or(self.alpha),
            beta: self.beta_ref.copied().unwrap_or(self.beta),
            gamma: self.gamma_ref.copied().unwrap_or(self.gamma),
            activation: self.activation,
        }
    }
}

/// Resolved epilogue: scale, bias-add, residual-add, activation, then the
/// rounding and saturating conversion of the output element type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epilogue {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
    pub activation: Activation,
}

impl Epilogue {
    /// Whether the residual operand is read at all. A zero gamma skips the
    /// load entirely, so callers may pass no residual tensor.
    pub fn is_source_needed(&self) -> bool {
        self.gamma != 0.0
    }

    /// Whether the per-channel bias is read.
    pub fn is_bias_needed(&self) -> bool {
        self.beta != 0.0
    }

    /// One output element. `bias` and `residual` must be zero when the
    /// corresponding term is disabled; they are multiplied by a zero scalar
    /// either way, so the value only matters for NaN hygiene.
    #[inline]
    pub fn apply<A, D>(&self, acc: A, bias: f32, residual: f32) -> D
    where
        A: Accumulator,
        D: OutputElement,
    {
        let mut x = self.alpha * acc.into_compute() + self.beta * bias + self.gamma * residual;
        x = match self.activation {
            Activation::Identity => x,
            Activation::ReluThreshold(t) => x.max(t),
        };
        D::from_compute(x)
    }
}
