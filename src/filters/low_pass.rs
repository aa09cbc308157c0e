/// First-order low-pass: `out = α·x + (1−α)·prev`.
///
/// The first call seeds `prev` with its input, so there is no warm-up
/// transient from zero.
#[derive(Clone, Debug)]
pub struct LowPass {
    alpha: f64,
    last_output: Option<f64>,
}

impl LowPass {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, last_output: None }
    }

    pub fn apply(&mut self, input: f64) -> f64 {
        let output = match self.last_output {
            None => input,
            // prev + α(x − prev): exact fixed point under constant input
            Some(prev) => prev + self.alpha * (input - prev),
        };
        self.last_output = Some(output);
        output
    }

    pub fn reset(&mut self) {
        self.last_output = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.last_output.is_some()
    }
}
