/// Decays a hyperparameter (learning rate, clip range) once per update cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cooler {
    /// Decay disabled, the value never changes.
    Constant(f32),
    Linear(LinearCooler),
}

impl Cooler {
    pub fn new(decay: bool, initial: f32, minimum: f32, max_step: usize) -> Self {
        if decay {
            Self::Linear(LinearCooler::new(initial, minimum, max_step))
        } else {
            Self::Constant(initial)
        }
    }

    /// Advances one update and returns the new value.
    pub fn cool(&mut self) -> f32 {
        match self {
            Self::Constant(value) => *value,
            Self::Linear(linear) => linear.cool(),
        }
    }

    pub fn current(&self) -> f32 {
        match self {
            Self::Constant(value) => *value,
            Self::Linear(linear) => linear.current(),
        }
    }
}

/// `initial - (initial - minimum) * i / max_step`, reaching `minimum` exactly at `i == max_step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCooler {
    initial: f32,
    minimum: f32,
    max_step: usize,
    current_step: usize,
}

impl LinearCooler {
    /// The floor is clamped into `[0, initial]`, so a decayed value can never become negative nor
    /// grow.
    pub fn new(initial: f32, minimum: f32, max_step: usize) -> Self {
        Self {
            initial,
            minimum: minimum.clamp(0., initial.max(0.)),
            max_step: max_step.max(1),
            current_step: 0,
        }
    }

    pub fn cool(&mut self) -> f32 {
        self.current_step = (self.current_step + 1).min(self.max_step);
        self.current()
    }

    pub fn current(&self) -> f32 {
        if self.current_step >= self.max_step {
            return self.minimum;
        }
        let progress = self.current_step as f32 / self.max_step as f32;
        self.initial - (self.initial - self.minimum) * progress
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_reaches_floor_monotonically() {
        let mut cooler = Cooler::new(true, 0.2, 0., 100);
        let mut last = cooler.current();
        assert_eq!(last, 0.2);
        for _ in 0..100 {
            let value = cooler.cool();
            assert!(value <= last);
            last = value;
        }
        assert_eq!(last, 0.);
        // stays at the floor afterwards
        assert_eq!(cooler.cool(), 0.);
    }

    #[test]
    fn linear_respects_configured_floor() {
        let mut cooler = Cooler::new(true, 1e-3, 1e-4, 10);
        let values: Vec<f32> = (0..10).map(|_| cooler.cool()).collect();
        assert_eq!(values[9], 1e-4);
        assert!(values.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn negative_floor_is_clamped() {
        let mut cooler = LinearCooler::new(0.1, -0.5, 4);
        for _ in 0..10 {
            assert!(cooler.cool() >= 0.);
        }
        assert_eq!(cooler.current(), 0.);
    }

    #[test]
    fn constant_is_identity() {
        let mut cooler = Cooler::new(false, 0.3, 0., 10);
        for _ in 0..20 {
            assert_eq!(cooler.cool(), 0.3);
        }
    }
}
