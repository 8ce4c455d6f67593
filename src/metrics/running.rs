//! Online statistics.
//!
//! Welford updates keep mean and variance numerically stable without storing
//! the values.

/// Weighted running mean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningMean {
    mean: f64,
    total_weight: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` with weight 1.
    pub fn update(&mut self, value: f64) {
        self.update_weighted(value, 1.0);
    }

    /// Non-positive weights are counted but do not move the mean.
    pub fn update_weighted(&mut self, value: f64, weight: f64) {
        self.count += 1;
        if weight <= 0.0 {
            return;
        }
        self.total_weight += weight;
        self.mean += (value - self.mean) * weight / self.total_weight;
    }

    /// `None` until some positive weight was seen.
    pub fn mean(&self) -> Option<f64> {
        (self.total_weight > 0.0).then_some(self.mean)
    }

    /// Sum of weights seen so far.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Running mean and standard deviation (Welford).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStd {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningStd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Adds every value of `values`.
    pub fn update_batch<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for value in values {
            self.update(value);
        }
    }

    /// 0 before the first update.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
