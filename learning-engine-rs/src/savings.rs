// learning-engine-rs/src/savings.rs
// Cost savings estimation for neural-to-symbolic conversions.

/// Estimates what converting a task to fixed code saves.
#[derive(Debug, Clone)]
pub struct CostSavingsCalculator {
    pub neural_cost_per_execution: f64,
    pub symbolic_cost_per_execution: f64,
    pub executions_per_day: u64,
}

impl CostSavingsCalculator {
    /// Daily savings from the conversion; never negative.
    pub fn daily_savings(&self) -> f64 {
        let neural = self.neural_cost_per_execution * self.executions_per_day as f64;
        let symbolic = self.symbolic_cost_per_execution * self.executions_per_day as f64;
        (neural - symbolic).max(0.0)
    }

    /// Projected monthly savings (30 days).
    pub fn projected_monthly_savings(&self) -> f64 {
        self.daily_savings() * 30.0
    }
}
