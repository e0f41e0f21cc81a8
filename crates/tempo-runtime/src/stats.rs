//! Exponentially-weighted running average
//!
//! Tracks the average distance between a timer's insertion and its deadline.
//! The sharded list uses it to size the window of "imminent" timers kept in
//! each shard's heap; everything further out stays in the overflow list.
//!
//! Samples accumulate into a batch; `update_average` folds the batch into
//! the running aggregate. The regress weight pulls the estimate back toward
//! the initial value when batches are small, and the persistence factor
//! bounds how much history survives each fold. Keep the three-parameter
//! form: collapsing it to a single smoothing constant makes the heap/list
//! split oscillate under steady load.

#[derive(Debug, Clone)]
pub struct TimeAveragedStats {
    init_avg: f64,
    regress_weight: f64,
    persistence_factor: f64,

    batch_total_value: f64,
    batch_num_samples: f64,
    aggregate_total_weight: f64,
    aggregate_weighted_avg: f64,
}

impl TimeAveragedStats {
    pub fn new(init_avg: f64, regress_weight: f64, persistence_factor: f64) -> Self {
        Self {
            init_avg,
            regress_weight,
            persistence_factor,
            batch_total_value: 0.0,
            batch_num_samples: 0.0,
            aggregate_total_weight: 0.0,
            aggregate_weighted_avg: init_avg,
        }
    }

    pub fn add_sample(&mut self, value: f64) {
        self.batch_total_value += value;
        self.batch_num_samples += 1.0;
    }

    /// Fold the pending batch into the aggregate and return the new average.
    pub fn update_average(&mut self) -> f64 {
        let mut weighted_sum = self.batch_total_value + self.init_avg * self.regress_weight;
        let mut total_weight = self.batch_num_samples + self.regress_weight;
        if self.persistence_factor > 0.0 {
            let prev_sample_weight = self.persistence_factor * self.aggregate_total_weight;
            weighted_sum += prev_sample_weight * self.aggregate_weighted_avg;
            total_weight += prev_sample_weight;
        }
        self.aggregate_weighted_avg = weighted_sum / total_weight;
        self.aggregate_total_weight = total_weight;
        self.batch_num_samples = 0.0;
        self.batch_total_value = 0.0;
        self.aggregate_weighted_avg
    }

    pub fn average(&self) -> f64 {
        self.aggregate_weighted_avg
    }
}
