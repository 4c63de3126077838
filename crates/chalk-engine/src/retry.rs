pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const CREATIVE_TEMPERATURE: f64 = 0.7;
pub const DETERMINISTIC_TEMPERATURE: f64 = 0.1;

/// Attempt budget and sampling-temperature schedule for markup generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    schedule: Vec<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            vec![CREATIVE_TEMPERATURE, DETERMINISTIC_TEMPERATURE],
        )
    }
}

impl RetryPolicy {
    /// `schedule[i]` is the temperature for attempt `i`; attempts past the end
    /// reuse the last value.
    pub fn new(max_attempts: u32, schedule: Vec<f64>) -> Self {
        let schedule = if schedule.is_empty() {
            vec![CREATIVE_TEMPERATURE]
        } else {
            schedule
                .into_iter()
                .map(|value| value.clamp(0.0, 2.0))
                .collect()
        };
        Self {
            max_attempts: max_attempts.max(1),
            schedule,
        }
    }

    pub fn single_attempt() -> Self {
        Self::new(1, vec![CREATIVE_TEMPERATURE])
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn temperature_for(&self, attempt: u32) -> f64 {
        let idx = (attempt as usize).min(self.schedule.len() - 1);
        self.schedule[idx]
    }

    pub fn attempts(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        (0..self.max_attempts).map(|attempt| (attempt, self.temperature_for(attempt)))
    }
}
