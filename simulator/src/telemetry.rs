use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reading as a device sends it; the gateway stamps id and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub battery: f64,
}

impl Reading {
    pub fn random(rng: &mut impl Rng, device_id: String) -> Self {
        let temperature = if rng.gen_bool(0.05) {
            rng.gen_range(-50.0..100.0) // 5% outliers
        } else {
            rng.gen_range(15.0..35.0)
        };

        let humidity = if rng.gen_bool(0.05) {
            rng.gen_range(1.0..100.0)
        } else {
            rng.gen_range(30.0..80.0)
        };

        let battery = if rng.gen_bool(0.02) {
            rng.gen_range(0.0..20.0) // 2% low battery
        } else {
            rng.gen_range(20.0..100.0)
        };

        Self {
            device_id,
            temperature,
            humidity,
            battery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_reading_has_required_fields() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let reading = Reading::random(&mut rng, "dev-1".to_string());
            let value = serde_json::to_value(&reading).unwrap();
            assert!(value["temperature"].is_f64());
            assert_ne!(value["humidity"].as_f64(), Some(0.0));
            assert_eq!(value["device_id"], "dev-1");
        }
    }
}
