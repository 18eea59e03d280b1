use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current time as fractional unix seconds
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

// Generate an opaque request id: 8 lowercase hex characters
pub fn generate_request_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}
