use std::time::Duration;

use num_format::{CustomFormat, Grouping};

pub fn number_format() -> CustomFormat {
    CustomFormat::builder()
        .grouping(Grouping::Standard)
        .minus_sign("-")
        .separator("_")
        .build()
        .expect("static number format should be valid")
}

/// `h:mm:ss`
pub fn elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
