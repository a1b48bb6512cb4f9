use ltc::structs::event::WallClock;

pub fn time_str(sec: f64) -> String {
    let ms = sec * 1000f64;
    let hours = (ms / 3600000f64) as u64;
    let minutes = ((ms % 3600000f64) / 60000f64) as u64;
    let seconds = ((ms % 60000f64) / 1000f64) as u64;
    let milliseconds = (ms % 1000f64) as u64;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}

/// `YYYYmmdd-HHMMSS` in UTC, as used in window file names.
pub fn file_stamp(at: WallClock) -> String {
    at.to_utc()
        .map(|t| t.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| "00000000-000000".to_string())
}

#[test]
fn test_time_str() {
    assert_eq!(time_str(0.0), "00:00:00.000");
    assert_eq!(time_str(3725.25), "01:02:05.250");
    assert_eq!(time_str(360_000.0), "100:00:00.000");
}

#[test]
fn test_file_stamp() {
    // 2024-03-05 10:20:30 UTC
    assert_eq!(file_stamp(WallClock::new(1_709_634_030, 999)), "20240305-102030");
}
