pub mod json;
pub mod table;

use crate::scan::AggregateResult;

/// Prints a scan result to stdout as a table or JSON.
pub fn print(result: &AggregateResult, cached: bool, json_output: bool) {
    if json_output {
        println!("{}", json::render(result));
    } else {
        print!("{}", table::render(result));
        print_scan_info(result, cached);
    }
}

fn print_scan_info(result: &AggregateResult, cached: bool) {
    let duration_sec = result.duration_ms as f64 / 1000.0;
    if cached {
        println!(
            "\nserved from cache (scanned {})",
            format_timestamp(result.scanned_at)
        );
    } else {
        println!("\nscan completed in {duration_sec:.2}s");
    }
}

pub fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
