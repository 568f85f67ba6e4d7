//! Incident store overview for `blip stats`.
//!
//! Shows how many incidents are stored, how many the refresh pass still
//! tracks, and a per-district breakdown. Handy for checking that the cron
//! trigger is actually landing writes.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::{IncidentStore, SqliteIncidentStore};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteIncidentStore::new(pool.clone());
    let counts = store.counts().await?;

    let last_write: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM incidents")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("blip incident store");
    println!();
    println!("  database:   {}", config.db.path.display());
    println!("  size:       {}", format_bytes(db_size));
    println!(
        "  last write: {}",
        last_write
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  total:      {}", counts.total);
    println!("  active:     {}", counts.active);
    println!("  inactive:   {}", counts.inactive);

    if !counts.by_district.is_empty() {
        println!();
        println!("  {:<32} {:>6} {:>7}", "DISTRICT", "TOTAL", "ACTIVE");
        println!("  {}", "-".repeat(47));
        for d in &counts.by_district {
            println!("  {:<32} {:>6} {:>7}", d.district, d.total, d.active);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date for anything older than a
/// month or in the future.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    match delta {
        d if d < 0 => format_ts_short(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_short(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 3 * 3600 - 5), "3 hours ago");
        assert_eq!(format_ts_relative(now - 86400 - 5), "1 day ago");
    }
}
