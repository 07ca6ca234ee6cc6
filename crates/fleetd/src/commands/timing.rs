use std::time::Duration;

use fleet_core::JobKind;
use fleetgrid_controller::BatchTiming;

pub fn print(grow_ms: u64, extract_ms: u64, harden_ms: u64) -> anyhow::Result<()> {
    let timing = BatchTiming::compute(
        Duration::from_millis(grow_ms),
        Duration::from_millis(extract_ms),
        Duration::from_millis(harden_ms),
    );
    println!("{}", serde_json::to_string_pretty(&report(&timing))?);
    Ok(())
}

/// Millisecond view of a batch plan, jobs listed in landing order.
pub fn report(timing: &BatchTiming) -> serde_json::Value {
    let ms = |d: Duration| d.as_millis() as u64;
    let jobs: Vec<serde_json::Value> = timing
        .landing_order()
        .into_iter()
        .map(|kind: JobKind| {
            serde_json::json!({
                "kind": kind.as_str(),
                "duration_ms": ms(timing.duration(kind)),
                "delay_ms": ms(timing.delay(kind)),
                "completes_at_ms": ms(timing.completion(kind)),
            })
        })
        .collect();

    serde_json::json!({
        "batch_ms": ms(timing.batch),
        "jobs": jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_landing_order() {
        let timing = BatchTiming::compute(
            Duration::from_millis(3000),
            Duration::from_millis(4000),
            Duration::from_millis(5000),
        );
        let json = report(&timing);

        assert_eq!(json["batch_ms"], 5000);
        let kinds: Vec<&str> = json["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["grow", "extract", "harden"]);
        assert_eq!(json["jobs"][0]["delay_ms"], 2000);
        assert_eq!(json["jobs"][1]["delay_ms"], 1001);
        assert_eq!(json["jobs"][2]["completes_at_ms"], 5002);
    }
}
