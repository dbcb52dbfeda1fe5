// fusillade-cli: Run report rendering

use fusillade_engine::RunReport;

/// Plain-text summary printed after a run
pub fn print_text(run: &RunReport) {
    let stats = &run.stats;

    println!();
    println!("=== Run Summary ===");
    println!("requests:   {}", stats.total);
    println!("successes:  {}", stats.successes);
    println!("failures:   {}", stats.failures);
    println!("duration:   {:.2} s", run.elapsed_s);
    println!("throughput: {:.1} req/s", stats.rps);
    println!(
        "bytes:      {} in / {} out",
        stats.bytes_in, stats.bytes_out
    );
    println!();
    println!("latency (ms):");
    println!(
        "  min {:.2}  mean {:.2}  max {:.2}",
        stats.latency.min_ms, stats.latency.mean_ms, stats.latency.max_ms
    );
    println!(
        "  p50 {:.2}  p90 {:.2}  p95 {:.2}  p99 {:.2}",
        stats.latency.p50_ms, stats.latency.p90_ms, stats.latency.p95_ms, stats.latency.p99_ms
    );

    if stats.endpoints.len() > 1 {
        println!();
        println!("endpoints:");
        for (name, endpoint) in &stats.endpoints {
            println!(
                "  {:<20} total {:<8} failures {:<6} p95 {:.2} ms",
                name, endpoint.total, endpoint.failures, endpoint.latency.p95_ms
            );
        }
    }

    for (protocol, buckets) in &stats.status {
        println!();
        println!("status ({}):", protocol);
        for (bucket, count) in buckets {
            println!("  {:<20} {}", bucket, count);
        }
    }

    for (protocol, counters) in &stats.custom {
        println!();
        println!("counters ({}):", protocol);
        for (name, value) in counters {
            println!("  {:<24} {}", name, value);
        }
    }

    if !run.verdicts.is_empty() {
        println!();
        println!("thresholds:");
        for verdict in &run.verdicts {
            let mark = if verdict.passed { "PASS" } else { "FAIL" };
            println!(
                "  [{}] {:<40} actual {:.4}",
                mark,
                verdict.threshold.trim(),
                verdict.actual
            );
        }
        println!(
            "overall: {}",
            if run.thresholds_passed { "PASS" } else { "FAIL" }
        );
    }
}

/// Machine-readable report: the final snapshot plus verdicts
pub fn print_json(run: &RunReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(run)?);
    Ok(())
}
