use std::hint::black_box;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tessera_ipc::{DEFAULT_CAPACITY, SharedSemaphore, TensorChannel};
use tessera_perf::*;
use tessera_tensor::Tensor;

const HANDOFF_STEPS: usize = 20_000;
const OBS_LEN: usize = 64;

fn main() {
    let rusage_start = capture_rusage();
    let mut results: Vec<BenchResult> = Vec::new();

    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  TESSERA CHANNEL REPORT");
    println!("  arena {} | same-thread micro + cross-thread hand-off", format_bytes(DEFAULT_CAPACITY as u64));
    println!("{bar}");

    section_channel(&mut results);
    section_semaphore(&mut results);
    section_handoff(&mut results);

    let rusage_end = capture_rusage();
    section_resources(&rusage_start, &rusage_end);

    save_results(&results, &rusage_start, &rusage_end);
}

// ═══════════════════════════════════════════════════════════════════════════
// Same-thread channel operations
// ═══════════════════════════════════════════════════════════════════════════

fn section_channel(results: &mut Vec<BenchResult>) {
    section_header("CHANNEL (send + receive, same thread)");
    print_table_header();

    let mut channel = TensorChannel::create(&temp_shm_name("report_rt"), DEFAULT_CAPACITY)
        .expect("failed to create channel");

    for &len in &[1usize, 64, 1024, 4096] {
        let values = make_observation(len);
        let r = measure_batched(&format!("round_trip_f32 x{len}"), 200, 100, 10, || {
            channel.send("obs", black_box(values.as_slice())).expect("send");
            black_box(channel.receive::<f32>("obs").expect("receive"));
        });
        print_result_row(&r);
        results.push(r);
    }

    let tensor = Tensor::from_f32(make_observation(OBS_LEN));
    let r = measure_batched("round_trip_tensor x64", 200, 100, 10, || {
        channel.send_tensor("obs", black_box(&tensor)).expect("send");
        black_box(channel.receive_tensor("obs").expect("receive"));
    });
    print_result_row(&r);
    results.push(r);

    let r = measure_batched("receive (absent)", 200, 100, 10, || {
        black_box(channel.receive::<i32>("missing").expect("receive"));
    });
    print_result_row(&r);
    results.push(r);
}

// ═══════════════════════════════════════════════════════════════════════════
// Semaphore
// ═══════════════════════════════════════════════════════════════════════════

fn section_semaphore(results: &mut Vec<BenchResult>) {
    section_header("SEMAPHORE (uncontended)");
    print_table_header();

    let sem = SharedSemaphore::create(&temp_shm_name("report_sem"), 0).expect("create");
    let r = measure_batched("post_then_wait", 200, 100, 10, || {
        sem.post().expect("post");
        sem.wait().expect("wait");
    });
    print_result_row(&r);
    results.push(r);
}

// ═══════════════════════════════════════════════════════════════════════════
// Cross-thread hand-off: the sim-host / learner step loop in one process
// ═══════════════════════════════════════════════════════════════════════════

fn section_handoff(results: &mut Vec<BenchResult>) {
    section_header("HAND-OFF (obs -> learner -> action, two threads)");
    print_table_header();

    let arena = temp_shm_name("report_arena");
    let ready_name = temp_shm_name("report_ready");
    let free_name = temp_shm_name("report_free");

    let mut host = TensorChannel::create(&arena, DEFAULT_CAPACITY).expect("create arena");
    let ready = SharedSemaphore::create(&ready_name, 0).expect("create ready");
    let free = SharedSemaphore::create(&free_name, 0).expect("create free");

    let learner = std::thread::spawn(move || {
        let mut channel = TensorChannel::attach(&arena).expect("attach arena");
        let ready = SharedSemaphore::attach(&ready_name).expect("attach ready");
        let free = SharedSemaphore::attach(&free_name).expect("attach free");
        while ready.wait_timeout(Duration::from_secs(2)).expect("wait") {
            let obs = channel
                .receive::<f32>("obs")
                .expect("receive")
                .expect("obs present");
            let action = if obs[0] > 0.0 { -1i32 } else { 1 };
            channel.send("action", &[action]).expect("send");
            free.post().expect("post");
        }
    });

    let obs = make_observation(OBS_LEN);
    let r = measure_each("step_round_trip", HANDOFF_STEPS, 1_000, || {
        let start = Instant::now();
        host.send("obs", obs.as_slice()).expect("send");
        ready.post().expect("post");
        free.wait().expect("wait");
        black_box(host.receive::<i32>("action").expect("receive"));
        start.elapsed().as_nanos() as u64
    });
    print_result_row(&r);
    results.push(r);

    learner.join().expect("learner thread panicked");
}

// ═══════════════════════════════════════════════════════════════════════════
// Resources + JSON
// ═══════════════════════════════════════════════════════════════════════════

fn section_resources(start: &ResourceSnapshot, end: &ResourceSnapshot) {
    section_header("RESOURCE USAGE");
    println!(
        "  Peak RSS:                    {}",
        format_bytes(end.max_rss_bytes as u64)
    );
    println!(
        "  Minor page faults:           {}",
        end.minor_faults.saturating_sub(start.minor_faults)
    );
    println!(
        "  Voluntary ctx switches:      {}",
        end.vol_ctx_switches.saturating_sub(start.vol_ctx_switches)
    );
    println!(
        "  Involuntary ctx switches:    {}",
        end.invol_ctx_switches.saturating_sub(start.invol_ctx_switches)
    );
}

fn save_results(results: &[BenchResult], rusage_start: &ResourceSnapshot, rusage_end: &ResourceSnapshot) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{timestamp}_report.json");

    let output = serde_json::json!({
        "report_type": "channel",
        "timestamp": timestamp,
        "arena_capacity": DEFAULT_CAPACITY,
        "benchmarks": results,
        "resources": {
            "start": rusage_start,
            "end": rusage_end,
        },
    });

    let bar = "\u{2550}".repeat(90);
    match serde_json::to_string_pretty(&output)
        .map_err(std::io::Error::other)
        .and_then(|body| std::fs::write(&json_path, body))
    {
        Ok(()) => {
            println!("\n{bar}");
            println!("  Results saved to: {json_path}");
            println!("{bar}\n");
        }
        Err(e) => eprintln!("  failed to save results: {e}"),
    }
}
