//! Stress test - many producer threads through one bridge
//!
//! Every thread owns a file, writes a run of self-describing records,
//! reads them back and checks them, while a second group floods the queue
//! with asynchronous teardowns of unknown handles. Per-thread results are
//! collected through a lock-free `ArrayQueue`.
//!
//! Usage: reflect-stress [threads] [records-per-thread]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use reflect_core::message::HandleRequest;
use reflect_core::{HostReflection, Message};
use reflect_file::File;
use reflect_host::{Bridge, BridgeConfig};

const RECORD: usize = 16;

struct Sample {
    thread: usize,
    records: usize,
    bytes: usize,
    slowest: Duration,
    error: Option<String>,
}

fn record(thread: usize, seq: usize) -> [u8; RECORD] {
    let mut r = [0u8; RECORD];
    r[..8].copy_from_slice(&(thread as u64).to_le_bytes());
    r[8..].copy_from_slice(&(seq as u64).to_le_bytes());
    r
}

fn run_file_worker(reflection: HostReflection, id: usize, records: usize) -> Sample {
    let mut sample = Sample { thread: id, records: 0, bytes: 0, slowest: Duration::ZERO, error: None };
    let name = format!("stress-{}", id);

    let result = (|| -> reflect_file::Result<()> {
        let mut f = File::open(&reflection, &name)?;
        for seq in 0..records {
            let start = Instant::now();
            f.write(&record(id, seq))?;
            sample.slowest = sample.slowest.max(start.elapsed());
        }

        let mut back = vec![0u8; records * RECORD];
        let n = f.read(&mut back)?;
        sample.bytes = n;
        for (seq, chunk) in back[..n].chunks(RECORD).enumerate() {
            if chunk != record(id, seq) {
                sample.error = Some(format!("record {} corrupt", seq));
                break;
            }
            sample.records += 1;
        }
        f.remove()
    })();

    if let Err(e) = result {
        sample.error = Some(e.to_string());
    }
    sample
}

fn main() {
    println!("=== Host Reflection Stress Test ===\n");

    let threads: usize = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(32);
    let records: usize = std::env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(500);

    let dir = std::env::temp_dir().join(format!("reflect-stress-{}", std::process::id()));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("FATAL: cannot create {}: {}", dir.display(), e);
        std::process::exit(1);
    }

    let config = BridgeConfig::from_env().root(&dir);
    println!(
        "threads: {}  records/thread: {}  queue frames: {}",
        threads, records, config.queue_frames
    );
    let bridge = match Bridge::start(config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("FATAL: bridge start failed: {}", e);
            std::process::exit(1);
        }
    };

    let samples = Arc::new(ArrayQueue::new(threads.max(1)));
    let start = Instant::now();

    let workers: Vec<_> = (0..threads)
        .map(|id| {
            let r = bridge.reflection();
            let samples = Arc::clone(&samples);
            thread::spawn(move || {
                let s = run_file_worker(r, id, records);
                // Capacity equals the worker count.
                let _ = samples.push(s);
            })
        })
        .collect();

    // Asynchronous noise: teardowns of handles nobody owns.
    let flooders: Vec<_> = (0..4)
        .map(|_| {
            let r = bridge.reflection();
            thread::spawn(move || {
                let mut sent = 0usize;
                for h in 0..records {
                    let msg = Message::Teardown(HandleRequest { handle: 1_000_000 + h as u32 });
                    if r.send_asynchronous(&msg).is_ok() {
                        sent += 1;
                    }
                }
                sent
            })
        })
        .collect();

    for w in workers {
        if w.join().is_err() {
            eprintln!("worker panicked");
        }
    }
    let flooded: usize = flooders.into_iter().filter_map(|f| f.join().ok()).sum();
    let elapsed = start.elapsed();

    let mut failed = 0;
    let mut total_records = 0;
    let mut total_bytes = 0;
    let mut slowest = Duration::ZERO;
    while let Some(s) = samples.pop() {
        total_records += s.records;
        total_bytes += s.bytes;
        slowest = slowest.max(s.slowest);
        if let Some(err) = s.error {
            failed += 1;
            println!("  thread {:3}: FAIL {}", s.thread, err);
        }
    }

    let dispatched = bridge.dispatched();
    let shutdown = bridge.shutdown();
    let _ = std::fs::remove_dir_all(&dir);

    println!("\nElapsed:         {:?}", elapsed);
    println!("Frames:          {}", dispatched);
    println!("Frames/sec:      {:.0}", dispatched as f64 / elapsed.as_secs_f64());
    println!("Records checked: {}/{}", total_records, threads * records);
    println!("Bytes read back: {}", total_bytes);
    println!("Async flood:     {}", flooded);
    println!("Slowest write:   {:?}", slowest);
    println!("Dispatcher:      {:?}", shutdown);

    let ok = failed == 0 && total_records == threads * records && shutdown.is_ok();
    println!("\n{}", if ok { "PASS" } else { "FAIL" });
    std::process::exit(if ok { 0 } else { 1 });
}
