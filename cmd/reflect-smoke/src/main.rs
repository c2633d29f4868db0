//! Host Reflection End-to-End Smoke Test
//!
//! Exercises the full bridge:
//!   Part A (Queue): framing, backpressure, wraparound on an mmap'd region
//!   Part B (Dispatcher): synchronous/asynchronous delivery, state machine
//!   Part C (File client): open/read/write/seek/remove against a temp dir
//!   Part D (Fault): unknown handler id faults the dispatcher
//!
//! Run: ./target/release/reflect-smoke
//! (REFLECT_LOG_LEVEL=debug for dispatcher chatter)

use std::path::PathBuf;
use std::time::{Duration, Instant};

use reflect_core::header::{Header, MessageType, ThreadId};
use reflect_core::message::{HandleRequest, HandlerId, ReadRequest, StatusReply};
use reflect_core::{Corruption, HostReflection, Message, Queue, ReflectError};
use reflect_file::{File, FileError};
use reflect_host::{region, BootUp, Bridge, BridgeConfig, DispatcherState};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reflect-smoke-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn wait_state(boot: &BootUp, want: DispatcherState) -> bool {
    let start = Instant::now();
    while boot.state() != want {
        if start.elapsed() > Duration::from_secs(2) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

// ════════════════════════════════════════════════════════════
// Part A: Queue
// ════════════════════════════════════════════════════════════

fn test_queue(t: &mut TestRunner) {
    t.section("Part A: Queue (mmap region)");

    let region = match region::allocate(Queue::region_len_for(1)) {
        Ok(r) => { t.pass("allocate shared region"); r }
        Err(e) => { t.fail("allocate shared region", &e.to_string()); return; }
    };
    let q = match Queue::format(region) {
        Ok(q) => { t.pass("format queue"); q }
        Err(e) => { t.fail("format queue", &e.to_string()); return; }
    };

    let cap = q.capacity();
    t.check("empty after format", q.is_empty() && !q.peek(), "not empty");

    let frame = vec![0x5Au8; cap / 2 + 1];
    t.check("push half+1", q.push(&frame), "push refused");
    t.check("second push is backpressure", !q.push(&frame), "push accepted");
    t.check("size == pushed", q.size() == frame.len(), &format!("size {}", q.size()));

    let mut out = vec![0u8; frame.len()];
    t.check("pull whole frame", q.pull(&mut out) && out == frame, "bad frame");

    // Drift the positions across the end of the ring.
    let mut ok = true;
    for round in 0..10u8 {
        let f = vec![round; cap / 3 + 5];
        let mut o = vec![0u8; f.len()];
        ok &= q.push(&f) && q.pull(&mut o) && o == f;
    }
    t.check("wraparound x10", ok, "corrupt after wrap");
    t.check("size <= capacity", q.size() <= q.capacity(), "over capacity");
}

// ════════════════════════════════════════════════════════════
// Part B: Dispatcher
// ════════════════════════════════════════════════════════════

fn test_dispatcher(t: &mut TestRunner) {
    t.section("Part B: Dispatcher (BootUp)");

    let region = match region::allocate(Queue::region_len_for(2)) {
        Ok(r) => r,
        Err(e) => { t.fail("allocate", &e.to_string()); return; }
    };
    let reflection = match Queue::format(region) {
        Ok(q) => HostReflection::new(q),
        Err(e) => { t.fail("format", &e.to_string()); return; }
    };

    let mut builder = BootUp::builder();
    let registered = builder
        .add_handler(HandlerId::DeleteFile, |m| match m {
            Message::Delete(h) => Some(Message::Status(StatusReply {
                handler: HandlerId::DeleteFile,
                status: h.handle as i32,
            })),
            _ => None,
        })
        .and_then(|b| b.add_handler(HandlerId::TeardownFile, |_m| None))
        .is_ok();
    t.check("register handlers", registered, "add_handler failed");
    t.check(
        "duplicate registration rejected",
        builder.add_handler(HandlerId::DeleteFile, |_m| None).is_err(),
        "accepted twice",
    );

    let mut boot = match builder.start(reflection.clone()) {
        Ok(b) => { t.pass("start dispatcher"); b }
        Err(e) => { t.fail("start dispatcher", &e.to_string()); return; }
    };

    let reply = reflection.send_synchronous(&Message::Delete(HandleRequest { handle: 42 }));
    t.check(
        "sync round trip",
        matches!(reply, Ok(Message::Status(StatusReply { status: 42, .. }))),
        &format!("{:?}", reply),
    );

    let sent = reflection.send_asynchronous(&Message::Teardown(HandleRequest { handle: 1 }));
    t.check("async send", sent.is_ok(), &format!("{:?}", sent));

    let no_reply = reflection.send_synchronous(&Message::Teardown(HandleRequest { handle: 1 }));
    t.check(
        "missing reply releases sender",
        no_reply == Err(ReflectError::UnexpectedReply(HandlerId::TeardownFile)),
        &format!("{:?}", no_reply),
    );

    let result = boot.shutdown();
    t.check("shutdown clean", result.is_ok(), &format!("{:?}", result));
    t.check("state Stopped", boot.state() == DispatcherState::Stopped, &format!("{:?}", boot.state()));
    t.check("3 frames dispatched", boot.dispatched() == 3, &format!("{}", boot.dispatched()));
}

// ════════════════════════════════════════════════════════════
// Part C: File client
// ════════════════════════════════════════════════════════════

fn test_files(t: &mut TestRunner) {
    t.section("Part C: File client");

    let dir = scratch_dir();
    let path = dir.join("notes.txt");
    t.check(
        "seed notes.txt",
        std::fs::write(&path, b"0123456789").is_ok(),
        "write failed",
    );

    let config = BridgeConfig::from_env().root(&dir).first_handle(7);
    let bridge = match Bridge::start(config) {
        Ok(b) => { t.pass("bridge start"); b }
        Err(e) => { t.fail("bridge start", &e.to_string()); return; }
    };
    let r = bridge.reflection();

    let mut f = match File::open(&r, "notes.txt") {
        Ok(f) => { t.pass("open notes.txt"); f }
        Err(e) => { t.fail("open notes.txt", &e.to_string()); return; }
    };
    t.check("handle 7", f.handle() == 7, &format!("{}", f.handle()));
    t.check("size 10", f.size() == 10, &format!("{}", f.size()));

    let mut buf = [0u8; 5];
    let n = f.read(&mut buf);
    t.check("read 5 -> 01234", matches!(n, Ok(5)) && &buf == b"01234", &format!("{:?}", n));
    t.check("tellg 5", f.tellg() == 5, &format!("{}", f.tellg()));

    f.seekp(10);
    let n = f.write(b"XYZ");
    t.check("write XYZ at 10", matches!(n, Ok(3)), &format!("{:?}", n));
    t.check("size 13", f.size() == 13, &format!("{}", f.size()));
    t.check("tellp 13", f.tellp() == 13, &format!("{}", f.tellp()));

    let removed = f.remove();
    t.check("remove", removed.is_ok(), &format!("{:?}", removed));
    t.check("file unlinked", !path.exists(), "still on disk");

    let stale = r.send_synchronous(&Message::Read(ReadRequest { handle: 7, size: 1, pointer: 0 }));
    let ebadf = nix::errno::Errno::EBADF as i32;
    t.check(
        "read after remove -> EBADF",
        matches!(&stale, Ok(Message::ReadReply(rr)) if rr.status == ebadf),
        &format!("{:?}", stale),
    );

    let missing = File::open(&r, "no/such/dir/x");
    t.check(
        "open missing dir -> ENOENT",
        matches!(missing, Err(FileError::Host(nix::errno::Errno::ENOENT))),
        &format!("{:?}", missing),
    );

    let result = bridge.shutdown();
    t.check("bridge shutdown", result.is_ok(), &format!("{:?}", result));
    let _ = std::fs::remove_dir_all(&dir);
}

// ════════════════════════════════════════════════════════════
// Part D: Fault
// ════════════════════════════════════════════════════════════

fn test_fault(t: &mut TestRunner) {
    t.section("Part D: Protocol corruption");

    let region = match region::allocate(Queue::region_len_for(1)) {
        Ok(r) => r,
        Err(e) => { t.fail("allocate", &e.to_string()); return; }
    };
    let reflection = match Queue::format(region) {
        Ok(q) => HostReflection::new(q),
        Err(e) => { t.fail("format", &e.to_string()); return; }
    };
    let mut boot = match BootUp::builder().start(reflection.clone()) {
        Ok(b) => b,
        Err(e) => { t.fail("start", &e.to_string()); return; }
    };

    let mut frame = Header {
        kind: MessageType::Asynchronous,
        thread_id: ThreadId::current(),
        handler: HandlerId::TeardownFile,
        payload_len: 4,
    }
    .encode()
    .to_vec();
    frame[8..12].copy_from_slice(&0xBADu32.to_le_bytes());
    frame.extend_from_slice(&[0; 4]);
    t.check("push corrupt frame", reflection.queue().push(&frame), "push refused");

    t.check("dispatcher Faulted", wait_state(&boot, DispatcherState::Faulted), &format!("{:?}", boot.state()));
    let result = boot.shutdown();
    t.check(
        "shutdown reports UnknownHandler",
        result == Err(ReflectError::Corruption(Corruption::UnknownHandler(0xBAD))),
        &format!("{:?}", result),
    );
}

fn main() {
    println!("=== Host Reflection Smoke Test ===");
    BridgeConfig::from_env().print();

    let mut t = TestRunner::new();

    test_queue(&mut t);
    test_dispatcher(&mut t);
    test_files(&mut t);
    test_fault(&mut t);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
