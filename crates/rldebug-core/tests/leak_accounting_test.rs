use rldebug_core::{
    BlockHandle, Debugger, FatalAction, LogEmitter, LogFormat, Settings, Severity, SharedBuffer,
    SourceLocation,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn debugger(format: LogFormat) -> (Debugger, SharedBuffer) {
    let settings = Settings {
        severity: Severity::Quiet,
        fatal_action: FatalAction::Panic,
        allow_process_exit: false,
        log_format: format,
    };
    let (log, buffer) = LogEmitter::to_buffer("leaks", format);
    (Debugger::with_log(settings, log), buffer)
}

const SITE: SourceLocation = SourceLocation::new("client.c", 40);

#[test]
fn balanced_sequences_leave_nothing_behind() {
    for seed in [11_u64, 12, 13] {
        let (mut dbg, buffer) = debugger(LogFormat::Text);
        let mut rng = XorShift64::new(seed);
        let mut live: Vec<BlockHandle> = Vec::new();

        for step in 0..600 {
            let op = rng.gen_range_usize(0, 99);
            if op < 45 || live.is_empty() {
                let size = rng.gen_range_usize(0, 256);
                let handle = match op % 3 {
                    0 => dbg.malloc(size, SITE),
                    1 => dbg.calloc(size, 2, SITE),
                    _ => dbg.strndup(Some(b"sequence text".as_slice()), size, SITE),
                };
                live.push(handle.unwrap_or_else(|| panic!("seed={seed} step={step}: acquire")));
            } else if op < 75 {
                let idx = rng.gen_range_usize(0, live.len() - 1);
                let handle = live.swap_remove(idx);
                dbg.free(Some(handle), SITE);
            } else {
                let idx = rng.gen_range_usize(0, live.len() - 1);
                let size = rng.gen_range_usize(1, 300);
                let resized = dbg
                    .realloc(Some(live[idx]), size, SITE)
                    .unwrap_or_else(|| panic!("seed={seed} step={step}: realloc"));
                live[idx] = resized;
                assert_eq!(dbg.block_size(resized), Some(size));
            }

            let expected: usize = live.iter().filter_map(|&h| dbg.block_size(h)).sum();
            assert_eq!(dbg.leak_size(), expected, "seed={seed} step={step}");
            assert_eq!(dbg.current_heap_size(), expected, "seed={seed} step={step}");
        }

        for handle in live.drain(..) {
            dbg.free(Some(handle), SITE);
        }
        assert_eq!(dbg.summarize(false), 0, "seed={seed}");
        assert_eq!(dbg.leak_size(), 0);
        assert!(buffer.contents().is_empty(), "clean summary prints nothing");
        let metrics = dbg.metrics();
        assert_eq!(metrics.outstanding(), 0, "seed={seed}: {metrics:?}");
    }
}

#[test]
fn unreleased_blocks_are_listed_and_totalled() {
    let (mut dbg, buffer) = debugger(LogFormat::Text);
    let sizes = [7_usize, 64, 1, 300];
    for (i, &size) in sizes.iter().enumerate() {
        let at = SourceLocation::new("leaky.c", 10 + i as u32);
        assert!(dbg.malloc(size, at).is_some());
    }

    assert_eq!(dbg.leak_size(), sizes.iter().sum::<usize>());
    let report = dbg.leak_report();
    assert_eq!(report.blocks.len(), sizes.len());
    assert!(report.streams.is_empty());
    for (i, block) in report.blocks.iter().enumerate() {
        assert_eq!(block.index, i + 1);
        assert_eq!(block.size, sizes[i]);
        assert_eq!(block.line, 10 + i as u32);
        assert_eq!(block.produced_by, "malloc");
    }

    assert_eq!(dbg.summarize(false), sizes.len());
    let text = buffer.contents();
    assert!(text.contains("Memory leaks:"));
    assert!(text.contains("Unreleased memory blocks: 4"));
    assert!(text.contains("Total leaked memory: 372 byte(s)"));
    assert!(text.contains("leaky.c"));
}

#[test]
fn summary_prints_regardless_of_threshold() {
    let (mut dbg, buffer) = debugger(LogFormat::Text);
    dbg.set_reported_severity(Severity::Quiet);
    let _ = dbg.malloc(3, SITE);
    assert_eq!(dbg.summarize(false), 1);
    assert!(buffer.contents().contains("Total leaked memory: 3 byte(s)"));
}

#[test]
fn forced_summary_of_clean_run_prints_all_clear() {
    let (mut dbg, buffer) = debugger(LogFormat::Text);
    let h = dbg.malloc(10, SITE);
    dbg.free(h, SITE);
    assert_eq!(dbg.summarize(true), 0);
    let text = buffer.contents();
    assert!(text.contains("no leaks"));
    assert!(text.contains("No heap corruption detected."));
}

#[test]
fn peak_survives_release() {
    let (mut dbg, _) = debugger(LogFormat::Text);
    let a = dbg.malloc(100, SITE);
    let b = dbg.malloc(50, SITE);
    dbg.free(a, SITE);
    dbg.free(b, SITE);
    assert_eq!(dbg.current_heap_size(), 0);
    assert_eq!(dbg.peak_heap_size(), 150);
    assert_eq!(dbg.leak_report().peak_heap_size, 150);
}

#[test]
fn block_size_of_unknown_handle_is_none() {
    let (mut dbg, _) = debugger(LogFormat::Text);
    let h = dbg.malloc(12, SITE).expect("malloc");
    assert_eq!(dbg.block_size(h), Some(12));
    dbg.free(Some(h), SITE);
    assert_eq!(dbg.block_size(h), None);
}

#[test]
fn jsonl_summary_carries_the_listing() {
    let (mut dbg, buffer) = debugger(LogFormat::Jsonl);
    let _ = dbg.calloc(4, 8, SourceLocation::new("json.c", 5));
    assert_eq!(dbg.summarize(false), 1);

    let lines = buffer.lines();
    assert_eq!(lines.len(), 1, "only the summary is printed under Quiet");
    let value: serde_json::Value = serde_json::from_str(&lines[0]).expect("valid json");
    assert_eq!(value["event"], "leak_summary");
    assert_eq!(value["level"], "warning");
    assert_eq!(value["size"], 32);
    let blocks = value["details"]["blocks"].as_array().expect("blocks");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["produced_by"], "calloc");
    assert_eq!(blocks[0]["file"], "json.c");
}

#[test]
fn long_runs_keep_a_bounded_history() {
    use rldebug_core::structured_log::DEFAULT_HISTORY_CAPACITY;

    let (mut dbg, buffer) = debugger(LogFormat::Text);
    let site = SourceLocation::new("loop.c", 2);
    for _ in 0..10_000 {
        let h = dbg.malloc(16, site);
        dbg.free(h, site);
    }
    assert_eq!(dbg.log().history().len(), DEFAULT_HISTORY_CAPACITY);
    assert_eq!(
        dbg.log().evicted(),
        20_000 - DEFAULT_HISTORY_CAPACITY as u64
    );
    assert_eq!(
        dbg.log().history().last().map(|e| e.trace_id.as_str()),
        Some("leaks::20000")
    );
    assert!(buffer.contents().is_empty());
    assert_eq!(dbg.summarize(false), 0);
}
