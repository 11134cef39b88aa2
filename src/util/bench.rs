use comfy_table::{Cell, Table};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Process wide timing sink shared by the workload threads of the demo.
pub static BENCH: Lazy<Mutex<Bench>> = Lazy::new(|| Mutex::new(Bench::new()));

#[derive(Debug)]
struct OpStat {
    count: u32,
    failures: u32,
    bytes: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl OpStat {
    fn new() -> Self {
        OpStat {
            count: 0,
            failures: 0,
            bytes: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }

    fn record(&mut self, d: Duration, bytes: u64, ok: bool) {
        self.count += 1;
        self.total += d;
        self.min = self.min.min(d);
        self.max = self.max.max(d);
        if ok {
            self.bytes += bytes;
        } else {
            self.failures += 1;
        }
    }

    fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count
        }
    }
}

/// Per-operation latency book keeping for allocator workloads.
pub struct Bench {
    // first recorded op comes first in the summary
    stats: IndexMap<&'static str, OpStat>,
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

impl Bench {
    pub fn new() -> Self {
        Bench {
            stats: IndexMap::new(),
        }
    }

    /// Record one sample of operation `op` that took `d` and touched `bytes`.
    pub fn record(&mut self, op: &'static str, d: Duration, bytes: u64, ok: bool) {
        self.stats
            .entry(op)
            .or_insert_with(OpStat::new)
            .record(d, bytes, ok);
    }

    pub fn count(&self, op: &str) -> u32 {
        self.stats.get(op).map_or(0, |s| s.count)
    }

    pub fn failures(&self, op: &str) -> u32 {
        self.stats.get(op).map_or(0, |s| s.failures)
    }

    /// Builds a table of count / failures / bytes / avg / min / max per op.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec![
            Cell::new("Op"),
            Cell::new("Count"),
            Cell::new("Failed"),
            Cell::new("Bytes"),
            Cell::new("Avg"),
            Cell::new("Min"),
            Cell::new("Max"),
        ]);

        for (&op, st) in &self.stats {
            let min = if st.count == 0 { Duration::ZERO } else { st.min };
            table.add_row(vec![
                Cell::new(op),
                Cell::new(st.count),
                Cell::new(st.failures),
                Cell::new(st.bytes),
                Cell::new(format!("{:?}", st.avg())),
                Cell::new(format!("{:?}", min)),
                Cell::new(format!("{:?}", st.max)),
            ]);
        }
        table
    }

    /// Emits the summary table at info level.
    pub fn summary(&self) {
        log::info!("\n{}", self.table());
    }
}

/// Runs `f` and records its duration under `op` in the global [`BENCH`].
///
/// `bytes` is only accounted when `f` returns `Ok`.
pub fn measure<T, E>(op: &'static str, bytes: u64, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    let start = Instant::now();
    let res = f();
    let elapsed = start.elapsed();
    if let Ok(mut bench) = BENCH.lock() {
        bench.record(op, elapsed, bytes, res.is_ok());
    }
    res
}
