use anyhow::Result;
use comfy_table::{Cell, Table};
use flora_suballoc::suballoc::{
    Allocation, AllocationRequest, AllocationStrategy, BlockPool, DebugDesc, HostMemoryBackend,
    PoolDesc, Statistics, SuballocationKind,
};
use flora_suballoc::util::{measure, BENCH};
use rand::Rng;
use std::sync::Arc;
use std::thread;

const WORKER_COUNT: usize = 4;
const OPS_PER_WORKER: usize = 20_000;
const HEAP_CAPACITY: u64 = 256 * 1024 * 1024;

fn random_request(rng: &mut impl Rng) -> AllocationRequest {
    let kind = SuballocationKind::ALL[rng.random_range(1..SuballocationKind::ALL.len())];
    let size = match rng.random_range(0..10) {
        0 => rng.random_range(1..64),
        1..=7 => rng.random_range(64..64 * 1024),
        _ => rng.random_range(64 * 1024..4 * 1024 * 1024),
    };
    let alignment = 1u64 << rng.random_range(0..12u32);
    let request = AllocationRequest::new(size, alignment, kind);
    match rng.random_range(0..8) {
        0 => request.with_strategy(AllocationStrategy::MinTime),
        1 => request.with_strategy(AllocationStrategy::MinOffset),
        _ => request,
    }
}

fn run_worker(pool: &BlockPool<HostMemoryBackend>) -> Result<Vec<Allocation>> {
    let mut rng = rand::rng();
    let mut live: Vec<Allocation> = Vec::new();

    for _ in 0..OPS_PER_WORKER {
        if live.is_empty() || rng.random_bool(0.52) {
            let request = random_request(&mut rng);
            match measure("allocate", request.size, || pool.allocate(&request)) {
                Ok(a) => live.push(a),
                Err(e) if e.is_recoverable() => {
                    // heap is full, make some room
                    for _ in 0..live.len().min(8) {
                        let victim = live.swap_remove(rng.random_range(0..live.len()));
                        let size = victim.size();
                        measure("free", size, || pool.free(victim))?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            let victim = live.swap_remove(rng.random_range(0..live.len()));
            let size = victim.size();
            measure("free", size, || pool.free(victim))?;
        }
    }
    Ok(live)
}

fn statistics_table(stats: &Statistics) -> Table {
    let mut table = Table::new();
    table.set_header(vec![Cell::new("Pool"), Cell::new("Value")]);
    let rows: [(&str, String); 8] = [
        ("Blocks", stats.block_count.to_string()),
        ("Block bytes", stats.block_bytes.to_string()),
        ("Allocations", stats.allocation_count.to_string()),
        ("Allocated bytes", stats.allocation_bytes.to_string()),
        ("Unused ranges", stats.unused_range_count.to_string()),
        ("Unused bytes", stats.unused_bytes.to_string()),
        ("Largest unused range", stats.unused_range_size_max.to_string()),
        ("Fragmentation", format!("{:.3}", stats.fragmentation())),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table
}

pub fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let desc = PoolDesc {
        block_size: 32 * 1024 * 1024,
        buffer_image_granularity: 1024,
        debug: DebugDesc {
            margin: 16,
            corruption_detection: cfg!(debug_assertions),
            ..Default::default()
        },
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(
        desc,
        HostMemoryBackend::with_capacity(HEAP_CAPACITY),
    )?);

    let workers: Vec<_> = (0..WORKER_COUNT)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || run_worker(&pool))
        })
        .collect();

    let mut live = Vec::new();
    for worker in workers {
        let survivors = worker
            .join()
            .map_err(|_| anyhow::anyhow!("workload thread panicked"))??;
        live.extend(survivors);
    }

    pool.validate()?;
    if pool.desc().debug.corruption_detection {
        pool.check_corruption()?;
    }
    log::info!(
        "{} allocations alive after {} operations",
        live.len(),
        WORKER_COUNT * OPS_PER_WORKER
    );
    log::info!("\n{}", statistics_table(&pool.statistics()));

    for a in live {
        let size = a.size();
        measure("free", size, || pool.free(a))?;
    }
    pool.validate()?;

    match BENCH.lock() {
        Ok(bench) => bench.summary(),
        Err(_) => log::warn!("Timing data unavailable"),
    }
    Ok(())
}
