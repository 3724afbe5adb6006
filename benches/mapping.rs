//! Benchmarks for the mapping table using Divan.
//!
//! Run with: `cargo bench --bench mapping`

use divan::{Bencher, black_box};

use bwtree::mapping::MappingTable;
use bwtree::node::NodeHeader;

fn main() {
    divan::main();
}

fn fake_head(addr: usize) -> *mut NodeHeader<u64> {
    std::ptr::without_provenance_mut(addr)
}

// =============================================================================
// Allocation
// =============================================================================

#[divan::bench_group]
mod allocate {
    use super::{Bencher, MappingTable, black_box, fake_head};

    #[divan::bench(args = [64, 1024, 65536])]
    fn fill(bencher: Bencher, capacity: usize) {
        bencher
            .with_inputs(|| MappingTable::<u64>::new(capacity))
            .bench_local_values(|table| {
                for addr in 1..=capacity {
                    black_box(table.allocate(fake_head(addr)));
                }
            });
    }
}

// =============================================================================
// Head access
// =============================================================================

#[divan::bench_group]
mod access {
    use super::{Bencher, MappingTable, black_box, fake_head};

    fn filled(capacity: usize) -> MappingTable<u64> {
        let table: MappingTable<u64> = MappingTable::new(capacity);
        for addr in 1..=capacity {
            table.allocate(fake_head(addr));
        }
        table
    }

    #[divan::bench]
    fn load(bencher: Bencher) {
        let table = filled(1024);
        bencher.bench_local(|| black_box(table.load(black_box(512))));
    }

    #[divan::bench]
    fn cas_uncontended(bencher: Bencher) {
        let table = filled(1024);
        bencher.bench_local(|| {
            let head = table.load(512);
            black_box(table.cas(512, head, head.wrapping_byte_add(1))).ok();
        });
    }

    #[divan::bench]
    fn cas_failing(bencher: Bencher) {
        let table = filled(1024);
        bencher.bench_local(|| {
            // Expectation is always stale by construction.
            black_box(table.cas(512, fake_head(usize::MAX), fake_head(1))).ok();
        });
    }
}
