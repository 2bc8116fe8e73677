use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use pic_halo::prelude::*;

fn engine(cells: usize, patches: usize, ghost: usize) -> ExchangeEngine<NoComm> {
    let grid = GlobalGrid::try_from(GridConfig {
        dim: 2,
        cells: vec![cells, cells],
        cell_size: vec![1.0, 1.0],
        ghost_width: ghost,
        stencil_radius: 1,
        periodic: vec![true, true],
    })
    .expect("valid grid");
    let mapping = decompose(grid, patches, 1, PatchOrdering::Morton).expect("decomposition");
    let mut e = ExchangeEngine::new(NoComm, mapping).expect("engine");
    for patch in e.local_patches_mut() {
        for f in FieldId::ALL {
            patch.field_mut(f).fill(1.0);
        }
    }
    e
}

fn bench_halo(c: &mut Criterion) {
    let mut group = c.benchmark_group("halo");
    for &patches in &[4usize, 16, 64] {
        let mut e = engine(256, patches, 2);
        group.bench_with_input(BenchmarkId::new("sum", patches), &patches, |b, _| {
            b.iter(|| black_box(e.sum_exchange(&FieldId::DENSITIES).expect("sum")))
        });
        group.bench_with_input(BenchmarkId::new("copy", patches), &patches, |b, _| {
            b.iter(|| black_box(e.copy_exchange(&FieldId::ELECTROMAGNETIC).expect("copy")))
        });
    }
    group.finish();
}

fn bench_migration(c: &mut Criterion) {
    let mut e = engine(128, 16, 1);
    let mut id = 0;
    for patch in e.local_patches_mut() {
        let (lo, hi) = patch.owned_bounds();
        let batch: Vec<_> = (0..1000)
            .map(|k| {
                id += 1;
                let t = k as f64 / 1000.0;
                Particle::at([lo[0] + t * (hi[0] - lo[0]), lo[1] + (1.0 - t) * (hi[1] - lo[1]) * 0.999, 0.0], id)
            })
            .collect();
        patch.receive_particles(batch);
    }
    let mut shift = 0.75;
    c.bench_function("migrate 16k particles", |b| {
        b.iter(|| {
            for patch in e.local_patches_mut() {
                for p in patch.particles_mut() {
                    p.position[0] += shift;
                }
            }
            shift = -shift;
            black_box(e.migrate_particles().expect("migrate"))
        })
    });
}

criterion_group!(benches, bench_halo, bench_migration);
criterion_main!(benches);
