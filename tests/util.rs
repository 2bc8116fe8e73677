#![allow(dead_code)]
use pic_halo::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Grid with unit cells.
pub fn grid(cells: &[usize], ghost: usize, periodic: &[bool]) -> GlobalGrid {
    GlobalGrid::try_from(GridConfig {
        dim: cells.len(),
        cells: cells.to_vec(),
        cell_size: vec![1.0; cells.len()],
        ghost_width: ghost,
        stencil_radius: 1,
        periodic: periodic.to_vec(),
    })
    .unwrap()
}

/// Single-rank engine over `grid` split into `hint` patches.
pub fn single_rank(grid: GlobalGrid, hint: usize) -> ExchangeEngine<NoComm> {
    let mapping = decompose(grid, hint, 1, PatchOrdering::Lexicographic).unwrap();
    ExchangeEngine::new(NoComm, mapping).unwrap()
}

/// Run `f` on `n` in-process ranks, one thread each; results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = ThreadComm::group(n)
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Local cell ranges of a field's owned interior, `[g, n+g)` on active axes.
pub fn interior(layout: &FieldLayout, patch_cells: [usize; 3]) -> [std::ops::Range<usize>; 3] {
    let g = layout.ghost();
    [0, 1, 2].map(|a| {
        if g[a] == 0 {
            0..layout.extents()[a]
        } else {
            g[a]..g[a] + patch_cells[a]
        }
    })
}

/// Global index of a local cell, wrapped into `[0, cells)` (periodic grids).
pub fn wrapped_global(
    patch: &Patch,
    layout: &FieldLayout,
    cells: [usize; 3],
    local: [usize; 3],
) -> [usize; 3] {
    let g = layout.ghost();
    let off = patch.region().cell_offset;
    [0, 1, 2].map(|a| {
        let x = (off[a] + local[a]) as isize - g[a] as isize;
        x.rem_euclid(cells[a] as isize) as usize
    })
}

/// Deterministic deposits for one patch: dyadic values so every sum is exact.
pub fn deposit_pattern(patch: &mut Patch, count: usize) {
    let mut rng = SmallRng::seed_from_u64(0xD0 + patch.id().get() as u64);
    for field in FieldId::DENSITIES {
        let extents = patch.field(field).layout().extents();
        for _ in 0..count {
            let cell = extents.map(|e| rng.gen_range(0..e));
            let value = rng.gen_range(-64..=64) as f64 / 8.0;
            patch.deposit(field, cell, value).unwrap();
        }
    }
}

/// Fill E/B interiors with values derived from the patch id and cell.
pub fn fill_fields(patch: &mut Patch) {
    let cells = patch.region().cells;
    let tag = patch.id().get() as f64;
    for field in FieldId::ELECTROMAGNETIC {
        let layout = *patch.field(field).layout();
        let [ri, rj, rk] = interior(&layout, cells);
        for i in ri.clone() {
            for j in rj.clone() {
                for k in rk.clone() {
                    let v = tag * 1e6 + (i * 10_000 + j * 100 + k) as f64 + field as u8 as f64 / 16.0;
                    patch.field_mut(field).set([i, j, k], v).unwrap();
                }
            }
        }
    }
}

/// Particles spread over the owned region of a patch, on a 1/64 lattice.
pub fn seed_particles(patch: &mut Patch, count: usize) {
    let mut rng = SmallRng::seed_from_u64(0xA0 + patch.id().get() as u64);
    let (lo, hi) = patch.owned_bounds();
    let dim = patch.dim();
    let base = patch.id().get() as u64 * 10_000;
    let batch: Vec<Particle> = (0..count)
        .map(|k| {
            let mut pos = [0.0; 3];
            for a in 0..dim {
                let steps = ((hi[a] - lo[a]) * 64.0) as u64;
                pos[a] = lo[a] + rng.gen_range(0..steps) as f64 / 64.0;
            }
            Particle::at(pos, base + k as u64 + 1)
        })
        .collect();
    patch.receive_particles(batch);
}

/// Move every particle by less than one patch width (1/64 lattice steps).
///
/// The displacement depends only on the particle id and `seed`, not on the
/// order particles are stored in.
pub fn push_particles(patch: &mut Patch, width: [f64; 3], seed: u64) {
    let dim = patch.dim();
    for p in patch.particles_mut() {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9).wrapping_add(p.id));
        for a in 0..dim {
            let reach = (width[a] * 64.0) as i64 - 1;
            p.position[a] += rng.gen_range(-reach..=reach) as f64 / 64.0;
        }
    }
}

/// Bit-level snapshot of one patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchSnapshot {
    pub fields: Vec<Vec<u64>>,
    pub particles: Vec<(u64, [u64; 3])>,
}

pub fn snapshot<C: Communicator>(engine: &ExchangeEngine<C>) -> BTreeMap<PatchId, PatchSnapshot> {
    engine
        .local_patches()
        .map(|p| {
            let fields = FieldId::ALL
                .iter()
                .map(|&f| p.field(f).as_slice().iter().map(|v| v.to_bits()).collect())
                .collect();
            let mut particles: Vec<_> = p
                .particles()
                .iter()
                .map(|q| (q.id, q.position.map(f64::to_bits)))
                .collect();
            particles.sort();
            (p.id(), PatchSnapshot { fields, particles })
        })
        .collect()
}

/// One full timestep of exchanges on whatever patches the engine owns.
pub fn timestep<C: Communicator>(engine: &mut ExchangeEngine<C>, step: u64) {
    let width = [0, 1, 2].map(|a| engine.decomposition().patch_width(a));
    for patch in engine.local_patches_mut() {
        patch.reset_fields(&FieldId::DENSITIES);
        deposit_pattern(patch, 40);
    }
    engine.sum_exchange(&FieldId::DENSITIES).unwrap();
    for patch in engine.local_patches_mut() {
        fill_fields(patch);
    }
    engine.copy_exchange(&FieldId::ELECTROMAGNETIC).unwrap();
    for patch in engine.local_patches_mut() {
        push_particles(patch, width, step * 100);
    }
    engine.migrate_particles().unwrap();
}
