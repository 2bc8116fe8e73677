mod util;

use pic_halo::prelude::*;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use util::{deposit_pattern, grid, interior, single_rank, wrapped_global};

#[test]
fn ghost_two_deposit_spanning_two_patches_counts_once() {
    // 1-D, 20 cells, two patches of 10, ghost 2. Patch 0 local i is global
    // node i - 2, patch 1 local i is global node i + 8.
    let mut e = single_rank(grid(&[20], 2, &[false]), 2);
    let (left, right) = (PatchId::new(0), PatchId::new(1));
    let weights = [0.5, 1.0, 2.0, 1.0, 0.5];
    for (k, w) in weights.iter().enumerate() {
        // Global nodes 8..=12, written from the left patch only.
        e.patch_mut(left).unwrap().deposit(FieldId::Rho, [10 + k, 0, 0], *w).unwrap();
    }
    e.sum_exchange(&[FieldId::Rho]).unwrap();

    let l = e.patch(left).unwrap().field(FieldId::Rho);
    let r = e.patch(right).unwrap().field(FieldId::Rho);
    for (k, w) in weights.iter().enumerate() {
        assert_eq!(l.get([10 + k, 0, 0]), Some(*w), "left, node {}", 8 + k);
        assert_eq!(r.get([k, 0, 0]), Some(*w), "right, node {}", 8 + k);
    }
    // The shared boundary node (global 10) holds the deposit once on each side.
    assert_eq!(l.get([12, 0, 0]), Some(2.0));
    assert_eq!(r.get([2, 0, 0]), Some(2.0));
}

#[test]
fn both_sides_depositing_into_the_same_node() {
    let mut e = single_rank(grid(&[20], 2, &[false]), 2);
    e.patch_mut(PatchId::new(0)).unwrap().deposit(FieldId::Rho, [12, 0, 0], 1.25).unwrap();
    e.patch_mut(PatchId::new(1)).unwrap().deposit(FieldId::Rho, [2, 0, 0], 0.75).unwrap();
    e.sum_exchange(&[FieldId::Rho]).unwrap();
    assert_eq!(e.patch(PatchId::new(0)).unwrap().field(FieldId::Rho).get([12, 0, 0]), Some(2.0));
    assert_eq!(e.patch(PatchId::new(1)).unwrap().field(FieldId::Rho).get([2, 0, 0]), Some(2.0));
}

/// Deposit random values everywhere (ghosts included), then check every
/// buffer cell against a global accumulation of the same deposits.
fn run_conservation(shuffle_seed: Option<u64>) -> Vec<(PatchId, FieldId, Vec<f64>)> {
    let cells = [30, 30, 1];
    let mut e = single_rank(grid(&cells[..2], 2, &[true, true]), 9);

    let mut deposits = Vec::new();
    let mut rng = SmallRng::seed_from_u64(7);
    for id in e.local_patch_ids().collect::<Vec<_>>() {
        for field in FieldId::DENSITIES {
            let extents = e.patch(id).unwrap().field(field).layout().extents();
            for _ in 0..300 {
                let cell = extents.map(|n| rng.gen_range(0..n));
                deposits.push((id, field, cell, rng.gen_range(-1.0..1.0)));
            }
        }
    }
    if let Some(seed) = shuffle_seed {
        deposits.shuffle(&mut SmallRng::seed_from_u64(seed));
    }

    let mut reference: HashMap<(FieldId, [usize; 3]), f64> = HashMap::new();
    for &(id, field, cell, v) in &deposits {
        let patch = e.patch_mut(id).unwrap();
        let layout = *patch.field(field).layout();
        *reference
            .entry((field, wrapped_global(patch, &layout, cells, cell)))
            .or_default() += v;
        patch.deposit(field, cell, v).unwrap();
    }

    e.sum_exchange(&FieldId::DENSITIES).unwrap();

    let mut out = Vec::new();
    for patch in e.local_patches() {
        for field in FieldId::DENSITIES {
            let buf = patch.field(field);
            let layout = *buf.layout();
            let [nx, ny, nz] = layout.extents();
            for i in 0..nx {
                for j in 0..ny {
                    for k in 0..nz {
                        let g = wrapped_global(patch, &layout, cells, [i, j, k]);
                        let want = reference.get(&(field, g)).copied().unwrap_or(0.0);
                        let got = buf.get([i, j, k]).unwrap();
                        assert!(
                            (got - want).abs() < 1e-12,
                            "{field:?} patch {} local {:?}: {got} vs {want}",
                            patch.id(),
                            [i, j, k]
                        );
                    }
                }
            }
            out.push((patch.id(), field, buf.as_slice().to_vec()));
        }
    }
    out
}

#[test]
fn sum_exchange_conserves_deposits() {
    run_conservation(None);
}

#[test]
fn result_independent_of_deposit_order() {
    let a = run_conservation(None);
    let b = run_conservation(Some(99));
    for ((pa, fa, va), (pb, fb, vb)) in a.iter().zip(&b) {
        assert_eq!((pa, fa), (pb, fb));
        assert!(va.iter().zip(vb).all(|(x, y)| (x - y).abs() < 1e-12));
    }
}

#[test]
fn dual_component_sums_across_the_seam() {
    // Jx is dual along x: the seam slab is 2g cells wide.
    let mut e = single_rank(grid(&[20], 1, &[false]), 2);
    e.patch_mut(PatchId::new(0)).unwrap().deposit(FieldId::Jx, [10, 0, 0], 1.0).unwrap();
    let report = e.sum_exchange(&[FieldId::Jx, FieldId::Jx]).unwrap();
    assert_eq!(report.fields, vec![FieldId::Jx]);
    assert_eq!(report.local_segments, 2);
    // Patch 0 local cell 10 is global cell 9, patch 1 local 0.
    assert_eq!(e.patch(PatchId::new(1)).unwrap().field(FieldId::Jx).get([0, 0, 0]), Some(1.0));
}

/// Owned-cell densities after a full sum round and after one sum sweep per axis.
fn full_and_swept(make_grid: fn() -> GlobalGrid, hint: usize) -> (Vec<Vec<u64>>, Vec<Vec<u64>>) {
    let owned = |e: &ExchangeEngine<NoComm>| -> Vec<Vec<u64>> {
        let mut out = Vec::new();
        for patch in e.local_patches() {
            for field in FieldId::DENSITIES {
                let buf = patch.field(field);
                let [ri, rj, rk] = interior(buf.layout(), patch.region().cells);
                let mut vals = Vec::new();
                for i in ri.clone() {
                    for j in rj.clone() {
                        for k in rk.clone() {
                            vals.push(buf.get([i, j, k]).unwrap().to_bits());
                        }
                    }
                }
                out.push(vals);
            }
        }
        out
    };

    let mut full = single_rank(make_grid(), hint);
    let mut swept = single_rank(make_grid(), hint);
    for e in [&mut full, &mut swept] {
        for patch in e.local_patches_mut() {
            deposit_pattern(patch, 60);
        }
    }
    full.sum_exchange(&FieldId::DENSITIES).unwrap();
    for axis in 0..swept.decomposition().dim() {
        let report = swept.sum_exchange_along(axis, &FieldId::DENSITIES).unwrap();
        assert_eq!(report.axis, Some(axis));
    }
    (owned(&full), owned(&swept))
}

#[test]
fn axis_sweeps_sum_like_one_full_round_in_2d() {
    let (full, swept) = full_and_swept(|| grid(&[30, 30], 2, &[true, true]), 9);
    assert_eq!(full, swept);
}

#[test]
fn axis_sweeps_sum_like_one_full_round_in_3d() {
    let (full, swept) = full_and_swept(|| grid(&[12, 12, 12], 1, &[false, false, false]), 8);
    assert_eq!(full, swept);
}
