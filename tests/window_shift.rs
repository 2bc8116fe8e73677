mod util;

use pic_halo::prelude::*;
use serial_test::serial;
use std::collections::BTreeMap;
use util::{PatchSnapshot, grid, run_ranks, seed_particles, single_rank, snapshot, timestep};

#[test]
fn contents_follow_the_window() {
    let mut e = single_rank(grid(&[30], 1, &[false]), 3);
    let (p0, p1, p2) = (PatchId::new(0), PatchId::new(1), PatchId::new(2));
    e.patch_mut(p0).unwrap().receive_particles([Particle::at([4.0, 0.0, 0.0], 1)]);
    e.patch_mut(p1).unwrap().receive_particles([Particle::at([12.5, 0.0, 0.0], 2)]);
    e.patch_mut(p1).unwrap().deposit(FieldId::Rho, [4, 0, 0], 0.5).unwrap();
    e.patch_mut(p2).unwrap().receive_particles([Particle::at([29.0, 0.0, 0.0], 3)]);

    let report = e.shift_window(0, 1).unwrap();
    assert_eq!(report.dropped, vec![p0]);
    assert_eq!(report.entered, vec![p2]);
    assert_eq!(report.particles_lost, 1);
    assert_eq!(e.decomposition().window_origin(), [10.0, 0.0, 0.0]);

    let first = e.patch(p0).unwrap();
    assert_eq!(first.particles()[0].id, 2);
    assert_eq!(first.field(FieldId::Rho).get([4, 0, 0]), Some(0.5));
    assert_eq!(first.region().lo[0], 10.0);
    assert_eq!(e.patch(p1).unwrap().particles()[0].id, 3);
    let last = e.patch(p2).unwrap();
    assert!(last.particles().is_empty());
    assert!(last.field(FieldId::Rho).as_slice().iter().all(|&v| v == 0.0));
    assert_eq!(last.region().lo[0], 30.0);

    assert_eq!(e.decomposition().locate_position([35.0, 0.0, 0.0]), Some(p2));
    assert_eq!(e.decomposition().locate_position([5.0, 0.0, 0.0]), None);
    for patch in e.local_patches() {
        patch.validate_invariants().unwrap();
    }
    // Particles carried along still sit inside their patches.
    assert_eq!(e.migrate_particles().unwrap().moved_local, 0);
}

#[test]
fn window_needs_an_open_active_axis() {
    let mut e = single_rank(grid(&[30, 30], 1, &[false, true]), 9);
    assert!(matches!(e.shift_window(1, 1), Err(HaloError::Configuration(_))));
    assert!(matches!(e.shift_window(2, 1), Err(HaloError::Configuration(_))));
    assert_eq!(e.local_patches().count(), 9);
    assert_eq!(e.shift_window(0, 1).unwrap().axis, 0);
}

#[test]
fn shifting_past_the_whole_window_empties_it() {
    let mut e = single_rank(grid(&[30], 1, &[false]), 3);
    for patch in e.local_patches_mut() {
        seed_particles(patch, 5);
    }
    let report = e.shift_window(0, 4).unwrap();
    assert_eq!(report.dropped.len(), 3);
    assert_eq!(report.entered.len(), 3);
    assert_eq!(report.particles_lost, 15);
    assert_eq!(e.particle_count(), 0);
    assert_eq!(e.decomposition().window_origin(), [40.0, 0.0, 0.0]);
}

fn run<C: Communicator>(comm: C) -> BTreeMap<PatchId, PatchSnapshot> {
    let n_ranks = comm.size();
    let mapping = decompose(grid(&[40, 12], 1, &[false, true]), 8, n_ranks, PatchOrdering::Lexicographic)
        .unwrap();
    let mut e = ExchangeEngine::new(comm, mapping).unwrap();
    for patch in e.local_patches_mut() {
        seed_particles(patch, 20);
    }
    timestep(&mut e, 1);
    e.shift_window(0, 1).unwrap();
    timestep(&mut e, 2);
    e.shift_window(0, 2).unwrap();
    timestep(&mut e, 3);
    snapshot(&e)
}

#[test]
#[serial]
fn shifted_windows_match_single_rank() {
    let reference = run(NoComm);
    for n in 2..=3 {
        let mut merged = BTreeMap::new();
        for part in run_ranks(n, |comm| run(comm)) {
            merged.extend(part);
        }
        assert_eq!(merged, reference, "{n} ranks");
    }
}
