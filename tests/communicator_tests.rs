mod util;

use pic_halo::prelude::*;
use serial_test::serial;
use util::run_ranks;

#[test]
#[serial]
fn ring_pass_on_three_ranks() {
    let got = run_ranks(3, |comm| {
        let (me, n) = (comm.rank(), comm.size());
        let next = (me + 1) % n;
        let prev = (me + n - 1) % n;
        let recv = comm.irecv(prev, 7, 8);
        comm.isend(next, 7, &(me as u64).to_le_bytes());
        let bytes = recv.wait().unwrap();
        comm.barrier().unwrap();
        u64::from_le_bytes(bytes.try_into().unwrap())
    });
    assert_eq!(got, vec![2, 0, 1]);
}

#[test]
#[serial]
fn tags_keep_messages_apart() {
    let got = run_ranks(2, |comm| {
        if comm.rank() == 0 {
            comm.isend(1, 1, b"first tag");
            comm.isend(1, 2, b"second tag");
            comm.barrier().unwrap();
            Vec::new()
        } else {
            // Receive in the opposite order of sending.
            let b = comm.irecv(0, 2, 10).wait().unwrap();
            let a = comm.irecv(0, 1, 9).wait().unwrap();
            comm.barrier().unwrap();
            vec![a, b]
        }
    });
    assert_eq!(got[1], vec![b"first tag".to_vec(), b"second tag".to_vec()]);
}

#[test]
fn engine_tags_are_distinct() {
    let t = ExchangeTags::from_base(CommTag::new(0x1000));
    let all = [
        t.sum,
        t.copy,
        t.migration_sizes,
        t.migration_data,
        t.migration_check_sizes,
        t.migration_check_data,
        t.rebalance_sizes,
        t.rebalance_data,
        t.window_sizes,
        t.window_data,
    ];
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a, b);
        }
    }
    assert_eq!(ExchangeTags::default().sum.as_u16(), 0x5100);
}

#[test]
#[serial]
fn engine_on_a_custom_base_tag() {
    let reports = run_ranks(2, |comm| {
        let grid = util::grid(&[20], 1, &[true]);
        let mapping = decompose(grid, 2, 2, PatchOrdering::Lexicographic).unwrap();
        let mut e = ExchangeEngine::with_tags(comm, mapping, ExchangeTags::from_base(CommTag::new(0x0100)))
            .unwrap();
        let id = e.local_patch_ids().next().unwrap();
        e.patch_mut(id).unwrap().deposit(FieldId::Rho, [1, 0, 0], 1.0).unwrap();
        e.sum_exchange(&[FieldId::Rho]).unwrap()
    });
    for r in reports {
        assert_eq!(r.remote_segments, 2);
        assert_eq!(r.peers, 1);
    }
}
