use super::{
    all_to_all::{AllToAllFrame, AllToAllWorkload},
    IterationContext, Workload, WorkloadError,
};
use crate::{collective::local::LocalGroup, collective::CollectiveGroup, world::WorldContext};
use std::thread;

fn world(rank: usize, world_size: usize) -> WorldContext {
    WorldContext {
        rank,
        world_size,
        host: "localhost".to_string(),
    }
}

#[test]
pub fn send_buffer_pattern() {
    let frame = AllToAllFrame::new(&world(3, 2), 2);

    assert_eq!(frame.send, vec![30, 31, 32, 33]);
}

#[test]
pub fn expected_slots_for_four_ranks() {
    let frame = AllToAllFrame::new(&world(1, 4), 2);

    assert_eq!(frame.expected.len(), 8);
    assert_eq!(frame.expected[0], 2);
    assert_eq!(frame.expected[5], 23);
    assert_eq!(frame.expected, vec![2, 3, 12, 13, 22, 23, 32, 33]);
}

#[test]
pub fn verify_reports_first_divergence() {
    let mut frame = AllToAllFrame::new(&world(0, 2), 2);
    frame.actual = frame.expected.clone();
    assert!(frame.verify(0).is_ok());

    frame.actual[3] += 1;
    assert!(matches!(
        frame.verify(0),
        Err(WorkloadError::Mismatch { rank: 0, slot: 3, expected: 11, actual: 12 })
    ));
}

#[test]
pub fn verify_rejects_short_buffers() {
    let mut frame = AllToAllFrame::new(&world(0, 2), 2);
    frame.actual = vec![0, 1];

    assert!(matches!(frame.verify(0), Err(WorkloadError::Mismatch { .. })));
}

#[test]
pub fn exchange_on_local_group_matches_expectation() {
    let handles = LocalGroup::new(4).unwrap();

    thread::scope(|scope| {
        for handle in handles {
            scope.spawn(move || {
                let world = WorldContext::on_host(&handle, "localhost");
                let mut frame = AllToAllFrame::new(&world, 2);
                frame.exchange(&handle).unwrap();

                assert_eq!(frame.actual, frame.expected);
            });
        }
    });
}

#[test]
pub fn workload_never_fails_on_a_healthy_group() {
    for chunk_size in [1, 2, 5] {
        let handles = LocalGroup::new(3).unwrap();

        thread::scope(|scope| {
            for handle in handles {
                scope.spawn(move || {
                    let world = WorldContext::on_host(&handle, "localhost");
                    let mut workload = AllToAllWorkload::new(chunk_size);

                    for index in 0..10 {
                        let context = IterationContext {
                            world: &world,
                            index,
                            total: 10,
                        };
                        assert!(workload.run(&context, &handle).unwrap().ok);
                    }
                });
            }
        });
    }
}

#[test]
pub fn single_rank_exchanges_with_itself() {
    let handles = LocalGroup::new(1).unwrap();
    let world = WorldContext::on_host(&handles[0], "localhost");
    let mut frame = AllToAllFrame::new(&world, 3);
    frame.exchange(&handles[0]).unwrap();

    assert_eq!(frame.actual, vec![0, 1, 2]);
    assert_eq!(handles[0].world_size(), 1);
}
