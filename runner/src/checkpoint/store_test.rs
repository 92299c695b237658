use super::{
    store::{HandoffError, HandoffStore},
    MigrationCheckpoint, ResumeHandle,
};
use crate::world::{IterationState, WorldContext};

fn token(rank: usize, remaining: usize) -> super::CheckpointToken {
    MigrationCheckpoint::new("run-store", ResumeHandle::AllToAll { chunk_size: 2 }).evaluate(
        &IterationState::resumed(8, remaining),
        &WorldContext {
            rank,
            world_size: 2,
            host: "node-a".to_string(),
        },
    )
}

#[test]
pub fn put_then_take() {
    let dir = tempfile::tempdir().unwrap();
    let store = HandoffStore::new(dir.path().join("handoff"));
    let token = token(1, 5);

    let path = store.put(&token).unwrap();
    assert_eq!(path, store.path_for("run-store", 1));
    assert!(path.is_file());

    assert_eq!(HandoffStore::take(&path).unwrap(), token);
    // consumed
    assert!(!path.exists());
}

#[test]
pub fn no_partial_file_is_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = HandoffStore::new(dir.path());
    store.put(&token(0, 3)).unwrap();

    let names = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    assert_eq!(names, vec!["run-store-rank0.yaml".to_string()]);
}

#[test]
pub fn taking_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = HandoffStore::new(dir.path());
    let path = store.put(&token(0, 3)).unwrap();

    HandoffStore::take(&path).unwrap();
    assert!(matches!(
        HandoffStore::take(&path),
        Err(HandoffError::Io { .. })
    ));
}

#[test]
pub fn relaunch_argument_must_match_token() {
    let dir = tempfile::tempdir().unwrap();
    let store = HandoffStore::new(dir.path());
    let path = store.put(&token(1, 4)).unwrap();

    assert!(matches!(
        HandoffStore::take_expecting(&path, 6),
        Err(HandoffError::RemainingMismatch {
            expected: 6,
            found: 4,
            ..
        })
    ));

    // a rejected relaunch must not cost the token
    assert!(path.is_file());
    assert_eq!(HandoffStore::take_expecting(&path, 4).unwrap(), token(1, 4));
    assert!(!path.exists());
}

#[test]
pub fn garbage_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "remaining: [not, a, number]").unwrap();

    assert!(matches!(
        HandoffStore::take(&path),
        Err(HandoffError::Format(_))
    ));
}
