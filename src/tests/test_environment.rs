use ndarray::arr1;
use std::fs;
use tempfile::tempdir;

use crate::environment::{
    make, validate_action, Environment, EpisodeRecorder, MountainCarContinuous, Pendulum, RecordedStep,
    RecordingConfig, ENVIRONMENT_NAMES,
};
use crate::error::FlowQlError;

#[test]
fn test_make_known_and_unknown() {
    for name in ENVIRONMENT_NAMES {
        let env = make(name, Some(0)).unwrap();
        assert_eq!(env.name(), name);
        assert_eq!(env.action_dim(), 1);
    }
    assert!(matches!(make("LunarLander-v3", None), Err(FlowQlError::UnknownEnvironment(_))));
}

#[test]
fn test_action_validation() {
    assert!(validate_action(arr1(&[1.0]).view(), 1).is_ok());
    assert!(matches!(
        validate_action(arr1(&[1.5]).view(), 1),
        Err(FlowQlError::ActionOutOfRange { .. })
    ));
    assert!(matches!(
        validate_action(arr1(&[f32::NAN]).view(), 1),
        Err(FlowQlError::ActionOutOfRange { .. })
    ));
    assert!(matches!(
        validate_action(arr1(&[0.0, 0.0]).view(), 1),
        Err(FlowQlError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_pendulum_dynamics() {
    let mut env = Pendulum::new(Some(1));
    let state = env.reset().unwrap();
    assert_eq!(state.len(), 3);
    assert!(((state[0].powi(2) + state[1].powi(2)) - 1.0).abs() < 1e-5);

    let mut steps = 0;
    loop {
        let result = env.step(arr1(&[0.5]).view()).unwrap();
        steps += 1;
        assert!(result.reward <= 0.0);
        assert!(!result.terminated);
        assert!(result.next_state[2].abs() <= 8.0);
        if result.truncated {
            break;
        }
    }
    assert_eq!(steps, 200);
}

#[test]
fn test_pendulum_seeded_reset_is_reproducible() {
    let mut a = Pendulum::new(Some(9));
    let mut b = Pendulum::new(Some(9));
    assert_eq!(a.reset().unwrap(), b.reset().unwrap());
}

#[test]
fn test_mountain_car_reaches_goal_with_bang_bang_policy() {
    let mut env = MountainCarContinuous::new(Some(2));
    let mut state = env.reset().unwrap();
    assert!((-0.6..=-0.4).contains(&state[0]));
    assert_eq!(state[1], 0.0);

    for _ in 0..999 {
        // push in the direction of motion
        let action = if state[1] >= 0.0 { 1.0 } else { -1.0 };
        let result = env.step(arr1(&[action]).view()).unwrap();
        state = result.next_state.clone();
        if result.terminated {
            assert!(result.reward > 99.0);
            assert!(!result.truncated);
            return;
        }
        assert!((result.reward + 0.1).abs() < 1e-6);
        assert!(!result.truncated);
    }
    panic!("mountain car never reached the goal");
}

#[test]
fn test_mountain_car_truncates() {
    let mut env = MountainCarContinuous::new(Some(3)).with_max_steps(5);
    env.reset().unwrap();
    let results = (0..5)
        .map(|_| env.step(arr1(&[0.0]).view()).unwrap())
        .collect::<Vec<_>>();
    assert!(results[..4].iter().all(|r| !r.is_done()));
    assert!(results[4].truncated);
}

#[test]
fn test_recorder_writes_selected_episodes() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("recordings");
    let config = RecordingConfig {
        enabled: true,
        record_every_eps: 2,
        clear: true,
        folder: folder.clone(),
    };
    let inner = Pendulum::new(Some(4)).with_max_steps(3);
    let mut env = EpisodeRecorder::new(inner, &config).unwrap();

    for _ in 0..3 {
        env.reset().unwrap();
        loop {
            if env.step(arr1(&[0.0]).view()).unwrap().is_done() {
                break;
            }
        }
    }

    assert!(env.episode_path(0).exists());
    assert!(!env.episode_path(1).exists());
    assert!(env.episode_path(2).exists());

    let contents = fs::read_to_string(env.episode_path(0)).unwrap();
    let steps = contents
        .lines()
        .map(|line| serde_json::from_str::<RecordedStep>(line).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].step, 0);
    assert_eq!(steps[0].state.len(), 3);
    assert_eq!(steps[2].action, vec![0.0]);
    assert!(steps[2].truncated);
}

#[test]
fn test_recorder_clears_folder() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("recordings");
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join("stale.jsonl"), "old").unwrap();

    let config = RecordingConfig {
        enabled: true,
        record_every_eps: 1,
        clear: true,
        folder: folder.clone(),
    };
    let env = EpisodeRecorder::new(Pendulum::new(Some(0)), &config).unwrap();
    assert!(!folder.join("stale.jsonl").exists());
    assert_eq!(env.folder(), folder.as_path());

    let bad = RecordingConfig { record_every_eps: 0, ..config };
    assert!(EpisodeRecorder::new(Pendulum::new(None), &bad).is_err());
}
