use flowql::{
    algorithms::{AgentConfig, MeanFlowQLAgent},
    environment::{make, Environment, MountainCarContinuous, Pendulum, RecordingConfig},
    replay_buffer::{ReplayBuffer, Transition},
    training::{build_environment, EpisodeEnd, EpisodeLoop, TrainingConfig},
};
use ndarray::Array2;
use tempfile::tempdir;

fn quick_config(env_name: &str) -> TrainingConfig {
    TrainingConfig {
        env_name: env_name.to_string(),
        num_episodes: 4,
        max_timesteps: 60,
        update_timesteps: 50,
        seed: Some(3),
        agent: AgentConfig::default()
            .hidden_dims(16, 16)
            .depth(2, 2)
            .batch_size(16)
            .epochs(2),
        ..TrainingConfig::default()
    }
}

#[test]
fn test_end_to_end_training_on_pendulum() {
    let config = quick_config("Pendulum-v1");
    let env = make(&config.env_name, config.seed).unwrap();
    let mut training = EpisodeLoop::new(env, config).unwrap();

    let summary = training.run().unwrap();
    assert_eq!(summary.episodes, 4);
    assert_eq!(summary.num_policy_updates, summary.total_timesteps / 50);
    assert!(summary.num_policy_updates >= 1);
    assert!(summary.mean_episode_reward.is_finite());

    let stats = summary.last_learn.unwrap();
    // 50 transitions, batches of 16 -> 4 per epoch, 2 epochs
    assert_eq!(stats.minibatches, 8);
    assert!(stats.critic_loss.is_finite());
    assert!(stats.flow_loss.is_finite());
    assert!(training.memories().len() < 50);
}

#[test]
fn test_first_update_lands_mid_episode() {
    // pendulum episodes last 200 steps, so the update at step 50 cuts the first one short
    let config = quick_config("Pendulum-v1");
    let mut training = EpisodeLoop::new(Pendulum::new(Some(1)), config).unwrap();
    let first = training.run_episode().unwrap();
    assert_eq!(first.end, EpisodeEnd::PolicyUpdate);
    assert_eq!(first.steps, 50);

    let second = training.run_episode().unwrap();
    assert_eq!(second.end, EpisodeEnd::PolicyUpdate);
    assert_eq!(second.steps, 50);
    assert_eq!(training.time(), 100);
}

#[test]
fn test_mountain_car_with_recording() {
    let dir = tempdir().unwrap();
    let mut config = quick_config("MountainCarContinuous-v0");
    config.recording = RecordingConfig {
        enabled: true,
        record_every_eps: 2,
        clear: true,
        folder: dir.path().join("recordings"),
    };

    let env = build_environment(&config).unwrap();
    assert_eq!(env.name(), "MountainCarContinuous-v0");
    let mut training = EpisodeLoop::new(env, config).unwrap();
    training.run().unwrap();

    let recordings = std::fs::read_dir(dir.path().join("recordings")).unwrap().count();
    assert_eq!(recordings, 2);
}

#[test]
fn test_checkpoint_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agent.bin");

    let config = quick_config("MountainCarContinuous-v0");
    let env = MountainCarContinuous::new(Some(5));
    let mut training = EpisodeLoop::new(env, config.clone()).unwrap();
    training.run().unwrap();
    training.agent().save(&path).unwrap();

    let agent = training.into_agent();
    let loaded = MeanFlowQLAgent::load(&path).unwrap();

    let states = Array2::from_shape_fn((8, 2), |(i, j)| i as f32 * 0.1 - j as f32 * 0.05);
    let noise = Array2::from_elem((8, 1), 0.7);
    let mut rng = rand::thread_rng();
    assert_eq!(
        agent.mean_flow.sample(states.view(), Some(noise.view()), &mut rng).unwrap(),
        loaded.mean_flow.sample(states.view(), Some(noise.view()), &mut rng).unwrap()
    );

    // a loaded agent keeps training
    let mut loaded = loaded;
    let mut buffer = ReplayBuffer::new(4);
    for i in 0..4 {
        buffer.append(Transition {
            state: states.row(i).to_owned(),
            action: noise.row(i).mapv(|a| a.clamp(-1.0, 1.0)),
            reward: 0.1,
            next_state: states.row(i + 1).to_owned(),
            done: false,
        });
    }
    let stats = loaded.learn(&mut buffer).unwrap();
    assert!(buffer.is_empty());
    assert_eq!(stats.minibatches, 2);

    let resumed = EpisodeLoop::with_agent(Pendulum::new(Some(0)), loaded, config);
    assert!(resumed.is_err(), "agent sized for mountain car must not drive the pendulum");
}
