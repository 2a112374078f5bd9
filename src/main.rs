// src/main.rs
//
// Command-line trainer: builds an environment, runs the episode loop and
// optionally writes the agent checkpoint and metrics.

use clap::{ArgAction, Parser};
use log::{error, info};
use std::path::PathBuf;

use flowql::environment::RecordingConfig;
use flowql::error::Result;
use flowql::training::{build_environment, EpisodeLoop, TrainingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "flowql",
    about = "Train a mean-flow Q-learning agent on a continuous-control environment",
    version
)]
struct Args {
    /// Environment name (Pendulum-v1, MountainCarContinuous-v0).
    #[arg(long, default_value = "Pendulum-v1")]
    env_name: String,

    #[arg(long, default_value_t = 50000)]
    num_episodes: usize,

    #[arg(long, default_value_t = 500)]
    max_timesteps: usize,

    #[arg(long, default_value_t = 64)]
    actor_hidden_dim: usize,

    #[arg(long, default_value_t = 256)]
    critic_hidden_dim: usize,

    /// Rewards are divided by this before they are stored.
    #[arg(long, default_value_t = 100.0)]
    max_reward: f32,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 0.1)]
    prob_rand_action: f32,

    #[arg(long, default_value_t = 0.002)]
    lr: f32,

    #[arg(long, default_value_t = 1e-3)]
    weight_decay: f32,

    #[arg(long, default_value_t = 0.9)]
    beta1: f32,

    #[arg(long, default_value_t = 0.99)]
    beta2: f32,

    #[arg(long, default_value_t = 0.99)]
    discount_factor: f32,

    #[arg(long, default_value_t = 0.95)]
    ema_decay: f32,

    /// Global steps between policy updates.
    #[arg(long, default_value_t = 10000)]
    update_timesteps: usize,

    #[arg(long, default_value_t = 5)]
    epochs: usize,

    /// Deterministic seed for environment, networks and exploration.
    #[arg(long)]
    seed: Option<u64>,

    /// Record episodes as JSON lines.
    #[arg(long)]
    record: bool,

    #[arg(long, default_value_t = 250)]
    record_every_eps: usize,

    /// Remove earlier recordings first.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    clear_recordings: bool,

    #[arg(long, default_value = "./recordings")]
    recording_folder: PathBuf,

    /// JSON training config; replaces every other training flag.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the trained agent here (bincode).
    #[arg(long, value_name = "FILE")]
    save_path: Option<PathBuf>,

    /// Write training metrics here (JSON).
    #[arg(long, value_name = "FILE")]
    metrics_path: Option<PathBuf>,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn training_config(&self) -> Result<TrainingConfig> {
        if let Some(path) = &self.config {
            return TrainingConfig::from_json_file(path);
        }

        let mut config = TrainingConfig {
            env_name: self.env_name.clone(),
            num_episodes: self.num_episodes,
            max_timesteps: self.max_timesteps,
            max_reward: self.max_reward,
            prob_rand_action: self.prob_rand_action,
            update_timesteps: self.update_timesteps,
            seed: self.seed,
            recording: RecordingConfig {
                enabled: self.record,
                record_every_eps: self.record_every_eps,
                clear: self.clear_recordings,
                folder: self.recording_folder.clone(),
            },
            ..TrainingConfig::default()
        };

        let agent = &mut config.agent;
        agent.actor_hidden_dim = self.actor_hidden_dim;
        agent.critic_hidden_dim = self.critic_hidden_dim;
        agent.batch_size = self.batch_size;
        agent.epochs = self.epochs;
        agent.lr = self.lr;
        agent.weight_decay = self.weight_decay;
        agent.betas = (self.beta1, self.beta2);
        agent.discount_factor = self.discount_factor;
        agent.ema.decay = self.ema_decay;
        Ok(config)
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.training_config()?;
    config.validate()?;

    let env = build_environment(&config)?;
    let mut training = EpisodeLoop::new(env, config)?;
    let summary = training.run()?;

    info!(
        "finished {} episodes, {} steps, {} policy updates, mean reward {:.3}",
        summary.episodes, summary.total_timesteps, summary.num_policy_updates, summary.mean_episode_reward
    );

    if let Some(path) = &args.metrics_path {
        training.metrics().save(path)?;
        info!("metrics written to {}", path.display());
    }
    if let Some(path) = &args.save_path {
        training.agent().save(path)?;
        info!("agent written to {}", path.display());
    }
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(&args) {
        error!("training failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
