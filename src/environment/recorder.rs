use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FlowQlError, Result};
use super::{Environment, StepResult};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecordingConfig {
    pub enabled: bool,
    /// Record episodes 0, n, 2n, ...
    pub record_every_eps: usize,
    /// Remove the folder's previous contents before the first recording
    pub clear: bool,
    pub folder: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            enabled: false,
            record_every_eps: 250,
            clear: true,
            folder: PathBuf::from("recordings"),
        }
    }
}

/// One line of a recording file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecordedStep {
    pub step: usize,
    /// Observation the action was taken in
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

/// Environment wrapper that writes selected episodes as JSON lines.
///
/// Each recorded episode goes to `<folder>/episode-NNNNNN.jsonl`, one
/// `RecordedStep` per line.
pub struct EpisodeRecorder<E: Environment> {
    inner: E,
    folder: PathBuf,
    record_every_eps: usize,
    episode: Option<usize>,
    step: usize,
    last_state: Option<Array1<f32>>,
    writer: Option<BufWriter<File>>,
}

impl<E: Environment> EpisodeRecorder<E> {
    pub fn new(inner: E, config: &RecordingConfig) -> Result<Self> {
        if config.record_every_eps == 0 {
            return Err(FlowQlError::invalid_parameter("record_every_eps", "must be at least 1"));
        }
        if config.clear && config.folder.exists() {
            fs::remove_dir_all(&config.folder)?;
        }
        fs::create_dir_all(&config.folder)?;

        Ok(EpisodeRecorder {
            inner,
            folder: config.folder.clone(),
            record_every_eps: config.record_every_eps,
            episode: None,
            step: 0,
            last_state: None,
            writer: None,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Path of the recording for `episode`.
    pub fn episode_path(&self, episode: usize) -> PathBuf {
        self.folder.join(format!("episode-{:06}.jsonl", episode))
    }

    fn finish_episode(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn write_step(&mut self, action: ArrayView1<f32>, result: &StepResult) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let record = RecordedStep {
            step: self.step,
            state: self.last_state.as_ref().map(|s| s.to_vec()).unwrap_or_default(),
            action: action.to_vec(),
            reward: result.reward,
            terminated: result.terminated,
            truncated: result.truncated,
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<E: Environment> Environment for EpisodeRecorder<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn observation_dim(&self) -> usize {
        self.inner.observation_dim()
    }

    fn action_dim(&self) -> usize {
        self.inner.action_dim()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.finish_episode()?;
        let episode = self.episode.map_or(0, |e| e + 1);
        self.episode = Some(episode);
        self.step = 0;

        if episode % self.record_every_eps == 0 {
            let path = self.episode_path(episode);
            debug!("recording episode {} to {}", episode, path.display());
            self.writer = Some(BufWriter::new(File::create(path)?));
        }

        let state = self.inner.reset()?;
        self.last_state = Some(state.clone());
        Ok(state)
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<StepResult> {
        let result = self.inner.step(action)?;
        self.write_step(action, &result)?;
        self.step += 1;
        self.last_state = Some(result.next_state.clone());
        if result.is_done() {
            self.finish_episode()?;
        }
        Ok(result)
    }
}

impl<E: Environment> Drop for EpisodeRecorder<E> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}
