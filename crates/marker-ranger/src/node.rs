//! Directory-backed transport: replays recorded channels from disk.
//!
//! Layout under the root directory:
//! - `<camera>/image_raw/compressed/*` compressed frames, one file each;
//! - `<camera>/camera_info/*.json` camera-info messages;
//! - `aruco_video/compressed/*` annotated JPEG output, named after the input;
//! - `readings.jsonl` one JSON line per distance reading.
//!
//! File names order both channels on a shared replay clock: a frame is only
//! processed once every camera-info message named before it was consumed,
//! and a message is only offered once every earlier frame was processed.

use crate::calibration::{CalibrationStore, CameraInfo};
use crate::config::{ConfigError, RangerConfig};
use crate::pipeline::{DistanceReading, PipelineController};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("calibration consumer thread panicked")]
    CalibrationThread,
}

/// Counters of one node run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub frames_processed: usize,
    pub frames_dropped: usize,
    pub readings: usize,
    pub calibration_messages: usize,
}

#[derive(Serialize)]
struct ReadingRecord<'a> {
    frame: &'a str,
    #[serde(flatten)]
    reading: &'a DistanceReading,
}

#[derive(Default)]
struct ClockState {
    frames_done: usize,
    frames_finished: bool,
    messages_done: usize,
    messages_finished: bool,
}

/// Shared replay clock: each channel waits until the other has caught up
/// with every message named before its next one.
#[derive(Default)]
struct ReplayClock {
    state: Mutex<ClockState>,
    cond: Condvar,
}

#[derive(Clone, Copy)]
enum Channel {
    Frames,
    Messages,
}

impl ReplayClock {
    fn update(&self, f: impl FnOnce(&mut ClockState)) {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut s);
        self.cond.notify_all();
    }

    fn advance(&self, channel: Channel) {
        self.update(|s| match channel {
            Channel::Frames => s.frames_done += 1,
            Channel::Messages => s.messages_done += 1,
        });
    }

    fn finish(&self, channel: Channel) {
        self.update(|s| match channel {
            Channel::Frames => s.frames_finished = true,
            Channel::Messages => s.messages_finished = true,
        });
    }

    /// Block until `count` items of `other` were consumed or it finished.
    fn wait_for(&self, other: Channel, count: usize) {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let (done, finished) = match other {
                Channel::Frames => (s.frames_done, s.frames_finished),
                Channel::Messages => (s.messages_done, s.messages_finished),
            };
            if finished || done >= count {
                return;
            }
            s = self.cond.wait(s).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks a channel finished even on early return or unwind.
struct FinishOnDrop<'a>(&'a ReplayClock, Channel);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish(self.1);
    }
}

fn count_before(sorted_names: &[String], name: &str) -> usize {
    sorted_names.partition_point(|n| n.as_str() < name)
}

fn sorted_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_camera_info(path: &Path) -> Result<CameraInfo, NodeError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Consume camera-info messages in order until exhausted or latched.
fn consume_calibration(
    store: &CalibrationStore,
    messages: &[PathBuf],
    frame_names: &[String],
    clock: &ReplayClock,
) -> usize {
    let _finish = FinishOnDrop(clock, Channel::Messages);
    let mut offered = 0;
    for path in messages {
        clock.wait_for(Channel::Frames, count_before(frame_names, &file_name(path)));
        if !store.wants_offers() {
            log::debug!("calibration latched; unsubscribing from camera_info");
            break;
        }
        match read_camera_info(path) {
            Ok(info) => {
                offered += 1;
                match store.offer_info(&info) {
                    Ok(outcome) => log::debug!("{}: {outcome:?}", path.display()),
                    Err(err) => log::warn!("{}: {err}", path.display()),
                }
            }
            Err(err) => log::warn!("{}: unreadable camera_info: {err}", path.display()),
        }
        clock.advance(Channel::Messages);
    }
    offered
}

/// A ranging node reading and writing channels as directories.
pub struct DirectoryNode {
    root: PathBuf,
    config: RangerConfig,
}

impl DirectoryNode {
    pub fn new(root: impl Into<PathBuf>, config: RangerConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join(self.config.image_channel())
    }

    pub fn camera_info_dir(&self) -> PathBuf {
        self.root.join(self.config.camera_info_channel())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(self.config.output_channel())
    }

    pub fn readings_path(&self) -> PathBuf {
        self.root.join("readings.jsonl")
    }

    /// Replay both input channels to completion.
    pub fn run(&self) -> Result<NodeSummary, NodeError> {
        let store = Arc::new(CalibrationStore::new(self.config.calibration_policy));
        if let Some(seed) = &self.config.static_calibration {
            match store.offer_info(seed) {
                Ok(outcome) => log::info!("static calibration: {outcome:?}"),
                Err(err) => log::warn!("static calibration rejected: {err}"),
            }
        }
        let mut pipeline = PipelineController::new(&self.config, Arc::clone(&store))?;

        let frames = sorted_files(&self.image_dir())?;
        let messages = sorted_files(&self.camera_info_dir())?;
        let frame_names: Vec<String> = frames.iter().map(|p| file_name(p)).collect();
        let message_names: Vec<String> = messages.iter().map(|p| file_name(p)).collect();
        fs::create_dir_all(self.output_dir())?;

        log::info!(
            "replaying {} frames and {} camera_info messages from {}",
            frames.len(),
            messages.len(),
            self.root.display()
        );

        let clock = Arc::new(ReplayClock::default());
        let consumer = {
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            let frame_names = frame_names.clone();
            thread::spawn(move || consume_calibration(&store, &messages, &frame_names, &clock))
        };

        let summary = {
            let _finish = FinishOnDrop(&clock, Channel::Frames);
            self.replay_frames(&frames, &message_names, &mut pipeline, &clock)
        };
        let calibration_messages = consumer.join().map_err(|_| NodeError::CalibrationThread)?;
        let summary = NodeSummary {
            calibration_messages,
            ..summary?
        };
        log::info!(
            "done: {} frames processed, {} dropped, {} readings",
            summary.frames_processed,
            summary.frames_dropped,
            summary.readings
        );
        Ok(summary)
    }

    fn replay_frames(
        &self,
        frames: &[PathBuf],
        message_names: &[String],
        pipeline: &mut PipelineController,
        clock: &ReplayClock,
    ) -> Result<NodeSummary, NodeError> {
        let mut readings_out = BufWriter::new(File::create(self.readings_path())?);
        let mut summary = NodeSummary::default();
        for path in frames {
            let name = file_name(path);
            clock.wait_for(Channel::Messages, count_before(message_names, &name));

            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("{name}: unreadable frame, dropped: {err}");
                    summary.frames_dropped += 1;
                    clock.advance(Channel::Frames);
                    continue;
                }
            };
            let processed = match pipeline.process_frame(&bytes) {
                Ok(p) => p,
                Err(err) => {
                    log::warn!("{name}: {err}; frame dropped");
                    summary.frames_dropped += 1;
                    clock.advance(Channel::Frames);
                    continue;
                }
            };

            fs::write(self.output_dir().join(&name), &processed.jpeg)?;
            for reading in &processed.report.readings {
                serde_json::to_writer(
                    &mut readings_out,
                    &ReadingRecord {
                        frame: &name,
                        reading,
                    },
                )?;
                readings_out.write_all(b"\n")?;
                summary.readings += 1;
            }
            summary.frames_processed += 1;
            clock.advance(Channel::Frames);
        }
        readings_out.flush()?;
        Ok(summary)
    }
}
