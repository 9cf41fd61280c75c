use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use ql::learn::agent::Agent;
use ql::prelude::{Environment, NetworkId, PersistenceStore, QNetwork, QlError, Telemetry};
use ql::util::format;

pub const MAX_FOLDER: &str = "max";
pub const MIN_FOLDER: &str = "min";
pub const TMP_FOLDER: &str = "tmp";
pub const SCORES_FILE: &str = "scores.json";

pub const DEFAULT_GAMES: usize = 1_000;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordSummary {
    pub max: f32,
    pub min: f32,
    pub average: f64,
    /// Raw score of every game played, in order
    pub scores: Vec<f32>,
}

/// Replays `network` for up to `games` games, keeping the frames of the best game in `<folder>/max`
/// and of the worst one in `<folder>/min`. All scores end up in `<folder>/scores.json`.
///
/// Stops early when the agent's processing flag is lowered; the first game is always played.
pub fn record_games<E, N, P, T>(
    agent: &mut Agent<E, N, P, T>,
    network: NetworkId,
    folder: &Path,
    games: usize,
) -> Result<RecordSummary>
where
    E: Environment,
    N: QNetwork,
    P: PersistenceStore,
    T: Telemetry,
{
    if games == 0 {
        return Err(QlError::from("nothing to record for 0 games").into());
    }
    let max_dir = folder.join(MAX_FOLDER);
    let min_dir = folder.join(MIN_FOLDER);
    let tmp_dir = folder.join(TMP_FOLDER);
    for dir in [&max_dir, &min_dir, &tmp_dir] {
        if dir.exists() {
            fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        }
    }
    fs::create_dir_all(&max_dir)?;

    let processing = agent.processing();
    let mut summary = RecordSummary {
        max: 0.0,
        min: 0.0,
        average: 0.0,
        scores: Vec::with_capacity(games),
    };
    for game in 0..games {
        if game > 0 && !processing.should_continue() {
            log::info!("recording interrupted after {} game(s)", game);
            break;
        }
        let target = if game == 0 { &max_dir } else { &tmp_dir };
        fs::create_dir_all(target)?;

        let start = Instant::now();
        let (score, _) = agent.replay(Some(network), Some(target))?;
        log::info!("{:>6}: played [{}] - [{:0>3}]", game, format::elapsed(start.elapsed()), score);

        let played = summary.scores.len() as f64;
        summary.average = summary.average * (played / (played + 1.0)) + score as f64 / (played + 1.0);
        summary.scores.push(score);

        if game == 0 {
            copy_frames(&max_dir, &min_dir)?;
            summary.max = score;
            summary.min = score;
        } else if score > summary.max {
            fs::remove_dir_all(&max_dir)?;
            fs::rename(&tmp_dir, &max_dir)?;
            summary.max = score;
        } else if score < summary.min {
            fs::remove_dir_all(&min_dir)?;
            fs::rename(&tmp_dir, &min_dir)?;
            summary.min = score;
        } else {
            fs::remove_dir_all(&tmp_dir)?;
        }
    }
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }

    let mut writer = BufWriter::new(File::create(folder.join(SCORES_FILE))?);
    serde_json::to_writer(&mut writer, &summary.scores)?;
    writer.flush()?;

    log::info!(
        "max. score: {}, min. score: {}, avg. score: {:.2}, games played: {}",
        summary.max,
        summary.min,
        summary.average,
        summary.scores.len()
    );
    Ok(summary)
}

fn copy_frames(
    from: &Path,
    to: &Path,
) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        fs::copy(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}
