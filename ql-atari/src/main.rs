use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use num_format::ToFormattedString;

use ql::learn::agent::{Agent, NetworkSelection};
use ql::learn::parameter::AgentParameter;
use ql::learn::worker::AgentHandle;
use ql::prelude::{AgentId, Environment, LogTelemetry, NetworkId, PersistenceStore};
use ql::util::format::number_format;
use ql::util::log::init_logging;
use ql_atari::console::{stdin_lines, wait_for_stop, STOP};
use ql_atari::game::{CatchGame, GameDefinition};
use ql_atari::network::conv_q_network;
use ql_atari::record::{record_games, DEFAULT_GAMES};
use ql_atari::store::FileStore;

const STORE_DIR_VARIABLE: &str = "QL_STORE";
const DEFAULT_STORE_DIR: &str = "ql-store";
const INFO: &str = "The agent is running. Type 'stop' to quit";
const RECORD_INFO: &str = "Recording. Type 'stop' to end after the current game";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn store_dir() -> PathBuf {
    std::env::var_os(STORE_DIR_VARIABLE)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
}

fn usage(program: &str) {
    println!("Usage: {} <game definition>", program);
    println!("       {} record <game definition> <agent id> <network id> <folder> [games]", program);
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("ql-atari", String::as_str);
    match args.len() {
        2 => train(Path::new(&args[1])),
        6 | 7 if args[1] == "record" => record(&args[2..]),
        _ => {
            usage(program);
            Ok(())
        }
    }
}

fn train(definition: &Path) -> Result<()> {
    let definition = GameDefinition::load(definition)?;
    let game = CatchGame::new(definition.clone())?;
    let (height, width) = game.screen_size();
    let param = AgentParameter::for_game(game.minimal_action_set(), height, width);
    let network = conv_q_network(&param.network, &param.optimizer)?;
    log::info!("network with {} parameters", network.num_params().to_formatted_string(&number_format()));
    let store = FileStore::open(&store_dir())?;

    let agent = Agent::create_with(&definition.name, param, game, network, store, LogTelemetry)?;
    let handle = AgentHandle::spawn(agent)?;
    handle.train();

    println!("{}", INFO);
    let lines = stdin_lines()?;
    let reason = wait_for_stop(&handle, &lines, POLL_INTERVAL, INFO);
    log::debug!("leaving training: {:?}", reason);

    println!("Waiting for the agent to stop ... ");
    handle.stop();
    let agent = handle.join().context("agent failed")?;
    log::info!(
        "agent {} finished after {} iterations",
        agent.id(),
        agent.param().state.iteration.to_formatted_string(&number_format())
    );
    Ok(())
}

/// `<game definition> <agent id> <network id> <folder> [games]`
fn record(args: &[String]) -> Result<()> {
    let definition = GameDefinition::load(Path::new(&args[0]))?;
    let agent_id: AgentId = args[1].parse().with_context(|| format!("invalid agent id '{}'", args[1]))?;
    let network_id: NetworkId = args[2].parse().with_context(|| format!("invalid network id '{}'", args[2]))?;
    let folder = PathBuf::from(&args[3]);
    let games = match args.get(4) {
        Some(games) => games.parse().with_context(|| format!("invalid number of games '{}'", games))?,
        None => DEFAULT_GAMES,
    };

    let store = FileStore::open(&store_dir())?;
    let param = store.load_agent_params(agent_id)?;
    let network = conv_q_network(&param.network, &param.optimizer)?;
    println!("Loading the agent ... ");
    let mut agent = Agent::load(
        agent_id,
        NetworkSelection::Id(network_id),
        CatchGame::new(definition)?,
        network,
        store,
        LogTelemetry,
    )?;

    let processing = agent.processing();
    processing.start();
    let lines = stdin_lines()?;
    thread::Builder::new().name("stop".to_string()).spawn(move || {
        for line in lines {
            if line.trim() == STOP {
                processing.stop();
                break;
            }
            println!("{}", RECORD_INFO);
        }
    })?;

    println!("{}", RECORD_INFO);
    let summary = record_games(&mut agent, network_id, &folder, games)?;
    println!("Max. score      : {}", summary.max);
    println!("Min. score      : {}", summary.min);
    println!("Avg. score      : {:.2}", summary.average);
    println!("Episodes played : {}", summary.scores.len());
    Ok(())
}
