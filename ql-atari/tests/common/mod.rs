use lazy_static::lazy_static;
use log::LevelFilter;

use ql::learn::parameter::AgentParameter;
use ql::prelude::Environment;
use ql_atari::game::{CatchGame, GameDefinition};

#[rustfmt::skip]
lazy_static! {
    pub static ref TINY_CATCH: GameDefinition = GameDefinition {
        name: "tiny-catch".to_string(),
        columns: 5,
        rows: 6,
        cell_size: 2,
        output_height: 12,
        output_width: 10,
        paddle_width: 1,
        lives: 2,
        seed: Some(17),
    };
}

#[ctor::ctor]
fn init() {
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

pub fn game() -> CatchGame { CatchGame::new(TINY_CATCH.clone()).unwrap() }

pub fn small_parameter() -> AgentParameter {
    let game = game();
    let (height, width) = game.screen_size();
    let mut param = AgentParameter::for_game(game.minimal_action_set(), height, width);
    param.network.channels = 2;
    param.playing.action_repeat = 1;
    param.playing.max_wait = 4;
    param.playing.observation_threshold = 50;
    param.learning.replay_capacity = 200;
    param.learning.frame_chunk_size = 64;
    param.learning.batch_size = 8;
    param.learning.epsilon_steps = 100;
    param.testing.epoch = 30;
    param.testing.iterations = 20;
    param.testing.set_min = 8;
    param.testing.set_max = 16;
    param
}
