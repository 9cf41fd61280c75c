use std::time::Duration;

use lazy_static::lazy_static;
use log::LevelFilter;

use ql::learn::parameter::AgentParameter;
use ql::prelude::Environment;
use ql::test::pixel_test_environment::PixelTestEnvironment;

pub const SCREEN_HEIGHT: usize = 3;
pub const SCREEN_WIDTH: usize = 2;
pub const EPISODE_LENGTH: usize = 9;
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
pub const TIMEOUT: Duration = Duration::from_secs(60);

#[rustfmt::skip]
lazy_static! {
    pub static ref Q_VALUES: Vec<f32> = vec![0.2, 0.4, 1.0, 0.6];
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

pub fn environment() -> PixelTestEnvironment { PixelTestEnvironment::new(SCREEN_HEIGHT, SCREEN_WIDTH, EPISODE_LENGTH) }

/// Parameters scaled down to a few hundred environment steps per test epoch
pub fn small_parameter() -> AgentParameter {
    let environment = environment();
    let mut param = AgentParameter::for_game(environment.minimal_action_set(), SCREEN_HEIGHT, SCREEN_WIDTH);
    param.network.channels = 3;
    param.playing.action_repeat = 2;
    param.playing.max_wait = 6;
    param.playing.observation_threshold = 40;
    param.learning.replay_capacity = 100;
    param.learning.frame_chunk_size = 32;
    param.learning.batch_size = 8;
    param.learning.epsilon_steps = 200;
    param.testing.epoch = 25;
    param.testing.iterations = 20;
    param.testing.set_min = 10;
    param.testing.set_max = 20;
    param
}
