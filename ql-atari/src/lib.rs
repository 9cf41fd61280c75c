pub mod console;
pub mod game;
pub mod network;
pub mod record;
pub mod store;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}
