use env_logger::Env;
use scene_viewport::cli::CliOverrides;
use scene_viewport::run_with_overrides;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            log::error!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().cloned();
    if let Err(err) = pollster::block_on(run_with_overrides(config_path, cli.into_config_overrides())) {
        log::error!("Application error: {err:?}");
        std::process::exit(1);
    }
}
