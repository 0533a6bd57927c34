use mcsm_daemon::app::run_app;
use mcsm_daemon::config::AppConfig;

fn init_logger() {
    if std::env::var_os("RUST_LOG").is_none() {
        unsafe {
            std::env::set_var("RUST_LOG", &AppConfig::get().log_level);
        }
    }
    pretty_env_logger::init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    run_app().await
}
