use oxidp_config::AppConfig;
use oxidp_server::init_tracing;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = oxidp_server::run(config).await {
        eprintln!("server error: {err}");
        std::process::exit(1);
    }
}
