use chain_core::config::Config;
use chain_core::node::Node;
use clap::Parser;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    let node = match Node::open(config) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("failed to open node: {e}");
            std::process::exit(1);
        }
    };

    log::info!("data dir: {:?}", node.config.data_dir);
    log::info!("state mode: {:?}", node.config.state_mode);
    if node.is_genesis_needed() {
        log::info!("no best header yet, waiting for a genesis block");
    }

    node.spawn_background_tasks();

    let addr = node.config.rpc_bind.clone();
    let app = chain_core::rpc::server::build(node);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    log::info!("status surface listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}
