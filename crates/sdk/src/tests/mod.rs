#[cfg(unix)]
mod process_spawn;
mod router_flows;
mod run_flows;
