/// Initializes engine diagnostics via `tracing`.
///
/// Filtering follows the `RUST_LOG` environment variable
/// (e.g. `RUST_LOG=satlink=debug`). Simulation events are a separate stream:
/// they go to the scenario's configured log sink, not here.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
