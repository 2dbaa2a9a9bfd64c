use color_eyre::eyre::Result;
use hc_kstar_inverter::app_state::AppState;

pub async fn handle_exit(state: &mut AppState) -> Result<bool> {
    log::info!("Shutting down");

    // stop forwarding first, so unloading does not produce another round of events
    state.stop_forwarders();

    if let Some(integration) = state.integration.take() {
        integration.unload().await;
    }

    state.should_exit = true;
    Ok(false)
}
