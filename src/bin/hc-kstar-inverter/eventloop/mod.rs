use std::time::Duration;

use color_eyre::eyre::Result;
use entities::{handle_availability_changed, handle_entity_changed};
use hc_kstar_inverter::app_state::{AppEvent, AppState};
use tokio::sync::mpsc::Receiver;

mod app;
mod entities;

pub use app::*;

pub async fn run_event_loop(receiver: &mut Receiver<AppEvent>, state: &mut AppState) -> Result<()> {
    loop {
        // timeout is usually 60s, except if we want to exit, we set it to one second, so the
        // application exits as soon as all events are done processing
        let timeout = if state.should_exit { 1 } else { 60 };
        let exit = match tokio::time::timeout(Duration::from_secs(timeout), receiver.recv()).await {
            Ok(Some(AppEvent::EntityChanged { key, value })) => handle_entity_changed(key, value, state)?,
            Ok(Some(AppEvent::AvailabilityChanged(available))) => handle_availability_changed(available, state)?,
            Ok(Some(AppEvent::Exit)) => handle_exit(state).await?,
            Ok(None) => true,
            Err(_) => state.should_exit,
        };

        if exit {
            break;
        }
    }
    log::debug!("Exiting application event loop");
    Ok(())
}
