use app::{deinitialize_app, initialize_app};
use app_env::{initialize_logging, initialize_panic_handler};
use color_eyre::eyre::Result;
use eventloop::run_event_loop;
use hc_kstar_inverter::{app_state::AppEvent, settings::Settings};
mod app;
mod app_env;
mod eventloop;

async fn run_application() -> Result<()> {
    let settings = Settings::from_env()?;
    initialize_logging(&settings.log, settings.app.data_dir.as_deref())?;
    initialize_panic_handler()?;
    log::debug!("Settings: {:?}", settings);

    let (mut app_event_receiver, mut state) = initialize_app(&settings).await?;

    // Exit the application cleanly on Ctrl-C
    let ctrl_sender = state.app_event_sender.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                if let Err(err) = ctrl_sender.send(AppEvent::Exit).await {
                    log::error!("Error during application shutdown: {}", err);
                }
            }
            Err(err) => log::error!("Cannot listen for ctrl-c: {}", err),
        }
    });

    run_event_loop(&mut app_event_receiver, &mut state).await?;

    deinitialize_app(state).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run_application().await {
        eprintln!("{} fatal error: {:?}", env!("CARGO_PKG_NAME"), e);
        Err(e)
    } else {
        Ok(())
    }
}
