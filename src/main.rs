use color_eyre::{eyre::eyre, Result};
use nexus_hid::config::AppConfig;
use nexus_hid::controller::{ControllerSession, GilrsDriver, SessionControl};
use nexus_hid::serial::{ChecksumInspector, FrameReader, SerialChannel, SerialSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load(&AppConfig::default_path()).await?;

    let serial = match config.serial.port.clone() {
        Some(path) => Some(spawn_serial_reader(&path, &config.serial)?),
        None => {
            info!("No serial port configured, serial input disabled");
            None
        }
    };

    let (ready_tx, ready_rx) = oneshot::channel();
    let controller_thread = spawn_controller_session(&config, ready_tx);

    // The sender is dropped without a message if the driver failed to start
    let control = match ready_rx.await {
        Ok((control, connected)) if connected > 0 => Some(control),
        Ok(_) => {
            warn!("No controllers connected");
            None
        }
        Err(_) => None,
    };

    if control.is_some() || serial.is_some() {
        info!("Running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    if let Some(control) = control {
        control.request_stop();
        control.wait_stopped().await;
    }
    join(controller_thread)
        .await?
        .map_err(|e| eyre!("Controller session failed: {}", e))?;

    if let Some((running, serial_thread)) = serial {
        running.store(false, Ordering::Release);
        join(serial_thread).await?;
    }

    info!("Shut down");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

type SessionReady = oneshot::Sender<(SessionControl, usize)>;

// Connects and polls on a dedicated thread; reports the control handle once connected.
fn spawn_controller_session(
    config: &AppConfig,
    ready: SessionReady,
) -> JoinHandle<Result<(), nexus_hid::controller::DriverError>> {
    let settings = config.controller.clone();

    thread::spawn(move || {
        let driver = GilrsDriver::new()?;
        let max_wait = settings.discovery_timeout();
        let session = ControllerSession::create(driver, Some(settings));

        let control = session.control();
        control.set_button_callback(|id, buttons| {
            info!("Controller {} buttons: {:?}", id, buttons.pressed().collect::<Vec<_>>())
        });

        let (session, connected) = session.connect(max_wait);
        if ready.send((control, connected)).is_err() {
            warn!("Session owner went away before connect finished");
        }

        if connected == 0 {
            session.release();
        } else {
            session.poll_loop();
        }
        Ok(())
    })
}

fn spawn_serial_reader(
    path: &str,
    settings: &SerialSettings,
) -> Result<(Arc<AtomicBool>, JoinHandle<()>)> {
    let channel = SerialChannel::open_with(path, settings)?;
    let mut reader = FrameReader::new(channel, ChecksumInspector, settings.frame_len);
    let running = reader.stop_handle();

    let handle = thread::spawn(move || {
        loop {
            match reader.read_frame() {
                Ok(Some(press)) => info!(
                    "Remote {} pressed {} (frame {:02x?})",
                    press.remote_id, press.key, press.frame
                ),
                Ok(None) => break,
                Err(e) => {
                    error!("Serial input stopped: {}", e);
                    break;
                }
            }
        }
        reader.into_source().close();
    });

    Ok((running, handle))
}

async fn join<T: Send + 'static>(handle: JoinHandle<T>) -> Result<T> {
    tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| eyre!("Worker thread panicked"))
}
