use super::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage, LIVE_ENDPOINT};
use super::{Mode, SessionController, SessionError, SessionEvent, DEFAULT_LIVE_MODEL, DEFAULT_VOICE};
use crate::capture::MicCapture;
use crate::pcm;
use crate::playback::{AudioSink, CpalSink};
use crate::transcript::TranscriptEntry;
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Configuration for one live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub mode: Mode,
    pub model: String,
    pub voice: String,
    /// Input device name (None = platform default).
    pub device: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Conversation,
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            device: None,
        }
    }
}

/// Run one live session to completion.
///
/// Streams microphone frames to the remote session and plays synthesized
/// audio until `cancel` fires, the server closes the connection, or a
/// transport error occurs. Display-worthy [`SessionEvent`]s are passed to
/// `on_event` as they happen.
///
/// Returns the finalized transcript history on a clean shutdown.
pub async fn run_session(
    api_key: &str,
    config: &LiveConfig,
    cancel: CancellationToken,
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<Vec<TranscriptEntry>, SessionError> {
    let mut controller = SessionController::new(config.mode);

    match drive(&mut controller, api_key, config, cancel, &mut on_event).await {
        Ok(()) => Ok(controller.into_history()),
        Err(e) => {
            for event in controller.fail() {
                on_event(&event);
            }
            Err(e)
        }
    }
}

async fn drive(
    controller: &mut SessionController,
    api_key: &str,
    config: &LiveConfig,
    cancel: CancellationToken,
    on_event: &mut dyn FnMut(&SessionEvent),
) -> Result<(), SessionError> {
    controller.begin_connect()?;

    // Credential check precedes everything, including microphone access.
    if api_key.trim().is_empty() {
        return Err(SessionError::CredentialMissing(
            "API key is empty".to_string(),
        ));
    }

    let (_capture, mut frames) = MicCapture::start(config.device.clone(), pcm::INPUT_SAMPLE_RATE)?;
    let sink = CpalSink::new(pcm::OUTPUT_SAMPLE_RATE)?;

    let mut url = Url::parse(LIVE_ENDPOINT)?;
    url.query_pairs_mut().append_pair("key", api_key);

    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let setup = SetupMessage::new(&config.model, &config.voice, config.mode.system_instruction());
    write
        .send(Message::Text(serde_json::to_string(&setup)?.into()))
        .await?;

    // The server acks setup before any content flows.
    match read.next().await {
        Some(Ok(Message::Text(text))) => {
            let msg: ServerMessage = serde_json::from_str(text.as_str())?;
            if msg.setup_complete.is_none() {
                return Err(SessionError::Remote(
                    "expected setup acknowledgment".to_string(),
                ));
            }
        }
        Some(Ok(other)) => {
            return Err(SessionError::Remote(format!(
                "unexpected message during setup: {:?}",
                other
            )));
        }
        Some(Err(e)) => return Err(e.into()),
        None => {
            return Err(SessionError::Remote(
                "connection closed during setup".to_string(),
            ));
        }
    }

    controller.connected();
    log::info!("Live session open ({:?} mode, voice {})", config.mode, config.voice);

    // Playback clock: seconds since the session opened.
    let epoch = Instant::now();
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<u64>();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Live session stopping");
                for event in controller.stop() {
                    apply_event(&event, &sink, &finished_tx, epoch, on_event).await;
                }
                // Best-effort close; teardown proceeds regardless.
                if let Err(e) = write.close().await {
                    log::warn!("Live: failed to close socket cleanly: {}", e);
                }
                break;
            }

            Some(frame) = frames.recv() => {
                // Fire-and-forget: frames are sent in capture order with
                // no acknowledgment or flow control.
                let blob = pcm::encode_frame(&frame);
                let msg = RealtimeInputMessage::from_blob(&blob);
                write
                    .send(Message::Text(serde_json::to_string(&msg)?.into()))
                    .await?;
            }

            finished = finished_rx.recv() => {
                if let Some(id) = finished {
                    controller.playback_finished(id);
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let msg: ServerMessage = match serde_json::from_str(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("Live: unparseable server message: {}", e);
                                continue;
                            }
                        };
                        if let Some(content) = msg.server_content {
                            let now = epoch.elapsed().as_secs_f64();
                            for event in controller.handle_message(&content, now) {
                                apply_event(&event, &sink, &finished_tx, epoch, on_event).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // Remote close is a normal end of session.
                        log::info!("Live: server closed the session: {:?}", frame);
                        for event in controller.stop() {
                            apply_event(&event, &sink, &finished_tx, epoch, on_event).await;
                        }
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite
                    Some(Err(e)) => {
                        log::error!("Live: transport error: {}", e);
                        return Err(e.into());
                    }
                    None => {
                        log::info!("Live: connection ended");
                        for event in controller.stop() {
                            apply_event(&event, &sink, &finished_tx, epoch, on_event).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn apply_event(
    event: &SessionEvent,
    sink: &CpalSink,
    finished_tx: &mpsc::UnboundedSender<u64>,
    epoch: Instant,
    on_event: &mut dyn FnMut(&SessionEvent),
) {
    match event {
        SessionEvent::PlayAudio { source, buffer } => {
            if let Err(e) = sink.write(buffer).await {
                log::error!("Live: playback write failed: {}", e);
            }
            // Natural-end notification fires when the scheduled slot elapses.
            let remaining = (source.end() - epoch.elapsed().as_secs_f64()).max(0.0);
            let tx = finished_tx.clone();
            let id = source.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
                let _ = tx.send(id);
            });
        }
        SessionEvent::StopPlayback => {
            if let Err(e) = sink.clear().await {
                log::warn!("Live: failed to clear playback queue: {}", e);
            }
        }
        SessionEvent::Teardown => {
            if let Err(e) = sink.stop().await {
                log::warn!("Live: failed to stop playback sink: {}", e);
            }
        }
        _ => {}
    }

    on_event(event);
}
