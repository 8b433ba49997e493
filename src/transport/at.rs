//! Driver for LoRa radio modules controlled with AT commands over a serial line.
//!
//! The module is configured once, and then put in receive mode. Sending a line is a small
//! exchange: announce the length with `AT+SEND=<len>`, wait for `OK`, write the data and wait for
//! `SENDED`. Received radio frames show up as `LR,<sender>,<len>,<data>` lines at any time, also
//! in the middle of such an exchange, and are forwarded as they come in.

use std::{io, time::Duration};

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{sleep, timeout_at, Instant},
};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::config::RadioConfig;

use super::{Link, OutboundLine, TransportError};

/// Longest line accepted from the module.
const MAX_LINE_LENGTH: usize = 1024;
/// Prefix of responses to commands.
const RESPONSE_PREFIX: &str = "AT,";
/// Prefix of received radio frames.
const FRAME_PREFIX: &str = "LR,";
/// Response confirming a command.
const RESPONSE_OK: &str = "OK";
/// Response once data has been transmitted.
const RESPONSE_SENT: &str = "SENDED";
/// Prefix of error responses.
const RESPONSE_ERROR: &str = "ERR";

/// Configure the radio module on `stream` and start a driver for it. The driver stops when the
/// device closes, or when every [`Transport`](super::Transport) handle of the returned [`Link`]
/// is dropped.
pub async fn connect<S>(stream: S, config: RadioConfig) -> Result<Link, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (link, outbound, inbound) = Link::new();
    let mut modem = Modem {
        framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        config,
        inbound,
    };

    modem.setup().await?;
    tokio::spawn(modem.run(outbound));

    Ok(link)
}

/// A line read from the module.
#[derive(Debug, PartialEq, Eq)]
enum ModuleLine<'a> {
    /// A radio frame received from another module.
    Frame {
        sender: &'a str,
        length: Option<usize>,
        data: &'a str,
    },
    /// A response to a command, without the response prefix.
    Response(&'a str),
}

impl<'a> ModuleLine<'a> {
    fn parse(line: &'a str) -> Self {
        if let Some(frame) = line.strip_prefix(FRAME_PREFIX) {
            let mut parts = frame.splitn(3, ',');
            let sender = parts.next().unwrap_or_default();
            let length = parts
                .next()
                .and_then(|len| usize::from_str_radix(len, 16).ok());
            let data = parts.next().unwrap_or_default();
            ModuleLine::Frame {
                sender,
                length,
                data,
            }
        } else {
            ModuleLine::Response(line.strip_prefix(RESPONSE_PREFIX).unwrap_or(line))
        }
    }
}

enum Event {
    Send(Option<OutboundLine>),
    Line(Option<Result<String, LinesCodecError>>),
}

struct Modem<S> {
    framed: Framed<S, LinesCodec>,
    config: RadioConfig,
    inbound: mpsc::Sender<String>,
}

impl<S> Modem<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn setup(&mut self) -> Result<(), TransportError> {
        info!("Configuring radio module");

        let configure = format!("AT+CFG={}", self.config.configuration);
        self.command(&configure, RESPONSE_OK, self.config.response_timeout())
            .await?;
        sleep(self.config.pause()).await;

        self.command("AT+RX", RESPONSE_OK, self.config.response_timeout())
            .await?;
        sleep(self.config.pause()).await;

        debug!("Radio module is in receive mode");

        Ok(())
    }

    async fn run(mut self, mut outbound: mpsc::Receiver<OutboundLine>) {
        loop {
            let event = tokio::select! {
                request = outbound.recv() => Event::Send(request),
                line = self.framed.next() => Event::Line(line),
            };

            match event {
                Event::Send(Some(request)) => {
                    let result = self.transmit(&request.line).await;
                    if let Err(e) = &result {
                        warn!("Failed to transmit line: {e}");
                    }
                    // Sender might have given up waiting, that's fine.
                    let _ = request.done.send(result);
                }
                Event::Send(None) => {
                    debug!("All transport handles dropped, stopping radio driver");
                    return;
                }
                Event::Line(Some(Ok(line))) => self.unsolicited(&line).await,
                Event::Line(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!("Discarding overlong line from radio module");
                }
                Event::Line(Some(Err(LinesCodecError::Io(e)))) => {
                    error!("Failed to read from radio module: {e}");
                    return;
                }
                Event::Line(None) => {
                    error!("Radio module closed the connection");
                    return;
                }
            }
        }
    }

    /// Transmit `line`, split in multiple radio frames if it is too long for a single one.
    async fn transmit(&mut self, line: &str) -> Result<(), TransportError> {
        let chunks = split_frames(line, self.config.max_message_length);
        if chunks.len() > 1 {
            debug!(
                "Splitting line of {} bytes in {} radio frames",
                line.len(),
                chunks.len()
            );
        }

        for chunk in chunks {
            let announce = format!("AT+SEND={}", chunk.len());
            self.command(&announce, RESPONSE_OK, self.config.response_timeout())
                .await?;
            sleep(self.config.pause()).await;

            // Airtime grows with the frame size.
            let airtime = self.config.pause() * (chunk.len().max(1) as u32) * 4;
            self.command(chunk, RESPONSE_SENT, airtime).await?;
            sleep(self.config.pause()).await;
        }

        Ok(())
    }

    /// Write `command` and wait until the module answers with exactly `expected`. Radio frames
    /// received in the meantime are forwarded.
    async fn command(
        &mut self,
        command: &str,
        expected: &'static str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        trace!("Radio <- {command}");
        // The codec adds the trailing \n.
        self.framed
            .send(format!("{command}\r"))
            .await
            .map_err(codec_error)?;

        let deadline = Instant::now() + timeout;
        loop {
            let line = match timeout_at(deadline, self.framed.next()).await {
                Err(_) => return Err(TransportError::NoResponse { expected }),
                Ok(None) => return Err(TransportError::Closed),
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!("Discarding overlong line from radio module");
                    continue;
                }
                Ok(Some(line)) => line.map_err(codec_error)?,
            };

            match ModuleLine::parse(&line) {
                ModuleLine::Response(response) if response == expected => {
                    trace!("Radio -> {line}");
                    return Ok(());
                }
                ModuleLine::Response(response) if response.starts_with(RESPONSE_ERROR) => {
                    return Err(TransportError::Rejected(response.to_string()));
                }
                _ => self.unsolicited(&line).await,
            }
        }
    }

    /// Handle a line which is not the response to a pending command.
    async fn unsolicited(&mut self, line: &str) {
        match ModuleLine::parse(line) {
            ModuleLine::Frame {
                sender,
                length,
                data,
            } => {
                trace!("Received radio frame from module {sender}");
                if length != Some(data.len()) {
                    warn!(
                        "Radio frame from module {sender} has length {length:?}, but carries {} bytes",
                        data.len()
                    );
                }
                if self.inbound.send(data.to_string()).await.is_err() {
                    debug!("Dropping radio frame since nobody is listening");
                }
            }
            ModuleLine::Response(response) => {
                trace!("Ignoring unexpected radio response {response}");
            }
        }
    }
}

fn codec_error(e: LinesCodecError) -> TransportError {
    match e {
        LinesCodecError::Io(e) => TransportError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }
}

/// Split `line` in pieces of at most `max_len` bytes, on character boundaries.
fn split_frames(line: &str, max_len: usize) -> Vec<&str> {
    let mut frames = Vec::new();
    let mut start = 0;
    for (idx, ch) in line.char_indices() {
        if idx > start && idx + ch.len_utf8() - start > max_len {
            frames.push(&line[start..idx]);
            start = idx;
        }
    }
    frames.push(&line[start..]);
    frames
}
