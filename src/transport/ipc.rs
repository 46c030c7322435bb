//! Unix-socket bridge to the connector process
//!
//! Newline-delimited JSON frames: `{"type": "command"|"reply"|"event", "payload": "<xml>"}`.
//! Commands are serialized so each reply pairs with the command before it.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{InboundHandler, Transport};
use crate::core::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct IpcFrame {
    #[serde(rename = "type")]
    msg_type: String,
    payload: String,
}

type SharedHandler = Arc<RwLock<Option<InboundHandler>>>;

pub struct IpcTransport {
    outbound: flume::Sender<String>,
    replies: flume::Receiver<String>,
    handler: SharedHandler,
    /// One command in flight at a time
    in_flight: Mutex<()>,
}

impl IpcTransport {
    /// Connect to the connector socket and start the reader/writer tasks on `runtime`.
    pub fn connect(socket_path: &str, runtime: &Handle) -> Result<Arc<Self>> {
        let stream = runtime
            .block_on(UnixStream::connect(socket_path))
            .map_err(|e| Error::Transport(format!("connect {}: {}", socket_path, e)))?;
        info!("IPC connected: {}", socket_path);

        let (read_half, mut write_half) = stream.into_split();
        let (out_tx, out_rx) = flume::unbounded::<String>();
        let (reply_tx, reply_rx) = flume::unbounded::<String>();
        let handler: SharedHandler = Arc::new(RwLock::new(None));

        runtime.spawn(async move {
            while let Ok(payload) = out_rx.recv_async().await {
                let frame = IpcFrame {
                    msg_type: "command".into(),
                    payload,
                };
                let mut line = match serde_json::to_string(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("IPC frame encode failed: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    warn!("IPC write failed: {}", e);
                    break;
                }
            }
            debug!("IPC writer stopped");
        });

        let reader_handler = handler.clone();
        runtime.spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<IpcFrame>(&line) {
                        Ok(frame) if frame.msg_type == "reply" => {
                            if reply_tx.send(frame.payload).is_err() {
                                break;
                            }
                        }
                        Ok(frame) if frame.msg_type == "event" => {
                            if let Some(handler) = reader_handler.read().as_ref() {
                                handler(frame.payload);
                            }
                        }
                        Ok(frame) => debug!("IPC frame of unknown type '{}' ignored", frame.msg_type),
                        Err(e) => warn!("IPC frame decode failed: {}", e),
                    },
                    Ok(None) => {
                        warn!("IPC connector closed the socket");
                        break;
                    }
                    Err(e) => {
                        warn!("IPC read failed: {}", e);
                        break;
                    }
                }
            }
            // dropping reply_tx wakes any waiter with a disconnect
        });

        Ok(Arc::new(Self {
            outbound: out_tx,
            replies: reply_rx,
            handler,
            in_flight: Mutex::new(()),
        }))
    }
}

impl Transport for IpcTransport {
    fn send(&self, command: &str) -> Result<String> {
        let _guard = self.in_flight.lock();
        // a reply left over from an abandoned command belongs to nobody
        while let Ok(stale) = self.replies.try_recv() {
            warn!("discarding stale IPC reply: {}", preview(&stale));
        }
        self.outbound
            .send(command.to_string())
            .map_err(|_| Error::Transport("IPC writer is gone".into()))?;
        self.replies
            .recv()
            .map_err(|_| Error::Transport("IPC reader is gone".into()))
    }

    fn register_inbound(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }
}

fn preview(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
