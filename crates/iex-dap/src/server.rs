//! Content-Length framed DAP transport over arbitrary byte streams.
//!
//! Inbound framing is tolerant: header blocks may carry headers other than
//! `Content-Length` (they are ignored), and a block with a missing or
//! unparseable length is logged and skipped rather than tearing the loop
//! down. A body that fails to decode as a request is likewise dropped; the
//! announced length keeps the stream aligned either way.

use crate::adapter::IexDebugAdapter;
use dap::prelude::*;
use iex_repl::ReplSpawner;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub struct DapServer {
    adapter: Arc<IexDebugAdapter>,
}

impl DapServer {
    pub fn new(spawner: Arc<dyn ReplSpawner>) -> Self {
        // Placeholder channel; `run` installs the real event sender.
        let (tx, _rx) = mpsc::channel(100);
        let adapter = Arc::new(IexDebugAdapter::new(tx, spawner));

        Self { adapter }
    }

    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), Box<dyn std::error::Error>>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let writer = Arc::new(Mutex::new(BufWriter::new(writer)));

        let (event_tx, mut event_rx) = mpsc::channel::<dap::events::Event>(100);
        self.adapter.set_event_sender(event_tx).await;

        // Events are pushed by the adapter at any time, so they get their own
        // writer task behind the shared sink.
        let event_writer = writer.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = write_frame(&event_writer, &json).await {
                            error!(error = %e, "failed to write DAP event");
                        }
                    }
                    Err(e) => error!(error = %e, "failed to serialize DAP event"),
                }
            }
        });

        while let Some(length) = read_content_length(&mut reader).await? {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await?;

            // A body that is not a request is dropped, not fatal: the
            // header's length already kept the stream aligned.
            let request: Request = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable DAP frame");
                    continue;
                }
            };

            let response = self.adapter.handle_request(request).await;
            let json = serde_json::to_string(&response)?;
            if let Err(e) = write_frame(&writer, &json).await {
                error!(error = %e, "failed to write DAP response");
                break;
            }
        }

        Ok(())
    }
}

/// Reads header blocks until one announces a usable body length. Returns
/// `None` on EOF. Blocks without a parseable `Content-Length` are skipped
/// with a warning.
async fn read_content_length<R>(reader: &mut R) -> std::io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let mut length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            // Blank separator ends a header block.
            match length.take() {
                Some(n) => return Ok(Some(n)),
                None => continue,
            }
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                match value.trim().parse() {
                    Ok(n) => length = Some(n),
                    Err(e) => warn!(header = line, "bad Content-Length: {e}"),
                }
            }
            // Any other header is tolerated and ignored.
        } else {
            warn!(line, "ignoring malformed header line");
        }
    }
}

/// Writes one `Content-Length` framed payload through the shared sink.
async fn write_frame<W>(writer: &Mutex<BufWriter<W>>, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = writer.lock().await;
    w.write_all(format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload).as_bytes())
        .await?;
    w.flush().await
}
